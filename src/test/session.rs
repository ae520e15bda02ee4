// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! In-memory [`DatabaseSession`] that answers the catalog queries the locking
//! engine issues and records every statement it receives.

use crate::db::{DatabaseError, DatabaseSession};
use serde_json::json;
use std::collections::{HashMap, VecDeque};

type Responder = Box<dyn FnMut(&[String]) -> Result<Vec<Option<String>>, DatabaseError>>;

pub struct ScriptedSession {
    server_version: u32,
    responders: Vec<(String, Responder)>,
    partitions: HashMap<(String, String), Vec<String>>,
    blockers: VecDeque<Vec<String>>,
    lock_outcomes: VecDeque<Result<(), DatabaseError>>,
    statement_failures: Vec<(String, DatabaseError)>,
    settings: HashMap<String, String>,
    saved_settings: Vec<HashMap<String, String>>,
    log: Vec<String>,
    executed: Vec<String>,
    queries: Vec<(String, Vec<String>)>,
    blocker_scans: usize,
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSession {
    /// Defaults: schema `public`, server 16, no partitions, no blockers and
    /// every `LOCK TABLE` succeeding.
    pub fn new() -> Self {
        let mut session = Self {
            server_version: 160_000,
            responders: Vec::new(),
            partitions: HashMap::new(),
            blockers: VecDeque::new(),
            lock_outcomes: VecDeque::new(),
            statement_failures: Vec::new(),
            settings: HashMap::new(),
            saved_settings: Vec::new(),
            log: Vec::new(),
            executed: Vec::new(),
            queries: Vec::new(),
            blocker_scans: 0,
        };
        session.on_query("current_schema()", |_| Ok(vec![Some("public".to_string())]));
        session
    }

    pub fn with_server_version(mut self, version: u32) -> Self {
        self.server_version = version;
        self
    }

    /// Answers queries containing `pattern`. Later rules win over earlier ones
    /// and over the built-in catalog answers.
    pub fn on_query<F>(&mut self, pattern: &str, responder: F)
    where
        F: FnMut(&[String]) -> Result<Vec<Option<String>>, DatabaseError> + 'static,
    {
        self.responders.push((pattern.to_string(), Box::new(responder)));
    }

    pub fn add_partitions(&mut self, schema: &str, parent: &str, children: &[&str]) {
        self.partitions
            .entry((schema.to_string(), parent.to_string()))
            .or_default()
            .extend(children.iter().map(|child| child.to_string()));
    }

    /// Queues the rows returned by the next blocking-transaction scan. Once the
    /// queue is drained every scan returns no rows.
    pub fn push_blockers(&mut self, rows: Vec<String>) {
        self.blockers.push_back(rows);
    }

    /// Queues the outcome of the next `LOCK TABLE` statement.
    pub fn push_lock_outcome(&mut self, outcome: Result<(), DatabaseError>) {
        self.lock_outcomes.push_back(outcome);
    }

    /// Fails every executed statement containing `pattern`.
    pub fn fail_statement(&mut self, pattern: &str, error: DatabaseError) {
        self.statement_failures.push((pattern.to_string(), error));
    }

    /// Every statement in order, transaction control included.
    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// Statements sent through `execute`.
    pub fn executed(&self) -> Vec<String> {
        self.executed.clone()
    }

    pub fn queries(&self) -> Vec<(String, Vec<String>)> {
        self.queries.clone()
    }

    pub fn transaction_log(&self) -> Vec<String> {
        self.log
            .iter()
            .filter(|sql| matches!(sql.as_str(), "BEGIN" | "COMMIT" | "ROLLBACK"))
            .cloned()
            .collect()
    }

    pub fn blocker_scans(&self) -> usize {
        self.blocker_scans
    }

    fn descendants(&self, schema: &str, name: &str, out: &mut Vec<Option<String>>) {
        let key = (schema.to_string(), name.to_string());
        for child in self.partitions.get(&key).into_iter().flatten() {
            out.push(Some(json!({ "schema": schema, "name": child }).to_string()));
            self.descendants(schema, child, out);
        }
    }

    fn builtin(&mut self, sql: &str, params: &[String]) -> Vec<Option<String>> {
        if sql.contains("server_version_num") {
            return vec![Some(self.server_version.to_string())];
        }
        if let Some(setting) = sql.trim().strip_prefix("SHOW ") {
            let value = self.settings.get(setting).cloned().unwrap_or_else(|| "0".to_string());
            return vec![Some(value)];
        }
        if sql.contains("pg_inherits") {
            let mut rows = Vec::new();
            if let [schema, name, ..] = params {
                self.descendants(schema, name, &mut rows);
            }
            return rows;
        }
        if sql.contains("pg_stat_activity") {
            return self
                .blockers
                .pop_front()
                .unwrap_or_default()
                .into_iter()
                .map(Some)
                .collect();
        }
        Vec::new()
    }
}

impl DatabaseSession for ScriptedSession {
    fn execute(&mut self, sql: &str) -> Result<(), DatabaseError> {
        self.log.push(sql.to_string());
        self.executed.push(sql.to_string());

        if let Some((_, error)) = self
            .statement_failures
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
        {
            return Err(error.clone());
        }
        if sql.starts_with("LOCK TABLE") {
            return self.lock_outcomes.pop_front().unwrap_or(Ok(()));
        }
        if let Some(assignment) = sql.strip_prefix("SET ")
            && let Some((name, value)) = assignment.split_once(" = ")
        {
            self.settings
                .insert(name.to_string(), value.trim_matches('\'').to_string());
        }
        Ok(())
    }

    fn select_values(
        &mut self,
        sql: &str,
        params: &[&str],
    ) -> Result<Vec<Option<String>>, DatabaseError> {
        let params: Vec<String> = params.iter().map(|param| param.to_string()).collect();
        self.log.push(sql.to_string());
        self.queries.push((sql.to_string(), params.clone()));
        if sql.contains("pg_stat_activity") {
            self.blocker_scans += 1;
        }

        if let Some((_, responder)) = self
            .responders
            .iter_mut()
            .rev()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
        {
            return responder(params.as_slice());
        }
        Ok(self.builtin(sql, &params))
    }

    fn begin_transaction(&mut self) -> Result<(), DatabaseError> {
        self.log.push("BEGIN".to_string());
        self.saved_settings.push(self.settings.clone());
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), DatabaseError> {
        self.log.push("COMMIT".to_string());
        self.saved_settings.pop();
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<(), DatabaseError> {
        self.log.push("ROLLBACK".to_string());
        if let Some(saved) = self.saved_settings.pop() {
            self.settings = saved;
        }
        Ok(())
    }
}

/// A `pg_stat_activity` row as rendered by the blocking-transaction scan.
pub fn blocker_row(pid: i32, query: &str, locks: &[(&str, &str, &str)]) -> String {
    let tables: Vec<_> = locks
        .iter()
        .map(|(schema, name, mode)| json!({ "schema": schema, "name": name, "mode": mode }))
        .collect();
    json!({
        "pid": pid,
        "database": "app",
        "current_query": query,
        "state": "active",
        "transaction_age_secs": 42.5,
        "tables_with_locks": tables,
    })
    .to_string()
}

pub fn lock_timeout_error() -> DatabaseError {
    DatabaseError::from_sqlstate("55P03", "canceling statement due to lock timeout")
}

pub fn statement_timeout_error() -> DatabaseError {
    DatabaseError::from_sqlstate("57014", "canceling statement due to statement timeout")
}
