use serde_json::json;
use std::collections::{HashMap, VecDeque};
use tablelock::db::{DatabaseError, DatabaseSession};

/// Session double for integration tests: answers the catalog queries issued
/// by the lock controller and records everything it is asked to run.
pub struct RecordingSession {
    pub server_version: u32,
    pub partitions: HashMap<String, Vec<String>>,
    pub blockers: VecDeque<Vec<String>>,
    pub lock_outcomes: VecDeque<Result<(), DatabaseError>>,
    pub statements: Vec<String>,
    pub scans: usize,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self {
            server_version: 160_000,
            partitions: HashMap::new(),
            blockers: VecDeque::new(),
            lock_outcomes: VecDeque::new(),
            statements: Vec::new(),
            scans: 0,
        }
    }

    pub fn lock_statements(&self) -> Vec<&str> {
        self.statements
            .iter()
            .map(String::as_str)
            .filter(|sql| sql.starts_with("LOCK TABLE"))
            .collect()
    }

    pub fn transaction_statements(&self) -> Vec<&str> {
        self.statements
            .iter()
            .map(String::as_str)
            .filter(|sql| matches!(*sql, "BEGIN" | "COMMIT" | "ROLLBACK"))
            .collect()
    }
}

impl DatabaseSession for RecordingSession {
    fn execute(&mut self, sql: &str) -> Result<(), DatabaseError> {
        self.statements.push(sql.to_string());
        if sql.starts_with("LOCK TABLE") {
            return self.lock_outcomes.pop_front().unwrap_or(Ok(()));
        }
        Ok(())
    }

    fn select_values(
        &mut self,
        sql: &str,
        params: &[&str],
    ) -> Result<Vec<Option<String>>, DatabaseError> {
        if sql.contains("current_schema()") {
            return Ok(vec![Some("public".to_string())]);
        }
        if sql.contains("server_version_num") {
            return Ok(vec![Some(self.server_version.to_string())]);
        }
        if sql.starts_with("SHOW ") {
            return Ok(vec![Some("0".to_string())]);
        }
        if sql.contains("pg_inherits") {
            let children = self.partitions.get(params[1]).cloned().unwrap_or_default();
            return Ok(children
                .into_iter()
                .map(|name| Some(json!({ "schema": params[0], "name": name }).to_string()))
                .collect());
        }
        if sql.contains("pg_stat_activity") {
            self.scans += 1;
            let rows = self.blockers.pop_front().unwrap_or_default();
            return Ok(rows.into_iter().map(Some).collect());
        }
        Ok(Vec::new())
    }

    fn begin_transaction(&mut self) -> Result<(), DatabaseError> {
        self.statements.push("BEGIN".to_string());
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), DatabaseError> {
        self.statements.push("COMMIT".to_string());
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<(), DatabaseError> {
        self.statements.push("ROLLBACK".to_string());
        Ok(())
    }
}

pub fn blocker_row(pid: i32, table: &str, mode: &str) -> String {
    json!({
        "pid": pid,
        "database": "app",
        "current_query": format!("SELECT * FROM {table}"),
        "state": "idle in transaction",
        "transaction_age_secs": 120.0,
        "tables_with_locks": [{ "schema": "public", "name": table, "mode": mode }],
    })
    .to_string()
}

pub fn lock_timeout_error() -> DatabaseError {
    DatabaseError::from_sqlstate("55P03", "canceling statement due to lock timeout")
}
