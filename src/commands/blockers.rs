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


use crate::config::TableLockConfig;
use crate::db::{DatabaseSession, PostgresSession};
use crate::error::Result;
use crate::locking::{
    LockMode, LongRunningTransaction, TableCollection, find_blocking_transactions, format_duration,
};
use colored::Colorize;
use comfy_table::{Cell, Color, Table};
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
struct BlockerOutput {
    pid: i32,
    database: String,
    state: Option<String>,
    transaction_age_secs: f64,
    concurrent_index_build: bool,
    tables: Vec<LockOutput>,
    current_query: String,
}

#[derive(Serialize)]
struct LockOutput {
    table: String,
    mode: Option<String>,
}

impl From<&LongRunningTransaction> for BlockerOutput {
    fn from(transaction: &LongRunningTransaction) -> Self {
        Self {
            pid: transaction.pid,
            database: transaction.database.clone(),
            state: transaction.state.clone(),
            transaction_age_secs: transaction.transaction_age.as_secs_f64(),
            concurrent_index_build: transaction.concurrent_index_build(),
            tables: transaction
                .tables_with_locks
                .iter()
                .map(|table| LockOutput {
                    table: table.qualified_name(),
                    mode: table.mode().map(|mode| mode.identifier().to_string()),
                })
                .collect(),
            current_query: transaction.current_query.clone(),
        }
    }
}

pub struct BlockersCommand<'a> {
    config: &'a TableLockConfig,
}

impl<'a> BlockersCommand<'a> {
    pub fn new(config: &'a TableLockConfig) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn execute(
        &self,
        database_url: Option<&str>,
        min_age_secs: Option<u64>,
        tables: &[String],
        json: bool,
    ) -> Result<()> {
        let url = self.config.database_url(database_url)?;
        let mut session = PostgresSession::connect(&url)?;
        let output = self.run(&mut session, min_age_secs, tables, json)?;
        println!("{output}");
        Ok(())
    }

    /// Scans for blockers and renders them. Without `--min-age` the fast-fail
    /// timeout is used, matching what the lock controller waits on.
    pub fn run<S>(
        &self,
        session: &mut S,
        min_age_secs: Option<u64>,
        tables: &[String],
        json: bool,
    ) -> Result<String>
    where
        S: DatabaseSession + ?Sized,
    {
        let min_age = min_age_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.locking.fast_fail_timeout());

        let mut transactions = find_blocking_transactions(session, min_age)?;
        if !tables.is_empty() {
            let filter = TableCollection::from_table_names(session, tables, None)?
                .with_partitions(session)?;
            // ACCESS EXCLUSIVE conflicts with every held mode.
            transactions.retain(|transaction| transaction.blocks(&filter, LockMode::AccessExclusive));
        }
        log::debug!(
            "{} blocking transaction(s) older than {}",
            transactions.len(),
            format_duration(min_age)
        );

        if json {
            let output: Vec<BlockerOutput> = transactions.iter().map(BlockerOutput::from).collect();
            return Ok(serde_json::to_string_pretty(&output)?);
        }
        Ok(render_table(&transactions, min_age))
    }
}

fn render_table(transactions: &[LongRunningTransaction], min_age: Duration) -> String {
    if transactions.is_empty() {
        return format!(
            "No transactions holding table locks for longer than {}.",
            format_duration(min_age)
        );
    }

    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_BORDERS_ONLY);
    table.set_header(vec![
        Cell::new("PID"),
        Cell::new("Database"),
        Cell::new("Age"),
        Cell::new("State"),
        Cell::new("Locks"),
        Cell::new("Query"),
    ]);

    for transaction in transactions {
        let locks = transaction
            .tables_with_locks
            .iter()
            .map(|table| match table.mode() {
                Some(mode) => format!("{} ({})", table.qualified_name(), mode.identifier()),
                None => table.qualified_name(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        let query = transaction
            .current_query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let query_cell = if transaction.concurrent_index_build() {
            Cell::new(query).fg(Color::Yellow)
        } else {
            Cell::new(query)
        };

        table.add_row(vec![
            Cell::new(transaction.pid),
            Cell::new(&transaction.database),
            Cell::new(format_duration(transaction.transaction_age)),
            Cell::new(transaction.state.as_deref().unwrap_or("unknown")),
            Cell::new(locks),
            query_cell,
        ]);
    }

    let mut output = table.to_string();
    let index_builds = transactions
        .iter()
        .filter(|transaction| transaction.concurrent_index_build())
        .count();
    if index_builds > 0 {
        output.push_str(&format!(
            "\n{} {index_builds} concurrent index build(s) in progress; these can hold locks for a long time.",
            "Note:".yellow().bold()
        ));
    }
    output
}
