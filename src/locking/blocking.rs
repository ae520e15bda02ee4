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

//! Scan of live server state for sessions that hold table locks long enough
//! to stall a lock request.

use crate::db::DatabaseSession;
use crate::error::Result;
use crate::locking::collection::TableCollection;
use crate::locking::mode::LockMode;
use crate::locking::table::TableReference;
use crate::locking::timeout::format_duration;
use log::{debug, warn};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

/// One row per backend: sessions in this database, other than our own, whose
/// transaction is older than `$1` seconds and that hold or await a lock on an
/// ordinary or partitioned table. Autovacuum is ignored unless it is running
/// to prevent wraparound, which cannot be deferred.
const BLOCKING_TRANSACTIONS_SQL: &str = r#"
SELECT row_to_json(blocker)::text
FROM (
    SELECT
        activity.pid,
        activity.datname AS database,
        activity.query AS current_query,
        activity.state,
        EXTRACT(EPOCH FROM NOW() - activity.xact_start)::float8 AS transaction_age_secs,
        (
            SELECT array_to_json(array_agg(row_to_json(held)))
            FROM (
                SELECT DISTINCT ns.nspname AS schema, rel.relname AS name, locks.mode
                FROM pg_locks locks
                JOIN pg_class rel ON rel.oid = locks.relation
                JOIN pg_namespace ns ON ns.oid = rel.relnamespace
                WHERE locks.pid = activity.pid
                  AND locks.locktype = 'relation'
                  AND rel.relkind IN ('r', 'p')
            ) held
        ) AS tables_with_locks,
        activity.xact_start
    FROM pg_stat_activity activity
    WHERE activity.pid <> pg_backend_pid()
      AND activity.datname = current_database()
      AND activity.xact_start < NOW() - ($1::text || ' seconds')::interval
      AND (
        activity.query NOT ILIKE 'autovacuum:%'
        OR activity.query ILIKE '%to prevent wraparound%'
      )
) blocker
WHERE blocker.tables_with_locks IS NOT NULL
ORDER BY blocker.xact_start
"#;

#[derive(Debug, Deserialize)]
struct TransactionRow {
    pid: i32,
    database: String,
    current_query: Option<String>,
    state: Option<String>,
    transaction_age_secs: f64,
    tables_with_locks: Vec<LockRow>,
}

#[derive(Debug, Deserialize)]
struct LockRow {
    schema: String,
    name: String,
    mode: String,
}

/// A backend session whose open transaction holds table locks.
#[derive(Debug, Clone, PartialEq)]
pub struct LongRunningTransaction {
    pub pid: i32,
    pub database: String,
    pub current_query: String,
    pub state: Option<String>,
    pub transaction_age: Duration,
    /// Each entry carries the mode the session holds, not a requested one.
    pub tables_with_locks: Vec<TableReference>,
}

impl LongRunningTransaction {
    fn from_row(row: TransactionRow) -> Self {
        let tables_with_locks = row
            .tables_with_locks
            .into_iter()
            .map(|lock| {
                let mode = LockMode::parse(&lock.mode)
                    .map_err(|err| warn!("Ignoring lock mode reported by server: {err}"))
                    .ok();
                TableReference::new(lock.schema, lock.name, mode)
            })
            .collect();

        Self {
            pid: row.pid,
            database: row.database,
            current_query: row.current_query.unwrap_or_default(),
            state: row.state,
            transaction_age: Duration::from_secs_f64(row.transaction_age_secs.max(0.0)),
            tables_with_locks,
        }
    }

    /// One-line summary used in progress output.
    pub fn description(&self) -> String {
        let state = self.state.as_deref().unwrap_or("unknown");
        let query: String = self
            .current_query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "{} | pid {} | {} open | {} | {}",
            self.database,
            self.pid,
            format_duration(self.transaction_age),
            state,
            query
        )
    }

    /// Whether the session is building an index concurrently.
    pub fn concurrent_index_build(&self) -> bool {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"(?is)^\s*(?:create\s+(?:unique\s+)?index|reindex\b.*?)\s+concurrently\b")
                .expect("concurrent index pattern is valid")
        });
        pattern.is_match(&self.current_query)
    }

    /// Names (`schema.table`) of the relations this session holds locks on.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for table in &self.tables_with_locks {
            let name = table.qualified_name();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// True when the session holds a lock on one of `tables` that conflicts with `mode`.
    /// A held mode the server reported in an unknown spelling counts as conflicting.
    pub fn blocks(&self, tables: &TableCollection, mode: LockMode) -> bool {
        self.tables_with_locks.iter().any(|held| {
            tables.contains(held) && held.mode().is_none_or(|held_mode| held_mode.conflicts_with(mode))
        })
    }
}

/// Lists sessions whose transactions have been open longer than `min_age` and
/// that hold table locks in the current database.
pub fn find_blocking_transactions<S>(session: &mut S, min_age: Duration) -> Result<Vec<LongRunningTransaction>>
where
    S: DatabaseSession + ?Sized,
{
    let min_age_secs = format!("{:.3}", min_age.as_secs_f64());
    let rows = session.select_values(BLOCKING_TRANSACTIONS_SQL, &[&min_age_secs])?;

    let mut transactions = Vec::with_capacity(rows.len());
    for row in rows.into_iter().flatten() {
        let row: TransactionRow = serde_json::from_str(&row)?;
        transactions.push(LongRunningTransaction::from_row(row));
    }
    debug!(
        "Found {} transaction(s) open longer than {}",
        transactions.len(),
        format_duration(min_age)
    );
    Ok(transactions)
}

/// Like [`find_blocking_transactions`], keeping only sessions that would block
/// a `mode` lock on `tables`.
pub fn find_blocking_transactions_for<S>(
    session: &mut S,
    min_age: Duration,
    tables: &TableCollection,
    mode: LockMode,
) -> Result<Vec<LongRunningTransaction>>
where
    S: DatabaseSession + ?Sized,
{
    Ok(find_blocking_transactions(session, min_age)?
        .into_iter()
        .filter(|transaction| transaction.blocks(tables, mode))
        .collect())
}
