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

use crate::db::session::{DatabaseError, DatabaseErrorKind, DatabaseSession};
use log::{debug, trace};
use postgres::error::SqlState;
use postgres::types::ToSql;
use postgres::{Client, NoTls};

/// [`DatabaseSession`] backed by a blocking `postgres` client.
///
/// Transactions are tracked by depth: the outermost level uses `BEGIN`, inner
/// levels use numbered savepoints.
pub struct PostgresSession {
    client: Client,
    depth: usize,
}

impl PostgresSession {
    pub fn connect(url: &str) -> Result<Self, DatabaseError> {
        debug!("Connecting to database");
        let client = Client::connect(url, NoTls)?;
        Ok(Self::new(client))
    }

    pub fn new(client: Client) -> Self {
        Self { client, depth: 0 }
    }

    /// Wraps a client whose caller already issued `BEGIN`, so nested
    /// transactions start at the savepoint level.
    pub fn within_transaction(client: Client) -> Self {
        Self { client, depth: 1 }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn savepoint_name(depth: usize) -> String {
        format!("tablelock_savepoint_{depth}")
    }
}

impl DatabaseSession for PostgresSession {
    fn execute(&mut self, sql: &str) -> Result<(), DatabaseError> {
        trace!("execute: {sql}");
        self.client.batch_execute(sql)?;
        Ok(())
    }

    fn select_values(
        &mut self,
        sql: &str,
        params: &[&str],
    ) -> Result<Vec<Option<String>>, DatabaseError> {
        trace!("query: {sql} {params:?}");
        let bound: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|param| param as &(dyn ToSql + Sync))
            .collect();
        let rows = self.client.query(sql, &bound)?;
        rows.iter()
            .map(|row| row.try_get::<_, Option<String>>(0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::from)
    }

    fn begin_transaction(&mut self) -> Result<(), DatabaseError> {
        let sql = if self.depth == 0 {
            "BEGIN".to_string()
        } else {
            format!("SAVEPOINT {}", Self::savepoint_name(self.depth))
        };
        self.execute(&sql)?;
        self.depth += 1;
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), DatabaseError> {
        let sql = match self.depth {
            0 => {
                return Err(DatabaseError::new(
                    DatabaseErrorKind::Other,
                    None,
                    "commit requested without an open transaction",
                ));
            }
            1 => "COMMIT".to_string(),
            depth => format!("RELEASE SAVEPOINT {}", Self::savepoint_name(depth - 1)),
        };
        // The level is closed even when the statement fails; the server has
        // already discarded it in that case.
        self.depth -= 1;
        self.execute(&sql)
    }

    fn rollback_transaction(&mut self) -> Result<(), DatabaseError> {
        let sql = match self.depth {
            0 => {
                return Err(DatabaseError::new(
                    DatabaseErrorKind::Other,
                    None,
                    "rollback requested without an open transaction",
                ));
            }
            1 => "ROLLBACK".to_string(),
            depth => {
                let name = Self::savepoint_name(depth - 1);
                format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}")
            }
        };
        self.depth -= 1;
        self.execute(&sql)
    }
}

impl From<postgres::Error> for DatabaseError {
    fn from(err: postgres::Error) -> Self {
        let message = err
            .as_db_error()
            .map(|db| db.message().to_string())
            .unwrap_or_else(|| err.to_string());

        match err.code() {
            Some(code) if *code == SqlState::LOCK_NOT_AVAILABLE => DatabaseError::new(
                DatabaseErrorKind::LockNotAvailable,
                Some(code.code().to_string()),
                message,
            ),
            Some(code) if *code == SqlState::QUERY_CANCELED => DatabaseError::new(
                DatabaseErrorKind::QueryCanceled,
                Some(code.code().to_string()),
                message,
            ),
            Some(code) => DatabaseError::from_sqlstate(code.code(), message),
            None if err.is_closed() => {
                DatabaseError::new(DatabaseErrorKind::Connection, None, message)
            }
            None => DatabaseError::new(DatabaseErrorKind::Other, None, message),
        }
    }
}
