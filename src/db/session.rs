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

use std::fmt;
use thiserror::Error;

/// Server version that introduced the `lock_timeout` setting.
pub const LOCK_TIMEOUT_MIN_SERVER_VERSION: u32 = 90_300;

/// Classification of a failed statement, derived from its SQLSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    /// 55P03: `lock_timeout` expired while waiting for a lock.
    LockNotAvailable,
    /// 57014: the statement was canceled, e.g. by `statement_timeout`.
    QueryCanceled,
    /// Class 08 or a connection that is already closed.
    Connection,
    Other,
}

impl DatabaseErrorKind {
    pub fn from_sqlstate(code: &str) -> Self {
        match code {
            "55P03" => DatabaseErrorKind::LockNotAvailable,
            "57014" => DatabaseErrorKind::QueryCanceled,
            code if code.starts_with("08") => DatabaseErrorKind::Connection,
            _ => DatabaseErrorKind::Other,
        }
    }
}

impl fmt::Display for DatabaseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DatabaseErrorKind::LockNotAvailable => "lock not available",
            DatabaseErrorKind::QueryCanceled => "query canceled",
            DatabaseErrorKind::Connection => "connection failure",
            DatabaseErrorKind::Other => "database error",
        };
        f.write_str(label)
    }
}

/// Error raised by a [`DatabaseSession`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct DatabaseError {
    kind: DatabaseErrorKind,
    sqlstate: Option<String>,
    message: String,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind, sqlstate: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            sqlstate,
            message: message.into(),
        }
    }

    /// Builds an error from a SQLSTATE code, classifying it on the way.
    pub fn from_sqlstate(code: &str, message: impl Into<String>) -> Self {
        Self::new(
            DatabaseErrorKind::from_sqlstate(code),
            Some(code.to_string()),
            message,
        )
    }

    pub fn kind(&self) -> DatabaseErrorKind {
        self.kind
    }

    pub fn sqlstate(&self) -> Option<&str> {
        self.sqlstate.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Operations the locking engine needs from a database connection.
///
/// Parameters are bound as text; statements cast them where another type is
/// needed (`$1::text::float8`). Every value read back is the first column of a
/// row rendered as text.
pub trait DatabaseSession {
    fn execute(&mut self, sql: &str) -> Result<(), DatabaseError>;

    fn select_values(
        &mut self,
        sql: &str,
        params: &[&str],
    ) -> Result<Vec<Option<String>>, DatabaseError>;

    fn select_value(&mut self, sql: &str, params: &[&str]) -> Result<Option<String>, DatabaseError> {
        Ok(self.select_values(sql, params)?.into_iter().next().flatten())
    }

    /// Opens a transaction, or a savepoint when one is already open.
    fn begin_transaction(&mut self) -> Result<(), DatabaseError>;

    /// Commits the innermost transaction or releases the innermost savepoint.
    fn commit_transaction(&mut self) -> Result<(), DatabaseError>;

    /// Rolls back the innermost transaction or savepoint.
    fn rollback_transaction(&mut self) -> Result<(), DatabaseError>;

    fn server_version_num(&mut self) -> Result<u32, DatabaseError> {
        let raw = self
            .select_value("SHOW server_version_num", &[])?
            .unwrap_or_default();
        raw.trim().parse::<u32>().map_err(|_| {
            DatabaseError::new(
                DatabaseErrorKind::Other,
                None,
                format!("Unexpected server_version_num '{raw}'"),
            )
        })
    }

    fn supports_lock_timeout(&mut self) -> Result<bool, DatabaseError> {
        Ok(self.server_version_num()? >= LOCK_TIMEOUT_MIN_SERVER_VERSION)
    }
}

impl<S: DatabaseSession + ?Sized> DatabaseSession for &mut S {
    fn execute(&mut self, sql: &str) -> Result<(), DatabaseError> {
        (**self).execute(sql)
    }

    fn select_values(
        &mut self,
        sql: &str,
        params: &[&str],
    ) -> Result<Vec<Option<String>>, DatabaseError> {
        (**self).select_values(sql, params)
    }

    fn begin_transaction(&mut self) -> Result<(), DatabaseError> {
        (**self).begin_transaction()
    }

    fn commit_transaction(&mut self) -> Result<(), DatabaseError> {
        (**self).commit_transaction()
    }

    fn rollback_transaction(&mut self) -> Result<(), DatabaseError> {
        (**self).rollback_transaction()
    }

    fn server_version_num(&mut self) -> Result<u32, DatabaseError> {
        (**self).server_version_num()
    }
}
