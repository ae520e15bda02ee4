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

use crate::db::DatabaseErrorKind;
use crate::error::TableLockError;
use std::fmt;

pub struct ErrorContext<'a> {
    pub error: &'a TableLockError,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl<'a> ErrorContext<'a> {
    pub fn new(error: &'a TableLockError) -> Self {
        let (suggestion, details) = match error {
            TableLockError::InvalidLockMode { .. } => {
                let suggestion = Some(
                    "Lock modes may be written as identifiers ('share_row_exclusive'), SQL \
                     keywords ('SHARE ROW EXCLUSIVE') or pg_locks names ('ShareRowExclusiveLock')."
                        .to_string(),
                );
                (suggestion, None)
            }
            TableLockError::InvalidTableName(name) => {
                let suggestion = Some(
                    "Table names must be 'table' or 'schema.table'; quote identifiers containing \
                     dots, e.g. '\"my.schema\".\"events\"'."
                        .to_string(),
                );
                let details = Some(format!("Could not parse: {name}"));
                (suggestion, details)
            }
            TableLockError::EmptyTableCollection => {
                let suggestion = Some("Pass at least one table name to lock.".to_string());
                (suggestion, None)
            }
            TableLockError::MixedLockModes { .. } => {
                let suggestion = Some(
                    "Acquire tables that need different lock modes in separate, non-nested calls."
                        .to_string(),
                );
                (suggestion, None)
            }
            TableLockError::NestedLock { requested, held } => {
                let suggestion = Some(
                    "Lock every table the migration needs in the outermost acquisition; nested \
                     acquisitions may only name tables that are already locked."
                        .to_string(),
                );
                let details = Some(format!("Requested {requested}, currently holding {held}."));
                (suggestion, details)
            }
            TableLockError::LockEscalation {
                held_mode,
                requested_mode,
                ..
            } => {
                let suggestion = Some(format!(
                    "Acquire the outer lock in {requested_mode} mode instead of {held_mode}; a \
                     nested request can never strengthen an existing lock."
                ));
                (suggestion, None)
            }
            TableLockError::Database(err) => {
                let suggestion = match err.kind() {
                    DatabaseErrorKind::Connection => Some(
                        "Check that the database is reachable and the connection URL is correct."
                            .to_string(),
                    ),
                    DatabaseErrorKind::LockNotAvailable | DatabaseErrorKind::QueryCanceled => {
                        Some(
                            "Another session is holding a conflicting lock. Run 'tablelock \
                             blockers' to list long-running transactions."
                                .to_string(),
                        )
                    }
                    DatabaseErrorKind::Other => None,
                };
                let details = err
                    .sqlstate()
                    .map(|code| format!("SQLSTATE {code}: {}", err.message()));
                (suggestion, details)
            }
            TableLockError::InvalidConfig(msg) | TableLockError::ConfigError(msg) => {
                let suggestion = Some(
                    "Check the config file and TABLELOCK_* environment variables, e.g. \
                     TABLELOCK_LOCKING__FAST_FAIL_TIMEOUT_MS=5000."
                        .to_string(),
                );
                let details = Some(format!("Configuration problem: {msg}"));
                (suggestion, details)
            }
            TableLockError::Json(err) => {
                let details = Some(format!("Unexpected row format from the server: {err}"));
                (None, details)
            }
        };

        Self {
            error,
            suggestion,
            details,
        }
    }

    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestion = Some(suggestion);
        self
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for ErrorContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\n\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}
