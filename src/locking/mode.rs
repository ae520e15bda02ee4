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

use crate::error::{Result, TableLockError};
use std::fmt;
use std::str::FromStr;

/// One of PostgreSQL's eight table-level lock strengths.
///
/// Variants are declared in ascending strength, so `Ord` answers "is this lock
/// at least as strong as that one". Conflicts are a separate relation; see
/// [`LockMode::conflicts_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LockMode {
    AccessShare,
    RowShare,
    RowExclusive,
    ShareUpdateExclusive,
    Share,
    ShareRowExclusive,
    Exclusive,
    #[default]
    AccessExclusive,
}

impl LockMode {
    pub const ALL: [LockMode; 8] = [
        LockMode::AccessShare,
        LockMode::RowShare,
        LockMode::RowExclusive,
        LockMode::ShareUpdateExclusive,
        LockMode::Share,
        LockMode::ShareRowExclusive,
        LockMode::Exclusive,
        LockMode::AccessExclusive,
    ];

    /// Parses a mode, accepting `access_share`, `ACCESS SHARE`,
    /// `access_share_lock` and the `pg_locks` spelling `AccessShareLock`.
    pub fn parse(value: &str) -> Result<Self> {
        let mut normalized: String = value
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if let Some(stripped) = normalized.strip_suffix("lock") {
            normalized = stripped.to_string();
        }

        LockMode::ALL
            .into_iter()
            .find(|mode| mode.identifier().replace('_', "") == normalized)
            .ok_or_else(|| TableLockError::InvalidLockMode {
                value: value.to_string(),
                valid: LockMode::ALL
                    .iter()
                    .map(|mode| mode.identifier().to_string())
                    .collect(),
            })
    }

    pub fn identifier(&self) -> &'static str {
        match self {
            LockMode::AccessShare => "access_share",
            LockMode::RowShare => "row_share",
            LockMode::RowExclusive => "row_exclusive",
            LockMode::ShareUpdateExclusive => "share_update_exclusive",
            LockMode::Share => "share",
            LockMode::ShareRowExclusive => "share_row_exclusive",
            LockMode::Exclusive => "exclusive",
            LockMode::AccessExclusive => "access_exclusive",
        }
    }

    /// Keyword form used in `LOCK TABLE ... IN <mode> MODE`.
    pub fn to_sql(&self) -> String {
        self.identifier().replace('_', " ").to_uppercase()
    }

    /// Modes that cannot be held by another session at the same time as this one.
    pub fn conflicting_modes(&self) -> &'static [LockMode] {
        use LockMode::*;
        match self {
            AccessShare => &[AccessExclusive],
            RowShare => &[Exclusive, AccessExclusive],
            RowExclusive => &[Share, ShareRowExclusive, Exclusive, AccessExclusive],
            ShareUpdateExclusive => &[
                ShareUpdateExclusive,
                Share,
                ShareRowExclusive,
                Exclusive,
                AccessExclusive,
            ],
            Share => &[
                RowExclusive,
                ShareUpdateExclusive,
                ShareRowExclusive,
                Exclusive,
                AccessExclusive,
            ],
            ShareRowExclusive => &[
                RowExclusive,
                ShareUpdateExclusive,
                Share,
                ShareRowExclusive,
                Exclusive,
                AccessExclusive,
            ],
            Exclusive => &[
                RowShare,
                RowExclusive,
                ShareUpdateExclusive,
                Share,
                ShareRowExclusive,
                Exclusive,
                AccessExclusive,
            ],
            AccessExclusive => &LockMode::ALL,
        }
    }

    pub fn conflicts_with(&self, other: LockMode) -> bool {
        self.conflicting_modes().contains(&other)
    }
}

impl FromStr for LockMode {
    type Err = TableLockError;

    fn from_str(value: &str) -> Result<Self> {
        LockMode::parse(value)
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}
