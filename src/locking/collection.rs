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

use crate::db::DatabaseSession;
use crate::error::{Result, TableLockError};
use crate::locking::mode::LockMode;
use crate::locking::table::TableReference;
use std::fmt;

/// Ordered, duplicate-free, non-empty set of tables that share one lock mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCollection {
    tables: Vec<TableReference>,
    mode: Option<LockMode>,
}

impl TableCollection {
    pub fn new<I>(tables: I) -> Result<Self>
    where
        I: IntoIterator<Item = TableReference>,
    {
        let tables: Vec<TableReference> = tables.into_iter().collect();
        let Some(first) = tables.first() else {
            return Err(TableLockError::EmptyTableCollection);
        };

        // Checked before deduplication so `foo` requested twice with different
        // modes is still rejected.
        let mode = first.mode();
        if tables.iter().any(|table| table.mode() != mode) {
            let mut modes: Vec<String> = Vec::new();
            for table in &tables {
                let label = table
                    .mode()
                    .map(|mode| mode.to_string())
                    .unwrap_or_else(|| "none".to_string());
                if !modes.contains(&label) {
                    modes.push(label);
                }
            }
            return Err(TableLockError::MixedLockModes { modes });
        }

        let mut unique: Vec<TableReference> = Vec::with_capacity(tables.len());
        for table in tables {
            if !unique.contains(&table) {
                unique.push(table);
            }
        }

        Ok(Self {
            tables: unique,
            mode,
        })
    }

    /// Resolves each name against the session and applies `mode` to all of them.
    pub fn from_table_names<S, N>(session: &mut S, names: &[N], mode: Option<LockMode>) -> Result<Self>
    where
        S: DatabaseSession + ?Sized,
        N: AsRef<str>,
    {
        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            tables.push(TableReference::from_table_name(session, name.as_ref(), mode)?);
        }
        Self::new(tables)
    }

    pub fn mode(&self) -> Option<LockMode> {
        self.mode
    }

    pub fn with_mode(self, mode: Option<LockMode>) -> Self {
        Self {
            tables: self
                .tables
                .into_iter()
                .map(|table| table.with_mode(mode))
                .collect(),
            mode,
        }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Always false; kept for the `len` convention.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableReference> {
        self.tables.iter()
    }

    pub fn contains(&self, table: &TableReference) -> bool {
        self.tables.contains(table)
    }

    /// Compares by schema and name only.
    pub fn is_subset_of(&self, other: &TableCollection) -> bool {
        self.tables.iter().all(|table| other.contains(table))
    }

    pub fn intersects(&self, other: &TableCollection) -> bool {
        self.tables.iter().any(|table| other.contains(table))
    }

    /// A new collection holding every member followed by its partition and
    /// inheritance descendants, all with this collection's mode.
    pub fn with_partitions<S>(&self, session: &mut S) -> Result<Self>
    where
        S: DatabaseSession + ?Sized,
    {
        let mut expanded = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            expanded.push(table.clone());
            expanded.extend(table.descendants(session)?);
        }
        Self::new(expanded)
    }

    /// Comma-joined fully-qualified names for `LOCK TABLE`, sorted so the same
    /// set always renders the same way.
    pub fn to_sql(&self) -> String {
        let mut names: Vec<String> = self
            .tables
            .iter()
            .map(TableReference::fully_qualified_name)
            .collect();
        names.sort();
        names.join(", ")
    }
}

impl<'a> IntoIterator for &'a TableCollection {
    type Item = &'a TableReference;
    type IntoIter = std::slice::Iter<'a, TableReference>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.iter()
    }
}

impl fmt::Display for TableCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}
