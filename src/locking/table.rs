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
use log::debug;
use serde::Deserialize;
use std::fmt;
use std::hash::{Hash, Hasher};

const CURRENT_SCHEMA_SQL: &str = "SELECT current_schema()::text";

/// Descendants of a relation through `pg_inherits`, covering both declarative
/// partitions and legacy inheritance children, parents before children.
const DESCENDANTS_SQL: &str = r#"
WITH RECURSIVE descendants AS (
    SELECT inh.inhrelid AS oid, ARRAY[inh.inhrelid] AS path
    FROM pg_inherits inh
    WHERE inh.inhparent = (
        SELECT c.oid
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1::text AND c.relname = $2::text
    )
    UNION ALL
    SELECT inh.inhrelid, d.path || inh.inhrelid
    FROM pg_inherits inh
    JOIN descendants d ON inh.inhparent = d.oid
)
SELECT row_to_json(relation)::text
FROM (
    SELECT n.nspname AS schema, c.relname AS name, d.path
    FROM descendants d
    JOIN pg_class c ON c.oid = d.oid
    JOIN pg_namespace n ON n.oid = c.relnamespace
) relation
ORDER BY relation.path
"#;

#[derive(Debug, Deserialize)]
struct RelationRow {
    schema: String,
    name: String,
}

/// A schema-qualified relation, optionally carrying the lock mode requested for it.
///
/// Equality and hashing only consider the schema and name.
#[derive(Debug, Clone)]
pub struct TableReference {
    schema: String,
    name: String,
    mode: Option<LockMode>,
}

impl TableReference {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, mode: Option<LockMode>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            mode,
        }
    }

    /// Resolves `table` or `schema.table`; unqualified names use the session's
    /// `current_schema()`.
    pub fn from_table_name<S>(session: &mut S, value: &str, mode: Option<LockMode>) -> Result<Self>
    where
        S: DatabaseSession + ?Sized,
    {
        let (schema, name) = parse_qualified_name(value)?;
        let schema = match schema {
            Some(schema) => schema,
            None => session
                .select_value(CURRENT_SCHEMA_SQL, &[])?
                .ok_or_else(|| {
                    TableLockError::InvalidTableName(format!(
                        "{value} (no current schema is set)"
                    ))
                })?,
        };
        Ok(Self::new(schema, name, mode))
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Option<LockMode> {
        self.mode
    }

    pub fn with_mode(mut self, mode: Option<LockMode>) -> Self {
        self.mode = mode;
        self
    }

    /// `"schema"."table"`, safe to splice into SQL.
    pub fn fully_qualified_name(&self) -> String {
        format!("{}.{}", quote_identifier(&self.schema), quote_identifier(&self.name))
    }

    /// Unquoted `schema.table`, as the blocker scan reports it.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Every descendant of this relation, each inheriting this reference's mode.
    pub fn descendants<S>(&self, session: &mut S) -> Result<Vec<TableReference>>
    where
        S: DatabaseSession + ?Sized,
    {
        let rows = session.select_values(DESCENDANTS_SQL, &[&self.schema, &self.name])?;
        let mut children = Vec::with_capacity(rows.len());
        for row in rows.into_iter().flatten() {
            let relation: RelationRow = serde_json::from_str(&row)?;
            children.push(TableReference::new(relation.schema, relation.name, self.mode));
        }
        if !children.is_empty() {
            debug!(
                "Found {} descendant(s) of {}",
                children.len(),
                self.fully_qualified_name()
            );
        }
        Ok(children)
    }
}

impl PartialEq for TableReference {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema && self.name == other.name
    }
}

impl Eq for TableReference {}

impl Hash for TableReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.schema.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fully_qualified_name())
    }
}

pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Splits `schema.table` into its parts, honouring double-quoted identifiers.
/// Unquoted parts are folded to lower case the way the server folds them.
pub fn parse_qualified_name(value: &str) -> Result<(Option<String>, String)> {
    let invalid = || TableLockError::InvalidTableName(value.to_string());

    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut was_quoted = false;
    let mut chars = value.trim().chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    quoted = false;
                }
            }
            '"' => {
                if !current.is_empty() || was_quoted {
                    return Err(invalid());
                }
                quoted = true;
                was_quoted = true;
            }
            '.' if !quoted => {
                parts.push(finish_part(&current, was_quoted).ok_or_else(invalid)?);
                current.clear();
                was_quoted = false;
            }
            // Characters after a closing quote, e.g. `"a"b`.
            _ if !quoted && was_quoted => return Err(invalid()),
            c => current.push(c),
        }
    }

    if quoted {
        return Err(invalid());
    }
    parts.push(finish_part(&current, was_quoted).ok_or_else(invalid)?);

    match parts.len() {
        1 => Ok((None, parts.remove(0))),
        2 => {
            let name = parts.remove(1);
            Ok((Some(parts.remove(0)), name))
        }
        _ => Err(invalid()),
    }
}

fn finish_part(raw: &str, quoted: bool) -> Option<String> {
    if quoted {
        return (!raw.is_empty()).then(|| raw.to_string());
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return None;
    }
    Some(trimmed.to_lowercase())
}
