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
use crate::locking::collection::TableCollection;
use crate::locking::mode::LockMode;
use std::fmt;

/// A locked region currently executing: the tables and mode its work runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockScope {
    tables: TableCollection,
    mode: LockMode,
    reentrant: bool,
}

impl LockScope {
    /// Scope backed by a `LOCK TABLE` this session issued.
    pub fn acquired(tables: TableCollection, mode: LockMode) -> Self {
        Self {
            tables,
            mode,
            reentrant: false,
        }
    }

    /// Scope nested inside an enclosing lock; no statement was issued for it.
    pub fn reentrant(tables: TableCollection, mode: LockMode) -> Self {
        Self {
            tables,
            mode,
            reentrant: true,
        }
    }

    pub fn tables(&self) -> &TableCollection {
        &self.tables
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn is_reentrant(&self) -> bool {
        self.reentrant
    }

    /// Checks that a request made while this scope is active is already covered by it.
    pub fn check_nested(&self, requested: &TableCollection, mode: LockMode) -> Result<()> {
        if !requested.is_subset_of(&self.tables) {
            return Err(TableLockError::NestedLock {
                requested: requested.to_sql(),
                held: self.tables.to_sql(),
            });
        }
        if mode > self.mode {
            return Err(TableLockError::LockEscalation {
                tables: requested.to_sql(),
                held_mode: self.mode.to_sql(),
                requested_mode: mode.to_sql(),
            });
        }
        Ok(())
    }

    /// Human-readable label used for logging and error reporting.
    pub fn label(&self) -> String {
        format!("{} lock on {}", self.mode.to_sql(), self.tables)
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Stack of scopes entered by one call chain. The innermost scope is on top.
#[derive(Debug, Default)]
pub struct LockContext {
    scopes: Vec<LockScope>,
}

impl LockContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&LockScope> {
        self.scopes.last()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn push(&mut self, scope: LockScope) {
        self.scopes.push(scope);
    }

    pub fn pop(&mut self) -> Option<LockScope> {
        self.scopes.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::table::TableReference;

    fn tables(names: &[&str]) -> TableCollection {
        TableCollection::new(
            names
                .iter()
                .map(|name| TableReference::new("public", *name, None)),
        )
        .unwrap()
    }

    #[test]
    fn covered_request_with_weaker_or_equal_mode_is_allowed() {
        let scope = LockScope::acquired(tables(&["foo", "bar"]), LockMode::Exclusive);
        assert!(scope.check_nested(&tables(&["foo"]), LockMode::Share).is_ok());
        assert!(
            scope
                .check_nested(&tables(&["bar", "foo"]), LockMode::Exclusive)
                .is_ok()
        );
    }

    #[test]
    fn uncovered_request_is_a_nested_lock() {
        let scope = LockScope::acquired(tables(&["foo"]), LockMode::AccessExclusive);
        let err = scope
            .check_nested(&tables(&["foo", "bar"]), LockMode::AccessShare)
            .unwrap_err();
        match err {
            TableLockError::NestedLock { requested, held } => {
                assert_eq!(requested, r#""public"."bar", "public"."foo""#);
                assert_eq!(held, r#""public"."foo""#);
            }
            other => panic!("Expected nested lock error, got {other:?}"),
        }
    }

    #[test]
    fn escalation_only_for_strictly_stronger_modes() {
        for (i, held) in LockMode::ALL.iter().enumerate() {
            let scope = LockScope::acquired(tables(&["foo"]), *held);
            for (j, requested) in LockMode::ALL.iter().enumerate() {
                let result = scope.check_nested(&tables(&["foo"]), *requested);
                if j > i {
                    assert!(matches!(
                        result,
                        Err(TableLockError::LockEscalation { .. })
                    ));
                } else {
                    assert!(result.is_ok(), "{requested} under {held} rejected");
                }
            }
        }
    }

    #[test]
    fn context_is_a_stack() {
        let mut context = LockContext::new();
        assert!(context.current().is_none());

        context.push(LockScope::acquired(tables(&["foo"]), LockMode::Exclusive));
        context.push(LockScope::reentrant(tables(&["foo"]), LockMode::Share));
        assert_eq!(context.depth(), 2);
        assert!(context.current().unwrap().is_reentrant());
        assert_eq!(context.current().unwrap().mode(), LockMode::Share);

        context.pop();
        assert_eq!(context.current().unwrap().mode(), LockMode::Exclusive);
        context.pop();
        assert!(context.is_empty());
    }

    #[test]
    fn labels_are_human_readable() {
        let scope = LockScope::acquired(tables(&["foo"]), LockMode::ShareRowExclusive);
        assert_eq!(scope.label(), r#"SHARE ROW EXCLUSIVE lock on "public"."foo""#);
    }
}
