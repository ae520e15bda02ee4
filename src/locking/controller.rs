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

use crate::db::{DatabaseError, DatabaseErrorKind, DatabaseSession};
use crate::error::{Result, TableLockError};
use crate::locking::blocking::{
    LongRunningTransaction, find_blocking_transactions, find_blocking_transactions_for,
};
use crate::locking::collection::TableCollection;
use crate::locking::mode::LockMode;
use crate::locking::scope::{LockContext, LockScope};
use crate::locking::timeout::{LockSettings, TimeoutSetting, format_duration};
use crate::locking::wait_observer::{LockWaitObserver, NoopLockWaitObserver};
use log::{debug, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

static NOOP_OBSERVER: NoopLockWaitObserver = NoopLockWaitObserver;

/// Outcome of a single `LOCK TABLE` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockAttempt {
    Acquired,
    TimedOut,
}

/// Renders the statement issued for every acquisition.
pub fn lock_statement(tables: &TableCollection, mode: LockMode) -> String {
    format!("LOCK TABLE {} IN {} MODE;", tables.to_sql(), mode.to_sql())
}

/// Acquires table locks on one database session without stalling other traffic.
///
/// Before each attempt the controller waits until no long-running transaction
/// holds a conflicting lock, then issues `LOCK TABLE` inside a sub-transaction
/// bounded by the fast-fail timeout. Timed-out attempts are rolled back and
/// retried after a backoff; there is no retry limit.
///
/// The controller also owns the stack of locked regions for its call chain:
/// work running under a lock may call [`LockController::acquire`] again, as
/// long as the nested request is covered by the enclosing lock.
pub struct LockController<'a, S: DatabaseSession + ?Sized> {
    session: &'a mut S,
    settings: LockSettings,
    observer: &'a dyn LockWaitObserver,
    context: LockContext,
    timeout_setting: Option<TimeoutSetting>,
}

impl<'a, S: DatabaseSession + ?Sized> LockController<'a, S> {
    pub fn new(session: &'a mut S, settings: LockSettings) -> Self {
        Self {
            session,
            settings,
            observer: &NOOP_OBSERVER,
            context: LockContext::new(),
            timeout_setting: None,
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn LockWaitObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// The session the locks are held on; work blocks run their statements here.
    pub fn session(&mut self) -> &mut S {
        self.session
    }

    pub fn context(&self) -> &LockContext {
        &self.context
    }

    /// Locks `tables` (plus their partitions) in `mode`, then runs `work` while
    /// the lock is held. Unqualified names resolve against `current_schema()`.
    pub fn acquire<N, T, E, F>(&mut self, tables: &[N], mode: LockMode, work: F) -> std::result::Result<T, E>
    where
        N: AsRef<str>,
        F: FnOnce(&mut Self) -> std::result::Result<T, E>,
        E: From<TableLockError>,
    {
        let requested = TableCollection::from_table_names(self.session, tables, Some(mode))?;
        self.acquire_collection(requested, mode, work)
    }

    /// Same as [`LockController::acquire`] for an already resolved collection.
    pub fn acquire_collection<T, E, F>(
        &mut self,
        tables: TableCollection,
        mode: LockMode,
        work: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Self) -> std::result::Result<T, E>,
        E: From<TableLockError>,
    {
        let requested = tables.with_mode(Some(mode));

        if let Some(held) = self.context.current() {
            held.check_nested(&requested, mode)?;
            debug!(
                "{} lock on {requested} is covered by enclosing {held}",
                mode.to_sql()
            );
            self.observer.on_reentrant(&requested, mode, held);
            // Partitions of the request stay covered for deeper nested calls.
            let covered = requested.with_partitions(self.session)?;
            return match self.run_in_scope(LockScope::reentrant(covered, mode), work) {
                Ok(result) => result,
                Err(payload) => panic::resume_unwind(payload),
            };
        }

        let started = Instant::now();
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            self.wait_for_blockers(&requested, mode)?;

            let expanded = requested.with_partitions(self.session)?;
            match self.try_lock(&expanded, mode)? {
                LockAttempt::TimedOut => {
                    let delay = self.settings.retry_delay();
                    warn!(
                        "Timed out acquiring {} lock on {expanded} (attempt {attempt}); retrying in {}",
                        mode.to_sql(),
                        format_duration(delay)
                    );
                    self.observer
                        .on_lock_timeout(&expanded, mode, attempt, delay);
                    thread::sleep(delay);
                }
                LockAttempt::Acquired => {
                    let waited = started.elapsed();
                    info!(
                        "Acquired {} lock on {expanded} after {} ({attempt} attempt(s))",
                        mode.to_sql(),
                        format_duration(waited)
                    );
                    self.observer.on_acquired(&expanded, mode, waited);
                    return self.run_locked(LockScope::acquired(expanded, mode), work);
                }
            }
        }
    }

    /// Sessions open longer than `min_age` that hold table locks.
    pub fn find_blocking_transactions(&mut self, min_age: Duration) -> Result<Vec<LongRunningTransaction>> {
        find_blocking_transactions(self.session, min_age)
    }

    /// Polls until no session old enough to matter holds a lock conflicting with
    /// `mode` on `tables` or any of their partitions.
    fn wait_for_blockers(&mut self, tables: &TableCollection, mode: LockMode) -> Result<()> {
        let mut poll = 0usize;
        loop {
            poll += 1;
            let expanded = tables.with_partitions(self.session)?;
            let blockers = find_blocking_transactions_for(
                self.session,
                self.settings.fast_fail_timeout(),
                &expanded,
                mode,
            )?;
            if blockers.is_empty() {
                debug!("No blocking transactions on {expanded} after {poll} check(s)");
                return Ok(());
            }

            info!(
                "{} transaction(s) blocking {} lock on {expanded}",
                blockers.len(),
                mode.to_sql()
            );
            for blocker in &blockers {
                info!("Blocking transaction: {}", blocker.description());
            }
            self.observer.on_blocked(&expanded, mode, &blockers, poll);
            thread::sleep(self.settings.poll_interval());
        }
    }

    /// Opens a sub-transaction and issues `LOCK TABLE` under the fast-fail timeout.
    /// On `Acquired` the sub-transaction is left open for the caller's work.
    fn try_lock(&mut self, tables: &TableCollection, mode: LockMode) -> Result<LockAttempt> {
        let setting = self.timeout_setting()?;
        self.session.begin_transaction()?;

        match self.lock_with_timeout(setting, tables, mode) {
            Ok(()) => Ok(LockAttempt::Acquired),
            Err(err) => {
                self.rollback_quietly();
                if is_fast_fail_timeout(setting, &err) {
                    debug!("Lock attempt on {tables} timed out: {err}");
                    Ok(LockAttempt::TimedOut)
                } else {
                    Err(err.into())
                }
            }
        }
    }

    fn lock_with_timeout(
        &mut self,
        setting: TimeoutSetting,
        tables: &TableCollection,
        mode: LockMode,
    ) -> std::result::Result<(), DatabaseError> {
        let previous = self.session.select_value(&setting.show_sql(), &[])?;
        self.session
            .execute(&setting.set_sql(self.settings.fast_fail_timeout()))?;
        self.session.execute(&lock_statement(tables, mode))?;
        // The work block runs under the caller's own timeout again.
        if let Some(previous) = previous {
            self.session.execute(&setting.restore_sql(&previous))?;
        }
        Ok(())
    }

    fn timeout_setting(&mut self) -> Result<TimeoutSetting> {
        if let Some(setting) = self.timeout_setting {
            return Ok(setting);
        }
        let setting = if self.session.supports_lock_timeout()? {
            TimeoutSetting::LockTimeout
        } else {
            info!("Server predates lock_timeout; bounding lock attempts with statement_timeout");
            TimeoutSetting::StatementTimeout
        };
        self.timeout_setting = Some(setting);
        Ok(setting)
    }

    /// Runs `work` inside the open sub-transaction, then commits it, or rolls it
    /// back when `work` fails or panics.
    fn run_locked<T, E, F>(&mut self, scope: LockScope, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Self) -> std::result::Result<T, E>,
        E: From<TableLockError>,
    {
        match self.run_in_scope(scope, work) {
            Ok(Ok(value)) => {
                self.session
                    .commit_transaction()
                    .map_err(TableLockError::from)?;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.rollback_quietly();
                Err(err)
            }
            Err(payload) => {
                self.rollback_quietly();
                panic::resume_unwind(payload)
            }
        }
    }

    /// Pushes `scope`, runs `work`, and pops the scope on every exit path.
    fn run_in_scope<T, E, F>(&mut self, scope: LockScope, work: F) -> thread::Result<std::result::Result<T, E>>
    where
        F: FnOnce(&mut Self) -> std::result::Result<T, E>,
    {
        self.context.push(scope);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&mut *self)));
        self.context.pop();
        outcome
    }

    fn rollback_quietly(&mut self) {
        if let Err(err) = self.session.rollback_transaction() {
            warn!("Failed to roll back lock transaction: {err}");
        }
    }
}

/// Only the error raised by the setting this controller configured counts as a
/// timeout; anything else, including a cancel under `lock_timeout`, is fatal.
fn is_fast_fail_timeout(setting: TimeoutSetting, err: &DatabaseError) -> bool {
    matches!(
        (setting, err.kind()),
        (TimeoutSetting::LockTimeout, DatabaseErrorKind::LockNotAvailable)
            | (TimeoutSetting::StatementTimeout, DatabaseErrorKind::QueryCanceled)
    )
}
