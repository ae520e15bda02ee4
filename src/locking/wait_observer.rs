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

//! Observer interfaces for lock wait instrumentation.
//!
//! Lock wait observers decouple the `LockController` from user-facing feedback
//! so an operator can tell "waiting for a known blocker" apart from "retrying
//! after a timed-out attempt" without the controller printing anything itself.

use crate::locking::blocking::LongRunningTransaction;
use crate::locking::collection::TableCollection;
use crate::locking::mode::LockMode;
use crate::locking::scope::LockScope;
use crate::locking::timeout::format_duration;
use colored::Colorize;
use std::time::Duration;

/// Observer hooks for lock wait events.
pub trait LockWaitObserver {
    /// Conflicting sessions were found; the controller sleeps one poll interval next.
    fn on_blocked(
        &self,
        _tables: &TableCollection,
        _mode: LockMode,
        _blockers: &[LongRunningTransaction],
        _poll: usize,
    ) {
    }

    /// A `LOCK TABLE` attempt hit the fast-fail timeout and will be retried after `retry_in`.
    fn on_lock_timeout(
        &self,
        _tables: &TableCollection,
        _mode: LockMode,
        _attempt: usize,
        _retry_in: Duration,
    ) {
    }

    fn on_acquired(&self, _tables: &TableCollection, _mode: LockMode, _waited: Duration) {}

    /// A nested request was satisfied by an enclosing lock.
    fn on_reentrant(&self, _requested: &TableCollection, _mode: LockMode, _held: &LockScope) {}
}

/// Observer implementation that performs no work.
#[derive(Debug, Default)]
pub struct NoopLockWaitObserver;

impl LockWaitObserver for NoopLockWaitObserver {}

/// Sink used by [`StatusReporterObserver`] to surface wait-state progress.
pub trait LockStatusSink {
    fn step(&self, message: &str);
    fn success(&self, message: &str);
    fn error(&self, message: &str);
}

/// Prints progress lines to the terminal.
#[derive(Debug, Default)]
pub struct ConsoleStatusSink;

impl LockStatusSink for ConsoleStatusSink {
    fn step(&self, message: &str) {
        println!("{message}");
    }

    fn success(&self, message: &str) {
        println!("{} {message}", "✓".green());
    }

    fn error(&self, message: &str) {
        eprintln!("{} {message}", "✗".red());
    }
}

/// Renders lock wait events as human-readable lines on a [`LockStatusSink`].
pub struct StatusReporterObserver<'a> {
    reporter: &'a dyn LockStatusSink,
}

impl<'a> StatusReporterObserver<'a> {
    pub fn new(reporter: &'a dyn LockStatusSink) -> Self {
        Self { reporter }
    }
}

impl LockWaitObserver for StatusReporterObserver<'_> {
    fn on_blocked(
        &self,
        tables: &TableCollection,
        mode: LockMode,
        blockers: &[LongRunningTransaction],
        poll: usize,
    ) {
        let mode_label = mode.to_sql();
        self.reporter.step(&format!(
            "Waiting on blocking transactions before acquiring {mode_label} lock on {tables} \
             (check {poll}):"
        ));
        for blocker in blockers {
            let mut line = format!("  {}", blocker.description());
            if blocker.concurrent_index_build() {
                line.push_str(" [concurrent index build, may take a long time]");
            }
            self.reporter.step(&line);
        }
    }

    fn on_lock_timeout(
        &self,
        tables: &TableCollection,
        mode: LockMode,
        attempt: usize,
        retry_in: Duration,
    ) {
        let mode_label = mode.to_sql();
        let retry_label = format_duration(retry_in);
        self.reporter.step(&format!(
            "Timed out trying to acquire {mode_label} lock on {tables} (attempt {attempt})."
        ));
        self.reporter.step(&format!(
            "Sleeping for {retry_label} to allow potentially queued up queries to finish before \
             continuing."
        ));
    }

    fn on_acquired(&self, tables: &TableCollection, mode: LockMode, waited: Duration) {
        let mode_label = mode.to_sql();
        let waited_label = format_duration(waited);
        self.reporter.success(&format!(
            "Acquired {mode_label} lock on {tables} after {waited_label}"
        ));
    }
}
