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


use crate::config::TableLockConfig;
use crate::db::{DatabaseSession, PostgresSession};
use crate::error::Result;
use crate::locking::{
    ConsoleStatusSink, LockController, LockMode, LockStatusSink, LockTimeoutSource,
    StatusReporterObserver, format_duration,
};
use log::info;

pub struct LockCommand<'a> {
    config: &'a TableLockConfig,
}

impl<'a> LockCommand<'a> {
    pub fn new(config: &'a TableLockConfig) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn execute(
        &self,
        database_url: Option<&str>,
        tables: &[String],
        mode: Option<&str>,
        lock_timeout: Option<&str>,
        statements: &[String],
    ) -> Result<()> {
        let mode = parse_mode(mode)?;
        let url = self.config.database_url(database_url)?;
        let mut session = PostgresSession::connect(&url)?;
        self.run(
            &mut session,
            &ConsoleStatusSink,
            tables,
            mode,
            lock_timeout,
            statements,
        )
    }

    /// Locks `tables` and runs `statements` in order while the lock is held.
    /// Any failing statement rolls the whole block back.
    pub fn run<S>(
        &self,
        session: &mut S,
        sink: &dyn LockStatusSink,
        tables: &[String],
        mode: LockMode,
        lock_timeout: Option<&str>,
        statements: &[String],
    ) -> Result<()>
    where
        S: DatabaseSession + ?Sized,
    {
        let (settings, resolution) = self.config.resolve_lock_settings(lock_timeout)?;
        if resolution.source != LockTimeoutSource::Default {
            info!(
                "Using fast-fail timeout {} from {}",
                format_duration(resolution.value),
                resolution.source
            );
        }

        let observer = StatusReporterObserver::new(sink);
        let mut controller = LockController::new(session, settings).with_observer(&observer);
        let outcome = controller.acquire(tables, mode, |controller| -> Result<()> {
            for statement in statements {
                info!("Executing: {statement}");
                controller.session().execute(statement)?;
            }
            Ok(())
        });
        if let Err(err) = outcome {
            sink.error(&format!(
                "Aborted {} lock command; nothing was committed",
                mode.to_sql()
            ));
            return Err(err);
        }

        sink.success(&format!(
            "Ran {} statement(s) under {} lock",
            statements.len(),
            mode.to_sql()
        ));
        Ok(())
    }
}

/// `--mode` defaults to ACCESS EXCLUSIVE.
fn parse_mode(mode: Option<&str>) -> Result<LockMode> {
    Ok(mode.map(LockMode::parse).transpose()?.unwrap_or_default())
}
