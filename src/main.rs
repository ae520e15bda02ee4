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


use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use tablelock::commands::blockers::BlockersCommand;
use tablelock::commands::lock::LockCommand;
use tablelock::config::TableLockConfig;
use tablelock::error::{Result, TableLockError, format_error_with_color, get_exit_code};
use tablelock::logging;

#[derive(Parser)]
#[command(name = "tablelock")]
#[command(author, version, about = "Acquire PostgreSQL table locks without stalling traffic", long_about = None)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (defaults to $TABLELOCK_HOME/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// PostgreSQL connection string, overriding database.url
    #[arg(long, value_name = "URL", global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List transactions holding table locks that would block a lock request
    #[command(visible_alias = "b")]
    Blockers {
        /// Only show transactions open at least this long (defaults to the fast-fail timeout)
        #[arg(long, value_name = "SECONDS")]
        min_age: Option<u64>,

        /// Only show transactions holding locks on these tables
        #[arg(long = "table", value_name = "NAME")]
        tables: Vec<String>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Lock tables and run statements while the lock is held
    #[command(long_about = "Lock tables and run statements while the lock is held

Waits for long-running transactions holding conflicting locks to finish, then
issues LOCK TABLE under a short timeout, retrying until the lock is granted.

Examples:
  tablelock lock users --sql 'ALTER TABLE users ADD COLUMN note text'
  tablelock lock events --mode share --lock-timeout 2s --sql 'CREATE TABLE ...'")]
    Lock {
        /// Tables to lock, as 'table' or 'schema.table'
        #[arg(required = true, value_name = "TABLE")]
        tables: Vec<String>,

        /// Lock mode (e.g. 'access_exclusive', 'SHARE ROW EXCLUSIVE')
        #[arg(long, value_name = "MODE")]
        mode: Option<String>,

        /// Fast-fail timeout for each lock attempt (e.g. 500, 500ms, 5s)
        #[arg(long, value_name = "TIMEOUT")]
        lock_timeout: Option<String>,

        /// Statement to run while the lock is held; repeat for several
        #[arg(long = "sql", value_name = "STATEMENT", required = true)]
        statements: Vec<String>,
    },
}

fn setup_logger(cli: &Cli) {
    logging::setup_logger(cli.verbose);
}

fn main() {
    let cli = Cli::parse();

    // Initialize logger based on CLI flags and environment
    setup_logger(&cli);

    // Load configuration once at startup
    let config = match TableLockConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => exit_with(&e),
    };

    let database_url = cli.database_url.as_deref();
    let result: Result<()> = (|| match &cli.command {
        Commands::Blockers {
            min_age,
            tables,
            json,
        } => {
            let command = BlockersCommand::new(&config)?;
            command.execute(database_url, *min_age, tables, *json)
        }
        Commands::Lock {
            tables,
            mode,
            lock_timeout,
            statements,
        } => {
            let command = LockCommand::new(&config)?;
            command.execute(
                database_url,
                tables,
                mode.as_deref(),
                lock_timeout.as_deref(),
                statements,
            )
        }
    })();

    if let Err(e) = result {
        exit_with(&e);
    }
}

fn exit_with(error: &TableLockError) -> ! {
    eprint!(
        "{}",
        format_error_with_color(error, std::io::stderr().is_terminal())
    );
    std::process::exit(get_exit_code(error));
}
