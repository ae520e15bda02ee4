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


//! Table lock acquisition that never queues behind long-running transactions.

pub mod blocking;
pub mod collection;
pub mod controller;
pub mod mode;
pub mod scope;
pub mod table;
pub mod timeout;
pub mod wait_observer;

pub use blocking::{LongRunningTransaction, find_blocking_transactions, find_blocking_transactions_for};
pub use collection::TableCollection;
pub use controller::{LockController, lock_statement};
pub use mode::LockMode;
pub use scope::{LockContext, LockScope};
pub use table::{TableReference, parse_qualified_name, quote_identifier};
pub use timeout::{
    DEFAULT_FAST_FAIL_TIMEOUT, DEFAULT_RETRY_MULTIPLIER, LockSettings, LockTimeoutResolution,
    LockTimeoutResolver, LockTimeoutSource, TimeoutSetting, format_duration,
    parse_timeout_override,
};
pub use wait_observer::{
    ConsoleStatusSink, LockStatusSink, LockWaitObserver, NoopLockWaitObserver,
    StatusReporterObserver,
};
