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

//! Narrow capability interface over a live database session.
//!
//! The locking engine never talks to a driver directly. It only needs to run
//! statements, read single text columns and open nested transactions, so any
//! connection that can do those things can be locked through.

pub mod postgres;
pub mod session;

pub use self::postgres::PostgresSession;
pub use session::{DatabaseError, DatabaseErrorKind, DatabaseSession};
