#![allow(dead_code)]

mod recording;

pub use recording::{RecordingSession, blocker_row, lock_timeout_error};
