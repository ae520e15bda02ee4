use crate::error::TableLockError;

pub fn get_exit_code(error: &TableLockError) -> i32 {
    match error {
        TableLockError::InvalidLockMode { .. }
        | TableLockError::InvalidTableName(_)
        | TableLockError::EmptyTableCollection
        | TableLockError::MixedLockModes { .. } => 2,

        TableLockError::NestedLock { .. } | TableLockError::LockEscalation { .. } => 3,

        TableLockError::Database(_) => 20,

        TableLockError::InvalidConfig(_) | TableLockError::ConfigError(_) => 78, // EX_CONFIG

        _ => 1,
    }
}
