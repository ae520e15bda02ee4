use crate::error::{Result, TableLockError};
use crate::locking::{
    DEFAULT_FAST_FAIL_TIMEOUT, DEFAULT_RETRY_MULTIPLIER, LockSettings, LockTimeoutResolution,
    LockTimeoutResolver,
};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_PREFIX: &str = "TABLELOCK";
const HOME_ENV: &str = "TABLELOCK_HOME";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TableLockConfig {
    #[serde(default)]
    pub locking: LockingConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingConfig {
    #[serde(default = "default_fast_fail_timeout_ms")]
    pub fast_fail_timeout_ms: u64,

    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: u32,

    /// Pause between blocker scans; the fast-fail timeout when unset.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            fast_fail_timeout_ms: default_fast_fail_timeout_ms(),
            retry_multiplier: default_retry_multiplier(),
            poll_interval_ms: None,
        }
    }
}

fn default_fast_fail_timeout_ms() -> u64 {
    DEFAULT_FAST_FAIL_TIMEOUT.as_millis() as u64
}

fn default_retry_multiplier() -> u32 {
    DEFAULT_RETRY_MULTIPLIER
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
}

impl LockingConfig {
    pub fn fast_fail_timeout(&self) -> Duration {
        Duration::from_millis(self.fast_fail_timeout_ms)
    }
}

impl TableLockConfig {
    /// Loads defaults, then the config file, then `TABLELOCK_*` variables
    /// (`TABLELOCK_LOCKING__RETRY_MULTIPLIER=3`).
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (config_path, required) = match path {
            Some(path) => (Some(path.to_path_buf()), true),
            None => (default_config_path(), false),
        };

        let mut builder = Config::builder();
        if let Some(config_path) = &config_path {
            log::debug!("Reading config from {config_path:?} (required: {required})");
            builder = builder.add_source(
                File::from(config_path.as_path())
                    .format(FileFormat::Toml)
                    .required(required),
            );
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: TableLockConfig = config.try_deserialize()?;
        // Surface invalid values at startup rather than on first lock.
        config.lock_settings()?;
        Ok(config)
    }

    pub fn lock_settings(&self) -> Result<LockSettings> {
        self.lock_settings_with(self.locking.fast_fail_timeout())
    }

    /// Settings with the fast-fail timeout taken from `--lock-timeout` when given.
    pub fn resolve_lock_settings(
        &self,
        cli_override: Option<&str>,
    ) -> Result<(LockSettings, LockTimeoutResolution)> {
        let resolution = LockTimeoutResolver::new(
            cli_override,
            self.locking.fast_fail_timeout(),
            DEFAULT_FAST_FAIL_TIMEOUT,
        )
        .resolve()?;
        let settings = self.lock_settings_with(resolution.value)?;
        Ok((settings, resolution))
    }

    fn lock_settings_with(&self, fast_fail_timeout: Duration) -> Result<LockSettings> {
        let settings = LockSettings::new(fast_fail_timeout, self.locking.retry_multiplier)?;
        match self.locking.poll_interval_ms {
            Some(0) => Err(TableLockError::InvalidConfig(
                "locking.poll_interval_ms must be greater than zero".to_string(),
            )),
            Some(ms) => Ok(settings.with_poll_interval(Duration::from_millis(ms))),
            None => Ok(settings),
        }
    }

    /// `--database-url` wins over `database.url`.
    pub fn database_url(&self, cli_override: Option<&str>) -> Result<String> {
        cli_override
            .map(str::to_string)
            .or_else(|| self.database.url.clone())
            .ok_or_else(|| {
                TableLockError::InvalidConfig(
                    "no database URL; pass --database-url or set TABLELOCK_DATABASE__URL"
                        .to_string(),
                )
            })
    }
}

fn default_config_path() -> Option<PathBuf> {
    if let Ok(home) = env::var(HOME_ENV)
        && !home.is_empty()
    {
        return Some(PathBuf::from(home).join(CONFIG_FILE_NAME));
    }
    dirs::config_dir().map(|dir| dir.join("tablelock").join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::LockTimeoutSource;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    struct EnvGuard(Vec<&'static str>);

    impl EnvGuard {
        fn set(vars: &[(&'static str, &str)]) -> Self {
            for (key, value) in vars {
                unsafe {
                    env::set_var(key, value);
                }
            }
            Self(vars.iter().map(|(key, _)| *key).collect())
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for key in &self.0 {
                unsafe {
                    env::remove_var(key);
                }
            }
        }
    }

    fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = TableLockConfig::default();
        assert_eq!(config.locking.fast_fail_timeout_ms, 5000);
        assert_eq!(config.locking.retry_multiplier, 5);
        assert_eq!(config.database.url, None);

        let settings = config.lock_settings().unwrap();
        assert_eq!(settings.retry_delay(), Duration::from_secs(25));
        assert_eq!(settings.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn test_missing_default_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let _env = EnvGuard::set(&[(HOME_ENV, temp_dir.path().to_str().unwrap())]);

        let config = TableLockConfig::load(None).unwrap();
        assert_eq!(config.locking.fast_fail_timeout_ms, 5000);
    }

    #[test]
    #[serial]
    fn test_explicit_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope.toml");

        let err = TableLockConfig::load(Some(&missing)).unwrap_err();
        assert!(matches!(err, TableLockError::ConfigError(_)));
    }

    #[test]
    #[serial]
    fn test_partial_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            r#"
[locking]
retry_multiplier = 2
poll_interval_ms = 250
"#,
        );

        let config = TableLockConfig::load(Some(&path)).unwrap();
        assert_eq!(config.locking.fast_fail_timeout_ms, 5000);
        let settings = config.lock_settings().unwrap();
        assert_eq!(settings.retry_delay(), Duration::from_secs(10));
        assert_eq!(settings.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    #[serial]
    fn test_home_directory_config() {
        let temp_dir = TempDir::new().unwrap();
        write_config(
            &temp_dir,
            r#"
[database]
url = "postgres://app@localhost/app"
"#,
        );
        let _env = EnvGuard::set(&[(HOME_ENV, temp_dir.path().to_str().unwrap())]);

        let config = TableLockConfig::load(None).unwrap();
        assert_eq!(
            config.database_url(None).unwrap(),
            "postgres://app@localhost/app"
        );
        assert_eq!(
            config.database_url(Some("postgres://other/db")).unwrap(),
            "postgres://other/db"
        );
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(&temp_dir, "[locking]\nfast_fail_timeout_ms = 1000\n");
        let _env = EnvGuard::set(&[("TABLELOCK_LOCKING__FAST_FAIL_TIMEOUT_MS", "750")]);

        let config = TableLockConfig::load(Some(&path)).unwrap();
        assert_eq!(config.locking.fast_fail_timeout_ms, 750);
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(&temp_dir, "[locking]\nretry_multiplier = 0\n");
        let err = TableLockConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, TableLockError::InvalidConfig(_)));

        let path = write_config(&temp_dir, "[locking]\npoll_interval_ms = 0\n");
        let err = TableLockConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, TableLockError::InvalidConfig(_)));
    }

    #[test]
    fn test_missing_database_url() {
        let err = TableLockConfig::default().database_url(None).unwrap_err();
        assert!(err.to_string().contains("--database-url"));
    }

    #[test]
    fn test_cli_timeout_wins() {
        let mut config = TableLockConfig::default();
        config.locking.fast_fail_timeout_ms = 2000;

        let (settings, resolution) = config.resolve_lock_settings(Some("300ms")).unwrap();
        assert_eq!(settings.fast_fail_timeout(), Duration::from_millis(300));
        assert_eq!(resolution.source, LockTimeoutSource::Cli);

        let (settings, resolution) = config.resolve_lock_settings(None).unwrap();
        assert_eq!(settings.fast_fail_timeout(), Duration::from_secs(2));
        assert_eq!(resolution.source, LockTimeoutSource::Config);
    }
}
