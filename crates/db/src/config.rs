use std::time::Duration;

use crate::id_strategy::IdRetrievalStrategy;
use crate::querier::QuerierConfig;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has an invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// The principal created by the migration bootstrap when it does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestUserConfig {
    pub username: String,
    pub hashed_password: String,
    /// Generated when absent.
    pub id: Option<String>,
}

/// Database configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub max_ping_attempts: u32,
    pub ping_interval: Duration,
    pub operation_timeout: Option<Duration>,
    pub id_strategy: IdRetrievalStrategy,
    pub run_migrations: bool,
    pub test_user: Option<TestUserConfig>,
}

impl DatabaseConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                           | Default     |
    /// |-----------------------------------|-------------|
    /// | `DATABASE_URL`                    | required    |
    /// | `DATABASE_MAX_CONNECTIONS`        | `20`        |
    /// | `DATABASE_MAX_PING_ATTEMPTS`      | `50`        |
    /// | `DATABASE_PING_INTERVAL_MS`       | `1000`      |
    /// | `DATABASE_OPERATION_TIMEOUT_SECS` | unset       |
    /// | `DATABASE_ID_STRATEGY`            | `returning` |
    /// | `DATABASE_RUN_MIGRATIONS`         | `true`      |
    /// | `TEST_USER_USERNAME`              | unset       |
    /// | `TEST_USER_HASHED_PASSWORD`       | unset       |
    /// | `TEST_USER_ID`                    | generated   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let max_connections = parse_or(&var, "DATABASE_MAX_CONNECTIONS", 20)?;
        let max_ping_attempts = parse_or(&var, "DATABASE_MAX_PING_ATTEMPTS", 50)?;
        let ping_interval = Duration::from_millis(parse_or(&var, "DATABASE_PING_INTERVAL_MS", 1000)?);
        let operation_timeout = match var("DATABASE_OPERATION_TIMEOUT_SECS") {
            Some(raw) => Some(Duration::from_secs(parse("DATABASE_OPERATION_TIMEOUT_SECS", &raw)?)),
            None => None,
        };
        let id_strategy = match var("DATABASE_ID_STRATEGY") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                var: "DATABASE_ID_STRATEGY",
                value: raw.clone(),
                reason,
            })?,
            None => IdRetrievalStrategy::default(),
        };
        let run_migrations = parse_or(&var, "DATABASE_RUN_MIGRATIONS", true)?;

        let test_user = match (var("TEST_USER_USERNAME"), var("TEST_USER_HASHED_PASSWORD")) {
            (Some(username), Some(hashed_password)) => Some(TestUserConfig {
                username,
                hashed_password,
                id: var("TEST_USER_ID"),
            }),
            (Some(_), None) => return Err(ConfigError::Missing("TEST_USER_HASHED_PASSWORD")),
            (None, _) => None,
        };

        Ok(Self {
            url,
            max_connections,
            max_ping_attempts,
            ping_interval,
            operation_timeout,
            id_strategy,
            run_migrations,
            test_user,
        })
    }

    pub fn querier_config(&self) -> QuerierConfig {
        QuerierConfig {
            id_strategy: self.id_strategy,
            ping_interval: self.ping_interval,
            operation_timeout: self.operation_timeout,
        }
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var: key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_or<T, F>(var: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => parse(key, &raw),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<DatabaseConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DatabaseConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_url_is_set() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/tenantry")]).unwrap();
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.max_ping_attempts, 50);
        assert_eq!(config.ping_interval, Duration::from_secs(1));
        assert_eq!(config.operation_timeout, None);
        assert_eq!(config.id_strategy, IdRetrievalStrategy::ReturningStatement);
        assert!(config.run_migrations);
        assert!(config.test_user.is_none());
    }

    #[test]
    fn missing_url_is_an_error() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db"),
            ("DATABASE_MAX_PING_ATTEMPTS", "3"),
            ("DATABASE_PING_INTERVAL_MS", "250"),
            ("DATABASE_OPERATION_TIMEOUT_SECS", "15"),
            ("DATABASE_ID_STRATEGY", "affected_rows"),
            ("DATABASE_RUN_MIGRATIONS", "false"),
            ("TEST_USER_USERNAME", "exampleuser"),
            ("TEST_USER_HASHED_PASSWORD", "$argon2id$hash"),
        ])
        .unwrap();

        assert_eq!(config.max_ping_attempts, 3);
        assert_eq!(config.ping_interval, Duration::from_millis(250));
        assert_eq!(config.operation_timeout, Some(Duration::from_secs(15)));
        assert_eq!(config.id_strategy, IdRetrievalStrategy::ExecAffectedRows);
        assert!(!config.run_migrations);

        let user = config.test_user.unwrap();
        assert_eq!(user.username, "exampleuser");
        assert_eq!(user.id, None);
    }

    #[test]
    fn malformed_numbers_name_the_variable() {
        let err = load(&[("DATABASE_URL", "postgres://db"), ("DATABASE_MAX_CONNECTIONS", "lots")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "DATABASE_MAX_CONNECTIONS", .. }));
    }

    #[test]
    fn test_user_requires_password() {
        let err = load(&[("DATABASE_URL", "postgres://db"), ("TEST_USER_USERNAME", "exampleuser")])
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing("TEST_USER_HASHED_PASSWORD"));
    }
}
