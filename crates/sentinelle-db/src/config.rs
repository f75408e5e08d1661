use std::time::Duration;

use sentinelle_core::AppError;

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    /// - `DATABASE_ACQUIRE_TIMEOUT_SECS` (optional, defaults to 30)
    pub fn from_env() -> Result<Self, AppError> {
        let url = std::env::var("DATABASE_URL").map_err(|_| {
            AppError::ConfigError("DATABASE_URL not set. Required to run the pipeline.".into())
        })?;

        Ok(Self {
            url,
            max_connections: positive_var("DATABASE_MAX_CONNECTIONS", 5)?,
            acquire_timeout: Duration::from_secs(positive_var(
                "DATABASE_ACQUIRE_TIMEOUT_SECS",
                30,
            )?),
        })
    }
}

fn positive_var<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + PartialEq + From<u8>,
{
    let Ok(raw) = std::env::var(key) else {
        return Ok(default);
    };
    let parsed: T = raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!("Invalid {key} '{raw}': must be a positive integer"))
    })?;
    if parsed == T::from(0) {
        return Err(AppError::ConfigError(format!("{key} must be at least 1")));
    }
    Ok(parsed)
}
