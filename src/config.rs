// Environment-driven configuration. Everything has a usable default so a
// bare `cargo run` starts an in-memory instance on port 3000.

use std::fmt::Display;
use std::str::FromStr;

use tracing::info;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// When unset, the server falls back to the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    /// Bootstrap demo users/posts/events at startup.
    pub seed_demo_data: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", 3000),
            database_url: std::env::var("DATABASE_URL").ok(),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 20),
            db_min_connections: env_or("DB_MIN_CONNECTIONS", 5),
            db_acquire_timeout_secs: env_or("DB_ACQUIRE_TIMEOUT_SECS", 8),
            seed_demo_data: env_or("SEED_DEMO_DATA", false),
        }
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Display + Copy,
{
    match std::env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            info!("Invalid {} value {:?}, using default {}", key, value, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_on_missing_and_invalid() {
        std::env::remove_var("SAINI_TEST_MISSING");
        assert_eq!(env_or("SAINI_TEST_MISSING", 42u32), 42);

        std::env::set_var("SAINI_TEST_INVALID", "not-a-number");
        assert_eq!(env_or("SAINI_TEST_INVALID", 7u16), 7);
        std::env::remove_var("SAINI_TEST_INVALID");
    }
}
