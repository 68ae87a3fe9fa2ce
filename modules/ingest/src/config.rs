use std::env;
use std::time::Duration;

/// Application configuration parsed from environment variables.
///
/// Missing or unparseable required settings fail `from_env`, which aborts
/// startup; nothing here is recoverable at runtime.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub store_type: String,
    pub bus_type: String,
    pub nats_url: String,
    pub host: String,
    pub port: u16,
    pub db_pool_size: u32,
    pub processor_workers: usize,
    pub publish_max_attempts: u32,
    pub ack_timeout: Duration,
    pub drain_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let store_type = env::var("STORE_TYPE").unwrap_or_else(|_| "postgres".to_string());
        let database_url = env::var("DATABASE_URL").ok();

        if store_type == "postgres" && database_url.is_none() {
            return Err("DATABASE_URL must be set when STORE_TYPE=postgres".to_string());
        }

        let bus_type = env::var("BUS_TYPE").unwrap_or_else(|_| "nats".to_string());

        let nats_url =
            env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8090".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        let db_pool_size: u32 = env::var("DB_POOL_SIZE")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| "DB_POOL_SIZE must be a positive integer".to_string())?;

        let processor_workers: usize = env::var("PROCESSOR_WORKERS")
            .unwrap_or_else(|_| "4".to_string())
            .parse()
            .map_err(|_| "PROCESSOR_WORKERS must be a positive integer".to_string())?;
        if processor_workers == 0 {
            return Err("PROCESSOR_WORKERS must be at least 1".to_string());
        }

        let publish_max_attempts: u32 = env::var("PUBLISH_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|_| "PUBLISH_MAX_ATTEMPTS must be a positive integer".to_string())?;

        let ack_timeout_ms: u64 = env::var("ACK_TIMEOUT_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .map_err(|_| "ACK_TIMEOUT_MS must be a positive integer".to_string())?;

        let drain_timeout_secs: u64 = env::var("DRAIN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| "DRAIN_TIMEOUT_SECS must be a positive integer".to_string())?;

        Ok(Config {
            database_url,
            store_type,
            bus_type,
            nats_url,
            host,
            port,
            db_pool_size,
            processor_workers,
            publish_max_attempts,
            ack_timeout: Duration::from_millis(ack_timeout_ms),
            drain_timeout: Duration::from_secs(drain_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "STORE_TYPE",
            "DATABASE_URL",
            "BUS_TYPE",
            "NATS_URL",
            "HOST",
            "PORT",
            "DB_POOL_SIZE",
            "PROCESSOR_WORKERS",
            "PUBLISH_MAX_ATTEMPTS",
            "ACK_TIMEOUT_MS",
            "DRAIN_TIMEOUT_SECS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_postgres_store_requires_database_url() {
        clear_env();
        env::set_var("STORE_TYPE", "postgres");

        let err = Config::from_env().unwrap_err();
        assert!(err.contains("DATABASE_URL"));
    }

    #[test]
    #[serial]
    fn test_memory_store_needs_no_database() {
        clear_env();
        env::set_var("STORE_TYPE", "memory");

        let config = Config::from_env().unwrap();
        assert_eq!(config.store_type, "memory");
        assert_eq!(config.port, 8090);
        assert_eq!(config.processor_workers, 4);
    }

    #[test]
    #[serial]
    fn test_invalid_port_is_fatal() {
        clear_env();
        env::set_var("STORE_TYPE", "memory");
        env::set_var("PORT", "not-a-port");

        let err = Config::from_env().unwrap_err();
        assert!(err.contains("PORT"));
    }

    #[test]
    #[serial]
    fn test_zero_workers_rejected() {
        clear_env();
        env::set_var("STORE_TYPE", "memory");
        env::set_var("PROCESSOR_WORKERS", "0");

        let err = Config::from_env().unwrap_err();
        assert!(err.contains("PROCESSOR_WORKERS"));
    }
}
