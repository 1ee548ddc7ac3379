use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Server settings. Every flag can also come from a `LODGE_*` variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "lodge", version, about = "Cabin reservation server speaking the Postgres wire protocol")]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "LODGE_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    #[arg(long, env = "LODGE_PORT", default_value_t = 5433)]
    pub port: u16,

    /// Directory holding the write-ahead log
    #[arg(long, env = "LODGE_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "LODGE_USER", default_value = "admin")]
    pub user: String,

    #[arg(long, env = "LODGE_PASSWORD", default_value = "lodge", hide_env_values = true)]
    pub password: String,

    /// Connections beyond this are closed on accept
    #[arg(long, env = "LODGE_MAX_CONNECTIONS", default_value_t = 256)]
    pub max_connections: usize,

    /// Appends since the last compaction that trigger a WAL rewrite
    #[arg(long, env = "LODGE_COMPACT_THRESHOLD", default_value_t = 1000)]
    pub compact_threshold: u64,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "LODGE_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "LODGE_LOG", default_value = "info")]
    pub log: String,
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("lodge.wal")
    }

    pub fn compact_period(&self) -> Duration {
        Duration::from_secs(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["lodge"]).unwrap();
        assert_eq!(config.port, 5433);
        assert_eq!(config.user, "admin");
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.metrics_port, None);
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "lodge",
            "--bind",
            "127.0.0.1",
            "--port",
            "6000",
            "--data-dir",
            "/var/lib/lodge",
            "--metrics-port",
            "9000",
        ])
        .unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:6000");
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/lodge/lodge.wal"));
        assert_eq!(config.metrics_port, Some(9000));
    }

    #[test]
    fn rejects_bad_port() {
        assert!(Config::try_parse_from(["lodge", "--port", "seventy"]).is_err());
    }
}
