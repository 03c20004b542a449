use clap::Parser;
use log::LevelFilter;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Picture ledger node: anchors content hashes of pictures in a
/// proof-of-work hash chain and serves it over HTTP.
#[derive(Debug, Clone, Parser)]
#[command(name = "picture-ledger", version)]
pub struct Config {
    /// address the HTTP server listens on
    #[arg(long, env = "LEDGER_BIND", default_value = "127.0.0.1:5000")]
    pub bind: SocketAddr,

    /// directory of the ledger database
    #[arg(long, env = "LEDGER_DATA_DIR", default_value = "data/ledger")]
    pub data_dir: PathBuf,

    /// keep the chain in memory only, nothing survives a restart
    #[arg(long, env = "LEDGER_IN_MEMORY", conflicts_with = "data_dir")]
    pub in_memory: bool,

    /// threads hashing payloads in parallel mode (default: one per CPU)
    #[arg(long, env = "LEDGER_WORKERS")]
    pub workers: Option<usize>,

    /// split the proof of work search across the worker threads
    #[arg(long, env = "LEDGER_PARALLEL_MINING")]
    pub parallel_mining: bool,

    /// default log level, `RUST_LOG` takes precedence
    #[arg(long, env = "LEDGER_LOG", default_value = "info")]
    pub log_level: LevelFilter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["picture-ledger"]).unwrap();
        assert_eq!(config.bind, "127.0.0.1:5000".parse().unwrap());
        assert_eq!(config.data_dir, PathBuf::from("data/ledger"));
        assert!(!config.in_memory);
        assert_eq!(config.workers, None);
        assert!(!config.parallel_mining);
        assert_eq!(config.log_level, LevelFilter::Info);
    }

    #[test]
    fn test_flags() {
        let config = Config::try_parse_from([
            "picture-ledger",
            "--bind",
            "0.0.0.0:8080",
            "--in-memory",
            "--workers",
            "4",
            "--parallel-mining",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(config.bind.port(), 8080);
        assert!(config.in_memory);
        assert_eq!(config.workers, Some(4));
        assert!(config.parallel_mining);
        assert_eq!(config.log_level, LevelFilter::Debug);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::try_parse_from(["picture-ledger", "--workers", "many"]).is_err());
        assert!(Config::try_parse_from(["picture-ledger", "--bind", "nowhere"]).is_err());
    }
}
