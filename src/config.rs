use clap::Parser;
use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Node configuration: `PEER` (comma-separated gossip WebSocket URLs),
/// `PEER_HTTP` (single seed for bulk/pull sync), `PORT` (gossip listen),
/// `HTTP_PORT` (read API listen), plus the block-store path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub peers: Vec<String>,
    pub peer_http: Option<String>,
    pub port: u16,
    pub http_port: u16,
    pub db_path: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            peer_http: None,
            port: 8333,
            http_port: 3000,
            db_path: "./quanta_data".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let source = Config::builder().add_source(File::from(path.as_ref())).build()?;
        source.try_deserialize()
    }

    /// Load from `quanta.toml` if present, then layer environment
    /// variables and CLI flags on top, in that order.
    pub fn load_with_overrides(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = &cli.config {
            Self::from_file(path)?
        } else if Path::new("quanta.toml").exists() {
            Self::from_file("quanta.toml")?
        } else {
            Self::default()
        };

        if let Ok(peers) = std::env::var("PEER") {
            config.peers = split_peers(&peers);
        }
        if let Ok(peer_http) = std::env::var("PEER_HTTP") {
            config.peer_http = Some(peer_http);
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|v| v.parse().ok()) {
            config.port = port;
        }
        if let Some(http_port) = std::env::var("HTTP_PORT").ok().and_then(|v| v.parse().ok()) {
            config.http_port = http_port;
        }

        if let Some(peers) = &cli.peer {
            config.peers = split_peers(peers);
        }
        if let Some(peer_http) = &cli.peer_http {
            config.peer_http = Some(peer_http.clone());
        }
        if let Some(port) = cli.port {
            config.port = port;
        }
        if let Some(http_port) = cli.http_port {
            config.http_port = http_port;
        }
        if let Some(db) = &cli.db {
            config.db_path = db.clone();
        }

        Ok(config)
    }
}

fn split_peers(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

#[derive(Parser, Debug)]
#[command(name = "quanta")]
#[command(about = "QUANTA node: permissionless proof-of-work ledger with a native coin and user-mintable tokens")]
pub struct Cli {
    /// Configuration file path (defaults to ./quanta.toml if present)
    #[arg(short = 'c', long)]
    pub config: Option<String>,

    /// Comma-separated gossip WebSocket peer URLs (overrides PEER)
    #[arg(long)]
    pub peer: Option<String>,

    /// Seed peer's HTTP read API, used for bulk/pull sync (overrides PEER_HTTP)
    #[arg(long = "peer-http")]
    pub peer_http: Option<String>,

    /// Gossip listen port (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Read API listen port (overrides HTTP_PORT)
    #[arg(long = "http-port")]
    pub http_port: Option<u16>,

    /// Block store directory
    #[arg(short, long)]
    pub db: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_comma_separated_peers_and_trims_whitespace() {
        assert_eq!(split_peers("ws://a, ws://b ,ws://c"), vec!["ws://a", "ws://b", "ws://c"]);
        assert_eq!(split_peers(""), Vec::<String>::new());
    }
}
