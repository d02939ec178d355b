use std::path::PathBuf;

use anyhow::Context;
use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::Deserialize;

const ENV_KEYS: &[&str] = &[
    "node_id",
    "raft_addr",
    "raft_data",
    "raft_leader",
    "grpc_addr",
    "http_addr",
    "mandi_addr",
];

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    node_id: Option<String>,
    raft_addr: Option<String>,
    raft_data: Option<PathBuf>,
    raft_leader: Option<bool>,
    grpc_addr: Option<String>,
    http_addr: Option<String>,
    mandi_addr: Option<String>,
}

/// Node configuration, loaded from a YAML file (path in `NODE_CONFIG`) with
/// environment variables overriding the file when both are present.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Stable identity, unique within the cluster.
    pub node_id: String,
    /// Consensus-transport bind address.
    pub raft_addr: String,
    /// Directory for consensus persistent state.
    pub raft_data: PathBuf,
    /// Bootstrap a new single-member cluster on first start.
    pub raft_leader: bool,
    /// Binary request-surface bind address.
    pub grpc_addr: String,
    /// Text request-surface bind address.
    pub http_addr: String,
    /// Discovery registry base URL.
    pub mandi_addr: String,
}

impl NodeConfig {
    pub fn load() -> anyhow::Result<Self> {
        let mut figment = Figment::new();
        if let Ok(path) = std::env::var("NODE_CONFIG") {
            if !path.is_empty() {
                figment = figment.merge(Yaml::file_exact(path.as_str()));
            }
        }
        let raw: RawConfig = figment
            .merge(Env::raw().only(ENV_KEYS))
            .extract()
            .context("failed to load configuration")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> anyhow::Result<Self> {
        let node_id = raw
            .node_id
            .filter(|v| !v.is_empty())
            .context("NODE_ID is required (set via environment or config file)")?;
        let raft_addr = raw
            .raft_addr
            .filter(|v| !v.is_empty())
            .context("RAFT_ADDR is required (set via environment or config file)")?;
        let grpc_addr = raw
            .grpc_addr
            .filter(|v| !v.is_empty())
            .context("GRPC_ADDR is required (set via environment or config file)")?;
        let http_addr = raw
            .http_addr
            .filter(|v| !v.is_empty())
            .context("HTTP_ADDR is required (set via environment or config file)")?;

        Ok(NodeConfig {
            raft_data: raw
                .raft_data
                .unwrap_or_else(|| PathBuf::from(format!("./pyaz/{node_id}"))),
            raft_leader: raw.raft_leader.unwrap_or(false),
            mandi_addr: raw
                .mandi_addr
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "http://127.0.0.1:7000".to_string()),
            node_id,
            raft_addr,
            grpc_addr,
            http_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_from_environment() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("NODE_ID", "n1");
            jail.set_env("RAFT_ADDR", "127.0.0.1:12000");
            jail.set_env("GRPC_ADDR", ":50051");
            jail.set_env("HTTP_ADDR", ":8080");
            jail.set_env("RAFT_LEADER", "true");

            let cfg = NodeConfig::load().unwrap();
            assert_eq!(cfg.node_id, "n1");
            assert!(cfg.raft_leader);
            assert_eq!(cfg.raft_data, PathBuf::from("./pyaz/n1"));
            assert_eq!(cfg.mandi_addr, "http://127.0.0.1:7000");
            Ok(())
        });
    }

    #[test]
    fn yaml_file_with_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "node.yaml",
                r#"
node_id: n2
raft_addr: 127.0.0.1:12001
grpc_addr: ":50052"
http_addr: ":8081"
mandi_addr: http://mandi:7000
"#,
            )?;
            jail.set_env("NODE_CONFIG", "node.yaml");
            // Environment wins over the file.
            jail.set_env("HTTP_ADDR", ":9999");

            let cfg = NodeConfig::load().unwrap();
            assert_eq!(cfg.node_id, "n2");
            assert_eq!(cfg.http_addr, ":9999");
            assert_eq!(cfg.mandi_addr, "http://mandi:7000");
            assert!(!cfg.raft_leader);
            Ok(())
        });
    }

    #[test]
    fn missing_required_field_is_an_error() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("NODE_ID", "n1");
            jail.set_env("RAFT_ADDR", "127.0.0.1:12000");
            // GRPC_ADDR and HTTP_ADDR missing.
            let err = NodeConfig::load().unwrap_err();
            assert!(err.to_string().contains("GRPC_ADDR is required"));
            Ok(())
        });
    }

    #[test]
    fn explicit_missing_config_file_is_an_error() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("NODE_CONFIG", "does-not-exist.yaml");
            jail.set_env("NODE_ID", "n1");
            jail.set_env("RAFT_ADDR", "127.0.0.1:12000");
            jail.set_env("GRPC_ADDR", ":50051");
            jail.set_env("HTTP_ADDR", ":8080");
            assert!(NodeConfig::load().is_err());
            Ok(())
        });
    }
}
