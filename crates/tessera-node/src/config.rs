use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tessera_core::{KeyPair, SecretKey};
use tessera_rounds::quorum::validate_threshold;
use tessera_rounds::synchronized::keys;
use tessera_rounds::SequenceConfig;
use tessera_state::PeriodData;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the consensus engine connects to
    pub abci_addr: SocketAddr,

    /// Status RPC bind address
    pub rpc_addr: SocketAddr,

    /// Node data directory
    pub data_dir: PathBuf,

    /// Log level, overridden by `RUST_LOG`
    pub log_level: String,

    /// Agent secret key (hex)
    pub agent_key: Option<String>,

    /// Initial shared state
    pub setup: SetupConfig,

    pub light_slash_unit_amount: u64,
    pub serious_slash_unit_amount: u64,
    pub slashing_enabled: bool,

    /// Rounds and periods kept when a new period starts
    pub cleanup_history_depth: usize,

    /// Values kept per key in the current period
    pub cleanup_history_depth_current: Option<usize>,

    /// Timeout of the estimation and reset rounds, in seconds
    pub round_timeout_secs: u64,

    /// Optional consensus engine run as a child process
    pub tendermint: Option<TendermintConfig>,
}

/// Values written to period 0 of the application database
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    /// Agent addresses
    pub participants: Vec<String>,

    /// Explicit threshold, otherwise the 2/3 default
    pub consensus_threshold: Option<usize>,

    /// Any other setup key
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TendermintConfig {
    pub binary: PathBuf,
    pub home: PathBuf,
    pub p2p_port: u16,
    pub rpc_port: u16,
    /// Seconds to wait after SIGTERM before killing
    pub stop_grace_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            abci_addr: SocketAddr::from(([127, 0, 0, 1], 26658)),
            rpc_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            data_dir: PathBuf::from("./tessera-data"),
            log_level: "info".to_string(),
            agent_key: None,
            setup: SetupConfig::default(),
            light_slash_unit_amount: 5_000_000_000_000_000,
            serious_slash_unit_amount: 8_000_000_000_000_000,
            slashing_enabled: true,
            cleanup_history_depth: 1,
            cleanup_history_depth_current: None,
            round_timeout_secs: 30,
            tendermint: None,
        }
    }
}

impl Default for TendermintConfig {
    fn default() -> Self {
        TendermintConfig {
            binary: PathBuf::from("tendermint"),
            home: PathBuf::from("./tessera-data/tendermint"),
            p2p_port: 26656,
            rpc_port: 26657,
            stop_grace_secs: 5,
        }
    }
}

impl NodeConfig {
    /// Load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations the application cannot start with
    pub fn validate(&self) -> Result<()> {
        let nb_participants = self.setup.participants.len();
        if nb_participants == 0 {
            bail!("setup.participants cannot be empty");
        }
        if let Some(threshold) = self.setup.consensus_threshold {
            validate_threshold(threshold, nb_participants)?;
        }
        if self.round_timeout_secs == 0 {
            bail!("round_timeout_secs must be positive");
        }
        self.agent_keypair()?;
        Ok(())
    }

    pub fn agent_keypair(&self) -> Result<Option<KeyPair>> {
        let Some(hex) = &self.agent_key else {
            return Ok(None);
        };
        let secret = SecretKey::from_hex(hex)?;
        Ok(Some(KeyPair::from_secret(secret)))
    }

    /// Period 0 of the application database
    pub fn setup_data(&self) -> PeriodData {
        let mut data: PeriodData = self
            .setup
            .extra
            .iter()
            .map(|(key, value)| (key.clone(), vec![value.clone()]))
            .collect();
        data.insert(
            keys::PARTICIPANTS.to_string(),
            vec![json!(self.setup.participants)],
        );
        data.insert(
            keys::ALL_PARTICIPANTS.to_string(),
            vec![json!(self.setup.participants)],
        );
        if let Some(threshold) = self.setup.consensus_threshold {
            data.insert(keys::CONSENSUS_THRESHOLD.to_string(), vec![json!(threshold)]);
        }
        data
    }

    pub fn sequence_config(&self) -> SequenceConfig {
        SequenceConfig {
            light_slash_unit_amount: self.light_slash_unit_amount,
            serious_slash_unit_amount: self.serious_slash_unit_amount,
            cleanup_history_depth: self.cleanup_history_depth,
            cleanup_history_depth_current: self.cleanup_history_depth_current,
            slashing_enabled: self.slashing_enabled,
        }
    }

    pub fn storage_path(&self) -> PathBuf {
        self.data_dir.join("state.bin")
    }
}

/// Generate a sample configuration with `agents` fresh agents, the first of
/// which is this node's agent
pub fn generate_sample_config(agents: usize) -> NodeConfig {
    let keypairs: Vec<KeyPair> = (0..agents.max(1)).map(|_| KeyPair::generate()).collect();

    NodeConfig {
        agent_key: keypairs.first().map(|k| k.secret.to_hex()),
        setup: SetupConfig {
            participants: keypairs.iter().map(KeyPair::address).collect(),
            consensus_threshold: None,
            extra: BTreeMap::new(),
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.cleanup_history_depth, 1);
        assert!(config.tendermint.is_none());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_config() {
        let config = generate_sample_config(4);
        assert_eq!(config.setup.participants.len(), 4);
        config.validate().unwrap();

        let agent = config.agent_keypair().unwrap().unwrap();
        assert_eq!(agent.address(), config.setup.participants[0]);
    }

    #[test]
    fn test_threshold_validation() {
        let mut config = generate_sample_config(4);
        config.setup.consensus_threshold = Some(2);
        assert!(config.validate().is_err());
        config.setup.consensus_threshold = Some(5);
        assert!(config.validate().is_err());
        config.setup.consensus_threshold = Some(4);
        config.validate().unwrap();
        assert_eq!(config.setup_data()[keys::CONSENSUS_THRESHOLD], vec![json!(4)]);
    }

    #[test]
    fn test_setup_extra_keys() {
        let raw = r#"{
            "setup": {
                "participants": ["a", "b"],
                "validator_to_agent": {"0a": "a"}
            }
        }"#;
        let config: NodeConfig = serde_json::from_str(raw).unwrap();
        let data = config.setup_data();
        assert_eq!(data[keys::VALIDATOR_TO_AGENT], vec![json!({"0a": "a"})]);
        assert_eq!(data[keys::PARTICIPANTS], vec![json!(["a", "b"])]);
        assert_eq!(config.round_timeout_secs, 30);
    }

    #[test]
    fn test_save_then_load() {
        let suffix: u64 = rand::thread_rng().gen();
        let dir = std::env::temp_dir().join(format!("tessera-config-{:016x}", suffix));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");

        let mut config = generate_sample_config(2);
        config.tendermint = Some(TendermintConfig::default());
        config.save(&path).unwrap();

        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded.setup.participants, config.setup.participants);
        assert_eq!(loaded.tendermint.unwrap().rpc_port, 26657);

        let _ = std::fs::remove_dir_all(dir);
    }
}
