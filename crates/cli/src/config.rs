//! Relay configuration.
//!
//! Loaded in priority order (highest first):
//!
//! 1. `--network` on the command line
//! 2. `RELAY_*` environment variables (e.g. `RELAY_VERIFIER_URL`,
//!    `RELAY_PROOF_POLL__MAX_ATTEMPTS`)
//! 3. Legacy variables `JQ_VERIFIER_URL_TESTNET`, `JQ_VERIFIER_API_KEY_TESTNET`,
//!    `COSTON2_DA_LAYER_URL`, `PRIVATE_KEY`
//! 4. The configuration file (`reputation-relay.toml` or `--config <path>`)
//! 5. Built-in defaults
//!
//! Endpoints, credentials, and contract addresses have no defaults. A run
//! refuses to start while any of them is missing. The chain id defaults from
//! the network name for the known Flare networks.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use ledger::LedgerConfig;
use pipeline::{AttestationRequestBody, AttestationType, ContractAddress, PollPolicy, SourceId};
use runner::WorkflowDefinition;
use serde::{Deserialize, Serialize};
use snapshot::SnapshotSourceConfig;
use verifier::{DaLayerConfig, VerifierConfig};

pub const CONFIG_FILE: &str = "reputation-relay.toml";
const ENV_PREFIX: &str = "RELAY_";

/// Legacy variable names and the fields they populate.
const LEGACY_ENV: [(&str, &str); 4] = [
    ("JQ_VERIFIER_URL_TESTNET", "verifier_url"),
    ("JQ_VERIFIER_API_KEY_TESTNET", "verifier_api_key"),
    ("COSTON2_DA_LAYER_URL", "da_layer_url"),
    ("PRIVATE_KEY", "sender_private_key"),
];

/// EIP-155 chain ids of the networks the relay knows by name.
const KNOWN_CHAINS: [(&str, u64); 4] = [
    ("flare", 14),
    ("coston", 16),
    ("songbird", 19),
    ("coston2", 114),
];

const DEFAULT_POSTPROCESS_JQ: &str = ".activities | to_entries | map({ activityId: .key, \
     weatherCode: .value.weatherCode, participants: .value.participants })";

const DEFAULT_ABI_SIGNATURE: &str = r#"{
  "components": [
    { "internalType": "string", "name": "activityId", "type": "string" },
    { "internalType": "uint256", "name": "weatherCode", "type": "uint256" },
    {
      "internalType": "struct Participant[]",
      "name": "participants",
      "type": "tuple[]",
      "components": [
        { "internalType": "string", "name": "uuid", "type": "string" },
        { "internalType": "bool", "name": "checkedIn", "type": "bool" }
      ]
    }
  ],
  "name": "activities",
  "type": "tuple[]"
}"#;

/// How the gateway starts a workflow run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LaunchMode {
    /// Spawn `reputation-relay run` as a child process.
    #[default]
    Subprocess,
    /// Run the workflow on the gateway's own runtime.
    InProcess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    // Gateway
    /// Network name passed to launched runs and used in log fields.
    #[serde(default = "default_network")]
    pub network: String,
    /// Gateway bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Gateway bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub launch_mode: LaunchMode,
    /// Program launched per trigger in subprocess mode. Defaults to the
    /// running executable.
    #[serde(default)]
    pub workflow_program: Option<PathBuf>,
    /// Seconds to wait for an in-flight run when the gateway shuts down.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    // Snapshot source
    #[serde(default)]
    pub snapshot_url: Option<String>,
    #[serde(default)]
    pub mark_processed_url: Option<String>,

    // Verifier
    #[serde(default)]
    pub verifier_url: Option<String>,
    #[serde(default)]
    pub verifier_api_key: Option<String>,
    /// Path segment between the verifier base URL and `prepareRequest`.
    #[serde(default = "default_verifier_path")]
    pub verifier_path: String,
    #[serde(default = "default_attestation_type")]
    pub attestation_type: String,
    #[serde(default = "default_source_id")]
    pub source_id: String,
    #[serde(default = "default_postprocess_jq")]
    pub postprocess_jq: String,
    #[serde(default = "default_abi_signature")]
    pub abi_signature: String,

    // Data-availability layer
    #[serde(default)]
    pub da_layer_url: Option<String>,
    #[serde(default)]
    pub da_layer_api_key: Option<String>,

    // Ledger
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// Hex private key of the account that signs and pays for transactions.
    #[serde(default)]
    pub sender_private_key: Option<String>,
    /// Overrides the chain id implied by `network`.
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub hub_address: Option<String>,
    #[serde(default)]
    pub fee_config_address: Option<String>,
    #[serde(default)]
    pub relay_address: Option<String>,
    #[serde(default)]
    pub systems_manager_address: Option<String>,
    #[serde(default)]
    pub destination_address: Option<String>,
    #[serde(default = "default_protocol_id")]
    pub protocol_id: u64,

    // Timing
    /// Per-request timeout for every outbound HTTP call, in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_finalization_poll")]
    pub finalization_poll: PollSettings,
    #[serde(default = "default_proof_poll")]
    pub proof_poll: PollSettings,
    #[serde(default = "default_receipt_poll")]
    pub receipt_poll: PollSettings,

    // Observability
    /// OTLP collector endpoint. Spans are exported only when set.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

/// A bounded poll schedule in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    pub initial_delay_secs: u64,
    pub interval_secs: u64,
    pub max_attempts: u32,
}

impl PollSettings {
    fn to_policy(self, name: &str) -> Result<PollPolicy> {
        PollPolicy::new(
            Duration::from_secs(self.initial_delay_secs),
            Duration::from_secs(self.interval_secs),
            self.max_attempts,
        )
        .with_context(|| format!("{name}.max_attempts must be greater than 0"))
    }
}

fn default_network() -> String {
    "coston2".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_verifier_path() -> String {
    "JsonApi".to_string()
}

fn default_attestation_type() -> String {
    "IJsonApi".to_string()
}

fn default_source_id() -> String {
    "WEB2".to_string()
}

fn default_postprocess_jq() -> String {
    DEFAULT_POSTPROCESS_JQ.to_string()
}

fn default_abi_signature() -> String {
    DEFAULT_ABI_SIGNATURE.to_string()
}

fn default_protocol_id() -> u64 {
    200
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_finalization_poll() -> PollSettings {
    PollSettings {
        initial_delay_secs: 30,
        interval_secs: 10,
        max_attempts: 30,
    }
}

fn default_proof_poll() -> PollSettings {
    PollSettings {
        initial_delay_secs: 0,
        interval_secs: 10,
        max_attempts: 30,
    }
}

fn default_receipt_poll() -> PollSettings {
    PollSettings {
        initial_delay_secs: 0,
        interval_secs: 2,
        max_attempts: 60,
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .with_context(|| format!("missing required configuration value '{name}'"))
}

fn address(value: &Option<String>, name: &str) -> Result<ContractAddress> {
    let raw = required(value, name)?;
    let digits = raw
        .strip_prefix("0x")
        .with_context(|| format!("{name} must be 0x-prefixed"))?;
    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        anyhow::bail!("{name} must be a 20-byte hex address, got '{raw}'");
    }
    ContractAddress::new(raw).with_context(|| format!("{name} is empty"))
}

fn private_key(value: &Option<String>, name: &str) -> Result<String> {
    let raw = required(value, name)?;
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        anyhow::bail!("{name} must be a 32-byte hex private key");
    }
    Ok(raw.to_string())
}

impl RelayConfig {
    /// Builds the layered provider chain without extracting it.
    pub fn figment(config_path: Option<&Path>, network: Option<&str>) -> Figment {
        let file = config_path.unwrap_or_else(|| Path::new(CONFIG_FILE));

        let legacy = Env::raw().filter_map(|key| {
            LEGACY_ENV
                .iter()
                .find(|(legacy, _)| key == *legacy)
                .map(|(_, field)| (*field).into())
        });

        // Poll tables are seeded here so a file or env layer may override
        // single fields of them.
        let mut figment = Figment::new()
            .merge(Serialized::default("finalization_poll", default_finalization_poll()))
            .merge(Serialized::default("proof_poll", default_proof_poll()))
            .merge(Serialized::default("receipt_poll", default_receipt_poll()))
            .merge(Toml::file(file))
            .merge(legacy)
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        if let Some(network) = network {
            figment = figment.merge(Serialized::default("network", network));
        }
        figment
    }

    /// Loads and validates configuration from all layers.
    pub fn load(config_path: Option<&Path>, network: Option<&str>) -> Result<Self> {
        if let Some(path) = config_path {
            anyhow::ensure!(path.exists(), "config file {} not found", path.display());
        }
        Self::from_figment(Self::figment(config_path, network))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that have defaults. Required values are checked by
    /// [`RelayConfig::check_required`].
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }
        if self.network.trim().is_empty() {
            anyhow::bail!("network must not be empty");
        }
        if self.http_timeout_secs == 0 {
            anyhow::bail!("http_timeout_secs must be greater than 0");
        }
        self.finalization_poll.to_policy("finalization_poll")?;
        self.proof_poll.to_policy("proof_poll")?;
        self.receipt_poll.to_policy("receipt_poll")?;
        pipeline::attestation::encode_name(&self.attestation_type)
            .context("attestation_type must be 1 to 32 bytes")?;
        pipeline::attestation::encode_name(&self.source_id)
            .context("source_id must be 1 to 32 bytes")?;
        Ok(())
    }

    /// Fails on the first missing or malformed endpoint, credential, or
    /// contract address.
    pub fn check_required(&self) -> Result<()> {
        self.snapshot_config()?;
        self.verifier_config()?;
        self.da_layer_config()?;
        self.ledger_config()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// The configured chain id, or the one implied by a known network name.
    pub fn chain_id(&self) -> Result<u64> {
        self.chain_id
            .or_else(|| {
                KNOWN_CHAINS
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(self.network.trim()))
                    .map(|(_, id)| *id)
            })
            .with_context(|| format!("chain_id is required for network '{}'", self.network))
    }

    fn attestation_type(&self) -> Result<AttestationType> {
        AttestationType::new(self.attestation_type.clone()).context("attestation_type is empty")
    }

    fn source_id(&self) -> Result<SourceId> {
        SourceId::new(self.source_id.clone()).context("source_id is empty")
    }

    pub fn snapshot_config(&self) -> Result<SnapshotSourceConfig> {
        Ok(SnapshotSourceConfig {
            snapshot_url: required(&self.snapshot_url, "snapshot_url")?.to_string(),
            mark_processed_url: required(&self.mark_processed_url, "mark_processed_url")?
                .to_string(),
            timeout: self.http_timeout(),
        })
    }

    pub fn verifier_config(&self) -> Result<VerifierConfig> {
        Ok(VerifierConfig {
            base_url: required(&self.verifier_url, "verifier_url")?.to_string(),
            path_segment: self.verifier_path.clone(),
            api_key: required(&self.verifier_api_key, "verifier_api_key")?.to_string(),
            attestation_type: self.attestation_type()?,
            source_id: self.source_id()?,
            timeout: self.http_timeout(),
        })
    }

    pub fn da_layer_config(&self) -> Result<DaLayerConfig> {
        Ok(DaLayerConfig {
            base_url: required(&self.da_layer_url, "da_layer_url")?.to_string(),
            api_key: self.da_layer_api_key.clone().filter(|k| !k.is_empty()),
            timeout: self.http_timeout(),
        })
    }

    pub fn ledger_config(&self) -> Result<LedgerConfig> {
        Ok(LedgerConfig {
            rpc_url: required(&self.rpc_url, "rpc_url")?.to_string(),
            sender_key: private_key(&self.sender_private_key, "sender_private_key")?,
            chain_id: self.chain_id()?,
            hub: address(&self.hub_address, "hub_address")?,
            fee_config: address(&self.fee_config_address, "fee_config_address")?,
            relay: address(&self.relay_address, "relay_address")?,
            systems_manager: address(&self.systems_manager_address, "systems_manager_address")?,
            destination: address(&self.destination_address, "destination_address")?,
            protocol_id: self.protocol_id,
            receipt_poll: self.receipt_poll.to_policy("receipt_poll")?,
            timeout: self.http_timeout(),
        })
    }

    /// The attested rule. The attestors fetch the same URL the runner reads
    /// the snapshot id from.
    pub fn definition(&self) -> Result<WorkflowDefinition> {
        Ok(WorkflowDefinition {
            request: AttestationRequestBody {
                url: required(&self.snapshot_url, "snapshot_url")?.to_string(),
                postprocess_jq: self.postprocess_jq.clone(),
                abi_signature: self.abi_signature.clone(),
            },
            attestation_type: self.attestation_type()?,
            source_id: self.source_id()?,
        })
    }

    pub fn finalization_policy(&self) -> Result<PollPolicy> {
        self.finalization_poll.to_policy("finalization_poll")
    }

    pub fn proof_policy(&self) -> Result<PollPolicy> {
        self.proof_poll.to_policy("proof_poll")
    }
}
