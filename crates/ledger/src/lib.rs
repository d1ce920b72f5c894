//! Ledger infrastructure adapter.
//!
//! Implements [`pipeline::Ledger`] against the attestation protocol's EVM
//! contracts through `ethers` contract bindings:
//!
//! - the attestation request is registered with `requestAttestation(bytes)`
//!   on the attestation hub, paying the fee quoted by the fee-configuration
//!   contract;
//! - the round id is derived from the including block's timestamp and the
//!   round schedule published by the systems manager contract;
//! - finalization is read from the relay contract's `isFinalized`;
//! - the proof is delivered with one `updateReputation` call to the
//!   destination contract.
//!
//! ## Signing
//!
//! Transactions are signed in-process by a [`LocalWallet`] built from the
//! configured sender key and broadcast with `eth_sendRawTransaction`. Receipts
//! are awaited through `ethers`' pending-transaction future, bounded by the
//! receipt poll policy.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Contract bindings, ABI codecs, and JSON-RPC transport
//! live here; the [`pipeline`] crate never sees them.

mod contracts;

use std::{fmt, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use ethers::{
    abi::{self, AbiType, Tokenizable},
    contract::{ContractCall, ContractError},
    middleware::SignerMiddleware,
    providers::{Http, Middleware, MiddlewareError, Provider},
    signers::{LocalWallet, Signer},
    types::{Address, Bytes, TransactionReceipt, U256, U64},
};
use pipeline::{
    ContractAddress, HexBytes, Ledger, PollPolicy, Proof, RoundId, TransactionHash, Upstream,
    WorkflowError,
};
use tracing::{debug, info, instrument};

use crate::contracts::{
    AttestationProof, AttestedResponse, FdcFeeConfiguration, FdcHub, FlareSystemsManager, Relay,
    ReputationBoard,
};

const SERVICE: Upstream = Upstream::Ledger;

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Maps block timestamps onto voting rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundSchedule {
    /// Unix timestamp at which round 0 started.
    pub first_round_start: u64,
    /// Length of one voting round in seconds.
    pub round_duration: u64,
}

impl RoundSchedule {
    /// Returns the round containing `timestamp`.
    pub fn round_at(self, timestamp: u64) -> Result<RoundId, WorkflowError> {
        if self.round_duration == 0 {
            return Err(WorkflowError::validation("round duration is zero"));
        }
        let elapsed = timestamp.checked_sub(self.first_round_start).ok_or_else(|| {
            WorkflowError::validation(format!(
                "block timestamp {timestamp} precedes first round start {}",
                self.first_round_start
            ))
        })?;
        Ok(RoundId::new(elapsed / self.round_duration))
    }
}

/// Connection settings, signer, and contract addresses.
#[derive(Clone)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint of the node.
    pub rpc_url: String,
    /// Hex-encoded secp256k1 private key of the account that signs and pays.
    pub sender_key: String,
    /// EIP-155 chain id transactions are signed for.
    pub chain_id: u64,
    /// Attestation hub accepting `requestAttestation(bytes)`.
    pub hub: ContractAddress,
    /// Fee configuration contract answering `getRequestFee(bytes)`.
    pub fee_config: ContractAddress,
    /// Relay contract answering `isFinalized(uint256,uint256)`.
    pub relay: ContractAddress,
    /// Systems manager publishing the round schedule.
    pub systems_manager: ContractAddress,
    /// Contract receiving the proof.
    pub destination: ContractAddress,
    /// Protocol id under which attestation rounds are finalized.
    pub protocol_id: u64,
    /// Schedule for waiting on transaction receipts.
    pub receipt_poll: PollPolicy,
    /// Per-call timeout.
    pub timeout: Duration,
}

impl fmt::Debug for LedgerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerConfig")
            .field("rpc_url", &self.rpc_url)
            .field("sender_key", &"<redacted>")
            .field("chain_id", &self.chain_id)
            .field("hub", &self.hub)
            .field("fee_config", &self.fee_config)
            .field("relay", &self.relay)
            .field("systems_manager", &self.systems_manager)
            .field("destination", &self.destination)
            .field("protocol_id", &self.protocol_id)
            .field("receipt_poll", &self.receipt_poll)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// `ethers` implementation of [`Ledger`].
pub struct RpcLedger {
    client: Arc<SignerClient>,
    hub: FdcHub<SignerClient>,
    fee_config: FdcFeeConfiguration<SignerClient>,
    relay: Relay<SignerClient>,
    systems_manager: FlareSystemsManager<SignerClient>,
    destination: ReputationBoard<SignerClient>,
    protocol_id: u64,
    receipt_poll: PollPolicy,
    timeout: Duration,
}

impl RpcLedger {
    /// Creates a ledger adapter signing with `config.sender_key`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if the RPC URL, the sender
    /// key, or a contract address cannot be parsed.
    pub fn new(config: LedgerConfig) -> Result<Self, WorkflowError> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str()).map_err(|e| {
            WorkflowError::configuration(format!(
                "invalid ledger RPC URL '{}': {e}",
                config.rpc_url
            ))
        })?;
        let wallet = config
            .sender_key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|_| {
                WorkflowError::configuration("sender key is not a valid secp256k1 private key")
            })?
            .with_chain_id(config.chain_id);
        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        debug!(sender = ?client.address(), chain_id = config.chain_id, "Ledger signer loaded");

        Ok(Self {
            hub: FdcHub::new(evm_address(&config.hub)?, Arc::clone(&client)),
            fee_config: FdcFeeConfiguration::new(
                evm_address(&config.fee_config)?,
                Arc::clone(&client),
            ),
            relay: Relay::new(evm_address(&config.relay)?, Arc::clone(&client)),
            systems_manager: FlareSystemsManager::new(
                evm_address(&config.systems_manager)?,
                Arc::clone(&client),
            ),
            destination: ReputationBoard::new(
                evm_address(&config.destination)?,
                Arc::clone(&client),
            ),
            client,
            protocol_id: config.protocol_id,
            receipt_poll: config.receipt_poll,
            timeout: config.timeout,
        })
    }

    /// Account derived from the sender key.
    pub fn sender(&self) -> Address {
        self.client.address()
    }

    /// Runs one node round trip under the per-call timeout.
    async fn bounded<T, E>(
        &self,
        action: &str,
        call: impl Future<Output = Result<T, E>>,
        classify: impl FnOnce(&str, E) -> WorkflowError,
    ) -> Result<T, WorkflowError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(|e| classify(action, e)),
            Err(_) => Err(WorkflowError::transient(
                SERVICE,
                format!("{action}: no answer within {}s", self.timeout.as_secs()),
            )),
        }
    }

    async fn round_schedule(&self) -> Result<RoundSchedule, WorkflowError> {
        let first = self.systems_manager.first_voting_round_start_ts();
        let duration = self.systems_manager.voting_epoch_duration_seconds();
        Ok(RoundSchedule {
            first_round_start: self
                .bounded("firstVotingRoundStartTs", first.call(), contract_error)
                .await?,
            round_duration: self
                .bounded("votingEpochDurationSeconds", duration.call(), contract_error)
                .await?,
        })
    }

    /// Signs and broadcasts `call`, then waits for a successful receipt.
    async fn send(
        &self,
        action: &str,
        call: ContractCall<SignerClient, ()>,
    ) -> Result<TransactionReceipt, WorkflowError> {
        let call = call.legacy();
        let pending = self.bounded(action, call.send(), contract_error).await?;
        let hash = pending.tx_hash();
        debug!(transaction = ?hash, "Transaction broadcast");

        let policy = self.receipt_poll;
        let pending = pending
            .interval(policy.interval())
            .retries(usize::try_from(policy.max_attempts()).unwrap_or(usize::MAX));
        let wait = async {
            tokio::time::sleep(policy.delay_before(0)).await;
            pending.await
        };

        let receipt = match tokio::time::timeout(policy.budget(), wait).await {
            Ok(Ok(Some(receipt))) => receipt,
            Ok(Ok(None)) => {
                return Err(WorkflowError::transient(
                    SERVICE,
                    format!("{action}: transaction {hash:?} dropped from the mempool"),
                ));
            }
            Ok(Err(e)) => return Err(node_error(action, &e)),
            Err(_) => {
                return Err(WorkflowError::transient(
                    SERVICE,
                    format!(
                        "{action}: no receipt for transaction {hash:?} within {}s",
                        policy.budget().as_secs()
                    ),
                ));
            }
        };

        if receipt.status == Some(U64::zero()) {
            return Err(WorkflowError::permanent(
                SERVICE,
                format!("{action}: transaction {hash:?} reverted"),
            ));
        }
        Ok(receipt)
    }

    async fn block_timestamp(&self, receipt: &TransactionReceipt) -> Result<u64, WorkflowError> {
        let number = receipt.block_number.ok_or_else(|| {
            WorkflowError::transient(SERVICE, "receipt does not name its block")
        })?;
        let block = self
            .bounded("eth_getBlockByNumber", self.client.get_block(number), |action, e| {
                node_error(action, &e)
            })
            .await?
            .ok_or_else(|| WorkflowError::transient(SERVICE, format!("block {number} not found")))?;
        if block.timestamp > U256::from(u64::MAX) {
            return Err(WorkflowError::validation(format!(
                "block {number} timestamp {} is out of range",
                block.timestamp
            )));
        }
        Ok(block.timestamp.as_u64())
    }
}

impl fmt::Debug for RpcLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcLedger")
            .field("sender", &self.sender())
            .field("hub", &self.hub.address())
            .field("destination", &self.destination.address())
            .field("protocol_id", &self.protocol_id)
            .finish_non_exhaustive()
    }
}

fn evm_address(address: &ContractAddress) -> Result<Address, WorkflowError> {
    address.as_str().parse().map_err(|e| {
        WorkflowError::configuration(format!("invalid contract address '{address}': {e}"))
    })
}

/// An error answered by the node is final; transport failures may clear up.
fn node_error<E: MiddlewareError>(action: &str, err: &E) -> WorkflowError {
    let message = format!("{action}: {err}");
    if err.as_error_response().is_some() {
        WorkflowError::permanent(SERVICE, message)
    } else {
        WorkflowError::transient(SERVICE, message)
    }
}

fn contract_error(action: &str, err: ContractError<SignerClient>) -> WorkflowError {
    match &err {
        ContractError::MiddlewareError { e } => node_error(action, e),
        ContractError::ProviderError { e } => node_error(action, e),
        _ => WorkflowError::permanent(SERVICE, format!("{action}: {err}")),
    }
}

/// Decodes the attested response as the data-availability layer serves it:
/// one ABI-encoded tuple parameter, leading offset included.
fn decode_response(encoded: &[u8]) -> Result<AttestedResponse, WorkflowError> {
    let token = abi::decode(&[AttestedResponse::param_type()], encoded)
        .map_err(|e| {
            WorkflowError::validation(format!("attested response does not decode: {e}"))
        })?
        .pop()
        .ok_or_else(|| WorkflowError::validation("attested response is empty"))?;
    AttestedResponse::from_token(token).map_err(|e| {
        WorkflowError::validation(format!("attested response has an unexpected shape: {e}"))
    })
}

fn attestation_proof(proof: &Proof) -> Result<AttestationProof, WorkflowError> {
    let merkle_proof = proof
        .merkle_proof
        .iter()
        .map(|node| {
            <[u8; 32]>::try_from(node.as_bytes()).map_err(|_| {
                WorkflowError::validation(format!(
                    "merkle proof node has {} bytes, expected 32",
                    node.len()
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(AttestationProof {
        merkle_proof,
        data: decode_response(proof.response.as_bytes())?,
    })
}

#[async_trait]
impl Ledger for RpcLedger {
    #[instrument(skip_all, fields(request_bytes = request.len()))]
    async fn submit_attestation_request(
        &self,
        request: &HexBytes,
    ) -> Result<RoundId, WorkflowError> {
        let data = Bytes::from(request.as_bytes().to_vec());

        let quote = self.fee_config.get_request_fee(data.clone());
        let fee = self.bounded("getRequestFee", quote.call(), contract_error).await?;
        debug!(fee = %fee, "Attestation request fee quoted");

        let receipt = self
            .send("requestAttestation", self.hub.request_attestation(data).value(fee))
            .await?;
        let timestamp = self.block_timestamp(&receipt).await?;
        let round = self.round_schedule().await?.round_at(timestamp)?;

        info!(
            transaction = ?receipt.transaction_hash,
            block = ?receipt.block_number,
            round = %round,
            "Attestation request included"
        );
        Ok(round)
    }

    async fn is_round_finalized(&self, round: RoundId) -> Result<bool, WorkflowError> {
        let query = self
            .relay
            .is_finalized(U256::from(self.protocol_id), U256::from(round.as_u64()));
        self.bounded("isFinalized", query.call(), contract_error).await
    }

    #[instrument(skip_all, fields(proof_nodes = proof.merkle_proof.len()))]
    async fn apply_proof(&self, proof: &Proof) -> Result<TransactionHash, WorkflowError> {
        let call = self.destination.update_reputation(attestation_proof(proof)?);
        let receipt = self.send("updateReputation", call).await?;
        TransactionHash::new(format!("{:?}", receipt.transaction_hash))
            .ok_or_else(|| WorkflowError::validation("receipt carried an empty transaction hash"))
    }
}
