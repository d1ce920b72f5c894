//! Typed bindings for the contracts the relay talks to.
//!
//! Only the entry points the workflow uses are declared.

use ethers::contract::abigen;

abigen!(
    FdcHub,
    r#"[
        function requestAttestation(bytes data) external payable
    ]"#
);

abigen!(
    FdcFeeConfiguration,
    r#"[
        function getRequestFee(bytes data) external view returns (uint256)
    ]"#
);

abigen!(
    Relay,
    r#"[
        function isFinalized(uint256 protocolId, uint256 votingRoundId) external view returns (bool)
    ]"#
);

abigen!(
    FlareSystemsManager,
    r#"[
        function firstVotingRoundStartTs() external view returns (uint64)
        function votingEpochDurationSeconds() external view returns (uint64)
    ]"#
);

// The destination accepts a JSON-API proof: the merkle path plus the attested
// response exactly as the data-availability layer serves it.
abigen!(
    ReputationBoard,
    r#"[
        struct AttestedRequestBody { string url; string postprocessJq; string abi_signature; }
        struct AttestedResponseBody { bytes abi_encoded_data; }
        struct AttestedResponse { bytes32 attestationType; bytes32 sourceId; uint64 votingRound; uint64 lowestUsedTimestamp; AttestedRequestBody requestBody; AttestedResponseBody responseBody; }
        struct AttestationProof { bytes32[] merkleProof; AttestedResponse data; }
        function updateReputation(AttestationProof proof) external
    ]"#
);
