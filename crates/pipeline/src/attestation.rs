//! Decoding of the attested response header.
//!
//! The data-availability layer returns the attested response as an ABI-encoded
//! dynamic tuple. Its first four fields are static and identical for every
//! attestation type:
//!
//! | Word (after tuple offset) | Field |
//! |---------------------------|-------|
//! | 0 | `bytes32 attestationType` |
//! | 1 | `bytes32 sourceId` |
//! | 2 | `uint64 votingRound` |
//! | 3 | `uint64 lowestUsedTimestamp` |
//!
//! The remaining (dynamic) request and response bodies are passed through to
//! the destination contract untouched.

use crate::{AttestationType, RoundId, SourceId, WorkflowError};

const WORD: usize = 32;

/// Right-pads a short UTF-8 name into a 32-byte word, as the attestation
/// protocol expects for attestation type and source identifiers.
///
/// Returns `None` if the name is longer than 32 bytes.
pub fn encode_name(name: &str) -> Option<[u8; WORD]> {
    let bytes = name.as_bytes();
    if bytes.len() > WORD {
        return None;
    }
    let mut word = [0u8; WORD];
    word[..bytes.len()].copy_from_slice(bytes);
    Some(word)
}

fn decode_name(word: &[u8]) -> String {
    let end = word.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&word[..end]).into_owned()
}

/// The static header of an attested response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Attestation type name (e.g. `"IJsonApi"`).
    pub attestation_type: String,
    /// Source name (e.g. `"WEB2"`).
    pub source_id: String,
    /// Round the response was attested in.
    pub voting_round: RoundId,
    /// Earliest source timestamp the attestors relied on (seconds).
    pub lowest_used_timestamp: u64,
}

impl ResponseHeader {
    /// Decodes the header from an ABI-encoded response.
    pub fn decode(encoded: &[u8]) -> Result<Self, WorkflowError> {
        let base = read_offset(encoded, 0)?;
        let field = |index: usize| word_at(encoded, base.saturating_add(index * WORD));

        Ok(Self {
            attestation_type: decode_name(field(0)?),
            source_id: decode_name(field(1)?),
            voting_round: RoundId::new(read_u64(field(2)?)?),
            lowest_used_timestamp: read_u64(field(3)?)?,
        })
    }

    /// Checks that the response answers the request that was submitted.
    pub fn ensure_matches(
        &self,
        attestation_type: &AttestationType,
        source_id: &SourceId,
        round: RoundId,
    ) -> Result<(), WorkflowError> {
        if self.attestation_type != attestation_type.as_str() {
            return Err(WorkflowError::validation(format!(
                "proof attests type '{}', expected '{attestation_type}'",
                self.attestation_type
            )));
        }
        if self.source_id != source_id.as_str() {
            return Err(WorkflowError::validation(format!(
                "proof attests source '{}', expected '{source_id}'",
                self.source_id
            )));
        }
        if self.voting_round != round {
            return Err(WorkflowError::validation(format!(
                "proof belongs to round {}, expected {round}",
                self.voting_round
            )));
        }
        Ok(())
    }
}

fn word_at(encoded: &[u8], at: usize) -> Result<&[u8], WorkflowError> {
    at.checked_add(WORD)
        .and_then(|end| encoded.get(at..end))
        .ok_or_else(|| {
            WorkflowError::validation(format!(
                "attested response truncated: word at {at} beyond {} bytes",
                encoded.len()
            ))
        })
}

fn read_u64(word: &[u8]) -> Result<u64, WorkflowError> {
    let (high, low) = word.split_at(WORD - 8);
    if high.iter().any(|b| *b != 0) {
        return Err(WorkflowError::validation("attested integer exceeds 64 bits"));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(low);
    Ok(u64::from_be_bytes(buf))
}

fn read_offset(encoded: &[u8], at: usize) -> Result<usize, WorkflowError> {
    let offset = read_u64(word_at(encoded, at)?)?;
    usize::try_from(offset).map_err(|_| WorkflowError::validation("attested offset out of range"))
}
