use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};
use thiserror::Error;
use tracing::debug;

use crate::account::PublicKey;
use crate::block::{Block, BlockCache, Header, NULL_BLOCK_ID};
use crate::enclave::Enclave;
use crate::timer::TimerSettings;

/// Previous-certificate link of the first certificate on a chain.
pub const NULL_IDENTIFIER: &str = "0000000000000000";

const LOCAL_MEAN_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    #[error("malformed wait certificate: {0}")]
    Malformed(String),
    #[error("wait time less than minimum: {duration} < {minimum}")]
    BelowMinimum { duration: f64, minimum: f64 },
    #[error("local mean does not match: {actual} != {expected}")]
    LocalMean { actual: f64, expected: f64 },
    #[error("previous certificate id does not match: {actual} != {expected}")]
    BadPrevious { actual: String, expected: String },
    #[error("wait certificate signature is not valid")]
    BadSig,
}

impl Error {
    /// Structural errors mean the payload could not even be read back.
    pub fn is_structural(&self) -> bool {
        matches!(self, Error::Malformed(_))
    }
}

/// Fields attested to by the enclave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub previous_certificate_id: String,
    pub local_mean: f64,
    pub duration: f64,
    pub request_time: f64,
    pub validator_address: String,
    pub nonce: String,
    pub block_hash: String,
}

/// Consensus payload as carried in a block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Payload {
    #[serde(rename = "SerializedCertificate")]
    pub serialized_certificate: String,
    #[serde(rename = "Signature")]
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaitCertificate {
    body: Body,
    serialized: String,
    signature: Vec<u8>,
    identifier: String,
}

impl WaitCertificate {
    pub fn new(body: Body, serialized: String, signature: Vec<u8>) -> Self {
        let digest = Sha256::digest(serialized.as_bytes());
        let identifier = hex::encode(&digest[..NULL_IDENTIFIER.len() / 2]);
        Self { body, serialized, signature, identifier }
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn serialized(&self) -> &str {
        &self.serialized
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn duration(&self) -> f64 {
        self.body.duration
    }

    pub fn local_mean(&self) -> f64 {
        self.body.local_mean
    }

    pub fn previous_certificate_id(&self) -> &str {
        &self.body.previous_certificate_id
    }

    /// Checks this certificate against the sample of certificates preceding
    /// it, most recent first, and the proposer's PoET public key.
    pub fn check_valid(
        &self,
        enclave: &dyn Enclave,
        certificates: &[WaitCertificate],
        poet_public_key: &PublicKey,
        timer: &TimerSettings
    ) -> Result<(), Error> {
        if self.duration().is_nan() || self.duration() < timer.minimum_wait_time {
            return Err(Error::BelowMinimum {
                duration: self.duration(),
                minimum: timer.minimum_wait_time
            });
        }
        let expected = timer.compute_local_mean(certificates);
        if !is_close(self.local_mean(), expected) {
            return Err(Error::LocalMean { actual: self.local_mean(), expected });
        }
        let expected_previous = certificates
            .first()
            .map(WaitCertificate::identifier)
            .unwrap_or(NULL_IDENTIFIER);
        if self.previous_certificate_id() != expected_previous {
            return Err(Error::BadPrevious {
                actual: self.previous_certificate_id().to_string(),
                expected: expected_previous.to_string()
            });
        }
        enclave.verify_wait_certificate(self, poet_public_key)
    }
}

// NaN never compares close.
fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= LOCAL_MEAN_TOLERANCE
}

/// Reads the wait certificate out of a block's consensus payload.
///
/// `Ok(None)` means the block carries no certificate at all, as for blocks
/// published before PoET consensus started.
pub fn deserialize_wait_certificate(
    block: &Block,
    enclave: &dyn Enclave
) -> Result<Option<WaitCertificate>, Error> {
    let consensus = &block.header.consensus;
    if consensus.is_empty() {
        return Ok(None);
    }
    let payload: Payload = serde_json::from_slice(consensus)
        .map_err(|e| Error::Malformed(e.to_string()))?;
    enclave
        .deserialize_wait_certificate(&payload.serialized_certificate, &payload.signature)
        .map(Some)
}

/// Collects up to `maximum` certificates from the ancestors of the block
/// described by `header`, most recent first.
///
/// The walk starts at the predecessor, so the block's own certificate is never
/// included. It ends early at the chain start: a null link, a block missing
/// from the cache, or a block without a readable certificate.
pub fn build_certificate_list(
    header: &Header,
    block_cache: &dyn BlockCache,
    enclave: &dyn Enclave,
    maximum: usize
) -> Vec<WaitCertificate> {
    // Grows with the ancestors found; `maximum` comes from chain state.
    let mut certificates = Vec::new();
    let mut block_id = header.previous_block_id;
    while certificates.len() < maximum && block_id != NULL_BLOCK_ID {
        let block = match block_cache.get(&block_id) {
            Some(block) => block,
            None => break
        };
        match deserialize_wait_certificate(&block, enclave) {
            Ok(Some(certificate)) => certificates.push(certificate),
            Ok(None) => break,
            Err(e) => {
                debug!(block_id = %block.id_hex(), error = %e, "Stopping certificate walk at unreadable ancestor");
                break;
            }
        }
        block_id = block.header.previous_block_id;
    }
    certificates
}
