//! Software stand-ins for the trusted attestation module.
//!
//! Both versions read the same certificate encoding. They differ in what the
//! enclave key signs: version 1 signs the serialized certificate as-is, while
//! version 2 signs a domain-separated SHA-256 digest of it.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use sha2::{Sha256, Digest};

use crate::account::{self, PublicKey, Signature};
use crate::certificate::{self, Body, WaitCertificate};
use crate::enclave::{self, Enclave, EnclaveVersion};

const V2_DOMAIN: &[u8] = b"poet-wait-certificate-v2";

pub fn initialize(version: EnclaveVersion, data_dir: &Path) -> Result<Arc<dyn Enclave>, enclave::Error> {
    let dir_error = |source| enclave::Error::DataDir { path: data_dir.to_path_buf(), source };
    fs::create_dir_all(data_dir).map_err(dir_error)?;
    if !data_dir.is_dir() {
        return Err(dir_error(io::Error::new(io::ErrorKind::Other, "not a directory")));
    }
    Ok(match version {
        EnclaveVersion::V1 => Arc::new(SimulatorV1),
        EnclaveVersion::V2 => Arc::new(SimulatorV2),
    })
}

fn signed_message(version: EnclaveVersion, serialized: &str) -> Vec<u8> {
    match version {
        EnclaveVersion::V1 => serialized.as_bytes().to_vec(),
        EnclaveVersion::V2 => {
            let mut hasher = Sha256::new();
            hasher.update(V2_DOMAIN);
            hasher.update(serialized.as_bytes());
            hasher.finalize().to_vec()
        }
    }
}

fn parse(serialized: &str, signature: &str) -> Result<WaitCertificate, certificate::Error> {
    let body: Body = serde_json::from_str(serialized)
        .map_err(|e| certificate::Error::Malformed(e.to_string()))?;
    let sig = account::signature_from_hex(signature)
        .map_err(|e| certificate::Error::Malformed(e.to_string()))?;
    Ok(WaitCertificate::new(body, serialized.to_string(), sig.to_bytes().to_vec()))
}

fn check(version: EnclaveVersion, certificate: &WaitCertificate, poet_public_key: &PublicKey) -> Result<(), certificate::Error> {
    let sig = Signature::try_from(certificate.signature()).map_err(|_| certificate::Error::BadSig)?;
    let msg = signed_message(version, certificate.serialized());
    if account::verify(poet_public_key, &msg, &sig) {
        Ok(())
    } else {
        Err(certificate::Error::BadSig)
    }
}

/// Signs `serialized` the way the enclave of `version` does when it issues
/// a certificate.
#[cfg(any(test, feature = "testing"))]
pub fn sign(version: EnclaveVersion, poet_key: &account::Keypair, serialized: &str) -> Signature {
    poet_key.sign(&signed_message(version, serialized))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatorV1;

impl Enclave for SimulatorV1 {
    fn version(&self) -> EnclaveVersion {
        EnclaveVersion::V1
    }

    fn deserialize_wait_certificate(&self, serialized: &str, signature: &str) -> Result<WaitCertificate, certificate::Error> {
        parse(serialized, signature)
    }

    fn verify_wait_certificate(&self, certificate: &WaitCertificate, poet_public_key: &PublicKey) -> Result<(), certificate::Error> {
        check(EnclaveVersion::V1, certificate, poet_public_key)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatorV2;

impl Enclave for SimulatorV2 {
    fn version(&self) -> EnclaveVersion {
        EnclaveVersion::V2
    }

    fn deserialize_wait_certificate(&self, serialized: &str, signature: &str) -> Result<WaitCertificate, certificate::Error> {
        parse(serialized, signature)
    }

    fn verify_wait_certificate(&self, certificate: &WaitCertificate, poet_public_key: &PublicKey) -> Result<(), certificate::Error> {
        check(EnclaveVersion::V2, certificate, poet_public_key)
    }
}
