use ed25519_dalek::{self, Verifier, Signer};
use rand::rngs::OsRng;
use thiserror::Error;

pub type PublicKey = ed25519_dalek::PublicKey;
pub type Signature = ed25519_dalek::Signature;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    #[error("public key is not valid hex: {0}")]
    BadHex(#[from] hex::FromHexError),
    #[error("bytes are not a valid ed25519 public key")]
    BadKey,
    #[error("bytes are not a valid ed25519 signature")]
    BadSig,
}

#[derive(Debug)]
pub struct Keypair {
    pub kp: ed25519_dalek::Keypair
}

impl Keypair {
    pub fn gen() -> Self {
        let mut csprng = OsRng {};
        Self { kp: ed25519_dalek::Keypair::generate(&mut csprng) }
    }

    // Deterministic keys for fixtures.
    pub fn from_seed(seed: [u8; 32]) -> Result<Self, Error> {
        let secret = ed25519_dalek::SecretKey::from_bytes(&seed).map_err(|_| Error::BadKey)?;
        let public = PublicKey::from(&secret);
        Ok(Self { kp: ed25519_dalek::Keypair { secret, public } })
    }

    pub fn public(&self) -> PublicKey {
        self.kp.public
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.kp.public.as_bytes())
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        self.kp.sign(msg)
    }
}

pub fn verify(pk: &PublicKey, msg: &[u8], sig: &Signature) -> bool {
    pk.verify(msg, sig).is_ok()
}

pub fn public_key_from_hex(s: &str) -> Result<PublicKey, Error> {
    let bytes = hex::decode(s)?;
    PublicKey::from_bytes(&bytes).map_err(|_| Error::BadKey)
}

pub fn signature_from_hex(s: &str) -> Result<Signature, Error> {
    let bytes = hex::decode(s).map_err(|_| Error::BadSig)?;
    Signature::try_from(bytes.as_slice()).map_err(|_| Error::BadSig)
}

/// Shortens a hex identifier to `head...tail` for log output.
pub fn abbrev(s: &str) -> String {
    let count = s.chars().count();
    if count <= 16 {
        return s.to_string();
    }
    let head: String = s.chars().take(8).collect();
    let tail: String = s.chars().skip(count - 8).collect();
    format!("{}...{}", head, tail)
}
