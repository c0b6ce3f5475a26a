use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::account::{self, PublicKey};
use crate::state::StateView;

/// State key prefix under which validator records live.
pub const VALIDATOR_PREFIX: &str = "validator_registry.validator.";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    #[error("validator {0} has no registry entry")]
    NotFound(String),
    #[error("registry entry for {id} is malformed: {reason}")]
    Malformed { id: String, reason: String },
    #[error("registry entry for {id} has a bad PoET public key: {source}")]
    BadKey { id: String, source: account::Error },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignupInfo {
    pub poet_public_key: String,
    pub proof_data: String,
    pub anti_sybil_id: String,
    pub nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidatorInfo {
    pub name: String,
    // Hex signer public key of the validator.
    pub id: String,
    pub signup_info: SignupInfo,
}

impl ValidatorInfo {
    pub fn address(id: &str) -> String {
        format!("{}{}", VALIDATOR_PREFIX, id)
    }

    pub fn poet_public_key(&self) -> Result<PublicKey, Error> {
        account::public_key_from_hex(&self.signup_info.poet_public_key)
            .map_err(|source| Error::BadKey { id: self.id.clone(), source })
    }
}

/// Read-only registry queries over a single state snapshot.
pub struct RegistryView<'a> {
    state: &'a StateView
}

impl<'a> RegistryView<'a> {
    pub fn new(state: &'a StateView) -> Self {
        Self { state }
    }

    pub fn count(&self) -> usize {
        self.state.leaves(VALIDATOR_PREFIX).count()
    }

    pub fn get_validators(&self) -> Result<BTreeMap<String, ValidatorInfo>, Error> {
        self.state
            .leaves(VALIDATOR_PREFIX)
            .map(|(key, bytes)| {
                let id = &key[VALIDATOR_PREFIX.len()..];
                decode(id, bytes).map(|info| (id.to_string(), info))
            })
            .collect()
    }

    pub fn get_validator_info(&self, signer_public_key: &str) -> Result<ValidatorInfo, Error> {
        let bytes = self.state
            .get(&ValidatorInfo::address(signer_public_key))
            .ok_or_else(|| Error::NotFound(signer_public_key.to_string()))?;
        decode(signer_public_key, bytes)
    }
}

fn decode(id: &str, bytes: &[u8]) -> Result<ValidatorInfo, Error> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::Malformed { id: id.to_string(), reason: e.to_string() })
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::account::Keypair;
    use crate::state::{MemoryStateStore, State, StateViewFactory};

    pub fn info(name: &str, signer: &Keypair, poet: &Keypair) -> ValidatorInfo {
        ValidatorInfo {
            name: name.to_string(),
            id: signer.public_hex(),
            signup_info: SignupInfo {
                poet_public_key: poet.public_hex(),
                proof_data: String::from("{}"),
                anti_sybil_id: String::from("sybil"),
                nonce: String::from("0"),
            },
        }
    }

    fn view(state: State) -> StateView {
        let store = MemoryStateStore::default();
        let root = store.insert(state);
        store.create_view(&root).unwrap()
    }

    #[test]
    fn empty_registry() {
        let mut state = State::default();
        state.set("unrelated", b"x".to_vec());
        let view = view(state);
        let registry = RegistryView::new(&view);
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.get_validators(), Ok(BTreeMap::new()));
        assert_eq!(registry.get_validator_info("ab"), Err(Error::NotFound(String::from("ab"))));
    }

    #[test]
    fn lookup_by_signer() {
        let (alice, alice_poet) = (Keypair::gen(), Keypair::gen());
        let (bob, bob_poet) = (Keypair::gen(), Keypair::gen());
        let mut state = State::default();
        for entry in [info("alice", &alice, &alice_poet), info("bob", &bob, &bob_poet)] {
            state.set(ValidatorInfo::address(&entry.id), serde_json::to_vec(&entry).unwrap());
        }
        let view = view(state);
        let registry = RegistryView::new(&view);
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.get_validators().unwrap().len(), 2);
        let found = registry.get_validator_info(&bob.public_hex()).unwrap();
        assert_eq!(found.name, "bob");
        assert_eq!(found.poet_public_key(), Ok(bob_poet.public()));
        let stranger = Keypair::gen();
        assert!(matches!(registry.get_validator_info(&stranger.public_hex()), Err(Error::NotFound(_))));
    }

    #[test]
    fn malformed_entry() {
        let mut state = State::default();
        state.set(ValidatorInfo::address("ab"), b"{".to_vec());
        let view = view(state);
        let registry = RegistryView::new(&view);
        assert_eq!(registry.count(), 1);
        assert!(matches!(registry.get_validator_info("ab"), Err(Error::Malformed { .. })));
        assert!(registry.get_validators().is_err());
    }

    #[test]
    fn bad_poet_key() {
        let signer = Keypair::gen();
        let mut info = info("carol", &signer, &Keypair::gen());
        info.signup_info.poet_public_key = String::from("1234");
        assert!(matches!(info.poet_public_key(), Err(Error::BadKey { .. })));
    }
}
