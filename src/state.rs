use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use sha2::{Sha256, Digest};
use serde::{Serialize, Deserialize};
use thiserror::Error;

pub type StateRoot = [u8; 32];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("no state recorded for root {}", hex::encode(.0))]
    UnknownRoot(StateRoot),
}

/// Mutable key/value ledger state. Frozen into a [`StateView`] once committed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    entries: BTreeMap<String, Vec<u8>>
}

impl State {
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn commit(&self) -> StateRoot {
        let mut hasher = Sha256::new();
        for (key, value) in &self.entries {
            hasher.update((key.len() as u64).to_be_bytes());
            hasher.update(key.as_bytes());
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(value);
        }
        hasher.finalize().into()
    }
}

/// Read-only state as of a single root.
#[derive(Debug, Clone)]
pub struct StateView {
    root: StateRoot,
    entries: Arc<BTreeMap<String, Vec<u8>>>
}

impl StateView {
    pub fn root(&self) -> &StateRoot {
        &self.root
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn leaves<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a [u8])> + 'a {
        self.entries
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

pub trait StateViewFactory: Send + Sync {
    fn create_view(&self, root: &StateRoot) -> Result<StateView, Error>;
}

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<StateRoot, Arc<BTreeMap<String, Vec<u8>>>>>
}

impl MemoryStateStore {
    pub fn insert(&self, state: State) -> StateRoot {
        let root = state.commit();
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(root, Arc::new(state.entries));
        root
    }

    pub fn len(&self) -> usize {
        self.states.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateViewFactory for MemoryStateStore {
    fn create_view(&self, root: &StateRoot) -> Result<StateView, Error> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        let entries = states.get(root).ok_or(Error::UnknownRoot(*root))?;
        Ok(StateView { root: *root, entries: Arc::clone(entries) })
    }
}
