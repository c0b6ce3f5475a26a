//! Chain dump replay behind `poet-verify`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::info;

use crate::block::{Block, MemoryBlockCache};
use crate::state::{MemoryStateStore, State};
use crate::verifier::BlockVerifier;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unable to parse chain dump: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("state entry {key} is not valid hex: {source}")]
    BadValue { key: String, source: hex::FromHexError },
}

/// State snapshots as hex-valued key maps, then the blocks to check in order.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ChainDump {
    #[serde(default)]
    pub states: Vec<BTreeMap<String, String>>,
    pub blocks: Vec<Block>,
}

impl ChainDump {
    pub fn push_state(&mut self, state: &State) {
        self.states.push(state.iter().map(|(k, v)| (k.to_string(), hex::encode(v))).collect());
    }
}

/// Reads `path` and commits every state snapshot it holds into `store`.
pub fn load_chain(path: &Path, store: &MemoryStateStore) -> Result<Vec<Block>, Error> {
    let dump: ChainDump = serde_json::from_str(&fs::read_to_string(path)?)?;
    for entries in dump.states {
        let mut state = State::default();
        for (key, value) in entries {
            match hex::decode(&value) {
                Ok(value) => state.set(key, value),
                Err(source) => return Err(Error::BadValue { key, source }),
            }
        }
        let root = store.insert(state);
        info!(root = %hex::encode(root), "Loaded state snapshot");
    }
    Ok(dump.blocks)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    /// Block id hex and whether it was accepted, in replay order.
    pub decisions: Vec<(String, bool)>,
}

impl Report {
    pub fn rejected(&self) -> usize {
        self.decisions.iter().filter(|(_, accepted)| !accepted).count()
    }

    pub fn exit_code(&self) -> u8 {
        if self.rejected() == 0 { 0 } else { 1 }
    }
}

/// Verifies `blocks` in order. Accepted blocks go into `cache`, so a
/// rejected block is never used as a predecessor.
pub fn replay(verifier: &BlockVerifier, cache: &MemoryBlockCache, blocks: Vec<Block>) -> Report {
    let mut report = Report::default();
    for block in blocks {
        let accepted = verifier.verify(&block);
        report.decisions.push((block.id_hex(), accepted));
        if accepted {
            cache.insert(block);
        }
    }
    report
}
