use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

use crate::state;

pub type BlockId = [u8; 32];

/// Predecessor link of a chain-start block.
pub const NULL_BLOCK_ID: BlockId = [0u8; 32];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub block_num: u64,
    #[serde(with = "hex::serde")]
    pub previous_block_id: BlockId,
    pub signer_public_key: String,
    // Serialized wait certificate, empty before consensus starts.
    #[serde(with = "hex::serde")]
    pub consensus: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub state_root_hash: state::StateRoot,
}

impl Header {
    pub fn hash(&self) -> BlockId {
        let mut hasher = Sha256::new();
        hasher.update(self.block_num.to_be_bytes());
        hasher.update(self.previous_block_id);
        hasher.update((self.signer_public_key.len() as u64).to_be_bytes());
        hasher.update(self.signer_public_key.as_bytes());
        hasher.update((self.consensus.len() as u64).to_be_bytes());
        hasher.update(&self.consensus);
        hasher.update(self.state_root_hash);
        hasher.finalize().into()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "Header", into = "Header")]
pub struct Block {
    pub header: Header,
    block_id: BlockId,
}

impl From<Header> for Block {
    fn from(header: Header) -> Self {
        let block_id = header.hash();
        Self { header, block_id }
    }
}

impl From<Block> for Header {
    fn from(block: Block) -> Self {
        block.header
    }
}

impl Block {
    pub fn id(&self) -> &BlockId {
        &self.block_id
    }

    pub fn previous_block_id(&self) -> &BlockId {
        &self.header.previous_block_id
    }

    pub fn state_root_hash(&self) -> &state::StateRoot {
        &self.header.state_root_hash
    }

    pub fn id_hex(&self) -> String {
        hex::encode(self.block_id)
    }
}

/// Read access to blocks already accepted onto some fork.
///
/// A miss is not an error: callers treat it as "no predecessor".
pub trait BlockCache: Send + Sync {
    fn get(&self, block_id: &BlockId) -> Option<Block>;
}

#[derive(Debug, Default)]
pub struct MemoryBlockCache {
    blocks: RwLock<HashMap<BlockId, Block>>
}

impl MemoryBlockCache {
    pub fn insert(&self, block: Block) {
        self.blocks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(block.block_id, block);
    }

    pub fn len(&self) -> usize {
        self.blocks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlockCache for MemoryBlockCache {
    fn get(&self, block_id: &BlockId) -> Option<Block> {
        self.blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(block_id)
            .cloned()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    fn header() -> Header {
        Header {
            block_num: 1,
            previous_block_id: NULL_BLOCK_ID,
            signer_public_key: String::from("ab"),
            consensus: b"{}".to_vec(),
            state_root_hash: [3u8; 32],
        }
    }

    #[test]
    fn id_commits_to_header() {
        let block = Block::from(header());
        assert_eq!(block.id(), &header().hash());
        let mut other = header();
        other.consensus = b"{ }".to_vec();
        assert_ne!(Block::from(other).id(), block.id());
        let mut other = header();
        other.signer_public_key = String::from("abc");
        assert_ne!(Block::from(other).id(), block.id());
    }

    #[test]
    fn json_keeps_id() {
        let block = Block::from(header());
        let ser = serde_json::to_string(&block).unwrap();
        assert!(ser.contains("\"consensus\":\"7b7d\""));
        let de: Block = serde_json::from_str(&ser).unwrap();
        assert_eq!(de, block);
        assert_eq!(de.id(), block.id());
    }

    #[test]
    fn cache_miss_is_none() {
        let cache = MemoryBlockCache::default();
        assert!(cache.is_empty());
        let block = Block::from(header());
        assert!(cache.get(block.id()).is_none());
        cache.insert(block.clone());
        assert_eq!(cache.get(block.id()), Some(block));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&NULL_BLOCK_ID).is_none());
    }
}
