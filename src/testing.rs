//! Chain fixture for tests and benches.
//!
//! Issues simulator-signed wait certificates with the correct local mean and
//! chaining, so every block it appends is valid under the fixture's settings.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::account::Keypair;
use crate::block::{Block, Header, MemoryBlockCache, NULL_BLOCK_ID};
use crate::certificate::{self, Body, Payload, WaitCertificate, NULL_IDENTIFIER};
use crate::config::{Config, Policy};
use crate::enclave::{self, Enclave, EnclaveFactory, EnclaveVersion};
use crate::registry::{SignupInfo, ValidatorInfo};
use crate::settings;
use crate::simulator;
use crate::state::{MemoryStateStore, State, StateRoot};
use crate::timer::TimerSettings;
use crate::verifier::BlockVerifier;

const SIGNER_SEED: [u8; 32] = [1u8; 32];
const POET_SEED: [u8; 32] = [2u8; 32];

pub struct Chain {
    pub cache: Arc<MemoryBlockCache>,
    pub store: Arc<MemoryStateStore>,
    pub enclaves: Arc<EnclaveFactory>,
    pub timer: TimerSettings,
    pub version: EnclaveVersion,
    pub signer: Keypair,
    pub poet: Keypair,
    pub root: StateRoot,
    pub data_dir: PathBuf,
    genesis: Block,
    head: Block,
    // Most recent first.
    history: Vec<WaitCertificate>,
    branch: u64,
    branches: Arc<AtomicU64>,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    pub fn new() -> Self {
        Self::with_version(EnclaveVersion::V1)
    }

    pub fn with_version(version: EnclaveVersion) -> Self {
        let timer = TimerSettings {
            minimum_wait_time: 1.0,
            target_wait_time: 10.0,
            initial_wait_time: 100.0,
            certificate_sample_length: 5,
            fixed_duration_blocks: 5,
        };
        let signer = Keypair::from_seed(SIGNER_SEED).expect("fixed seed is a valid key");
        let poet = Keypair::from_seed(POET_SEED).expect("fixed seed is a valid key");
        let store = Arc::new(MemoryStateStore::default());
        let root = store.insert(base_state(version, &timer, &signer, &poet));
        let genesis = Block::from(Header {
            block_num: 0,
            previous_block_id: NULL_BLOCK_ID,
            signer_public_key: signer.public_hex(),
            consensus: Vec::new(),
            state_root_hash: root,
        });
        let cache = Arc::new(MemoryBlockCache::default());
        cache.insert(genesis.clone());
        Self {
            cache,
            store,
            enclaves: Arc::new(EnclaveFactory::default()),
            timer,
            version,
            signer,
            poet,
            root,
            data_dir: std::env::temp_dir().join("poet-verifier-fixture"),
            head: genesis.clone(),
            genesis,
            history: Vec::new(),
            branch: 0,
            branches: Arc::new(AtomicU64::new(1)),
        }
    }

    /// A sibling chain sharing this one's cache, store and keys from the
    /// current head onward.
    pub fn fork(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            store: Arc::clone(&self.store),
            enclaves: Arc::clone(&self.enclaves),
            timer: self.timer.clone(),
            version: self.version,
            signer: Keypair::from_seed(SIGNER_SEED).expect("fixed seed is a valid key"),
            poet: Keypair::from_seed(POET_SEED).expect("fixed seed is a valid key"),
            root: self.root,
            data_dir: self.data_dir.clone(),
            genesis: self.genesis.clone(),
            head: self.head.clone(),
            history: self.history.clone(),
            branch: self.branches.fetch_add(1, Ordering::SeqCst),
            branches: Arc::clone(&self.branches),
        }
    }

    pub fn registered_state(&self) -> State {
        base_state(self.version, &self.timer, &self.signer, &self.poet)
    }

    pub fn config(&self, policy: Policy) -> Config {
        Config { data_dir: self.data_dir.clone(), policy, timer: TimerSettings::default() }
    }

    pub fn verifier(&self, policy: Policy) -> BlockVerifier {
        BlockVerifier::with_factory(
            self.cache.clone(),
            self.store.clone(),
            self.config(policy),
            Arc::clone(&self.enclaves)
        )
    }

    pub fn enclave(&self) -> Arc<dyn Enclave> {
        self.enclaves
            .module(self.version, &self.data_dir)
            .expect("fixture enclave initializes")
    }

    pub fn genesis(&self) -> Block {
        self.genesis.clone()
    }

    pub fn head(&self) -> &Block {
        &self.head
    }

    pub fn history(&self) -> &[WaitCertificate] {
        &self.history
    }

    /// Certificate fields that validly follow the current head.
    pub fn next_body(&self) -> Body {
        let n = self.head.header.block_num + 1;
        let sample = &self.history[..self.history.len().min(self.timer.certificate_sample_length)];
        Body {
            previous_certificate_id: sample
                .first()
                .map(|c| c.identifier().to_string())
                .unwrap_or_else(|| NULL_IDENTIFIER.to_string()),
            local_mean: self.timer.compute_local_mean(sample),
            duration: self.timer.minimum_wait_time + 1.0 + (n % 3) as f64,
            request_time: n as f64,
            validator_address: self.signer.public_hex(),
            nonce: format!("{}-{}", self.branch, n),
            block_hash: self.head.id_hex(),
        }
    }

    pub fn sign(&self, body: &Body) -> WaitCertificate {
        let serialized = serde_json::to_string(body).expect("certificate body serializes");
        let sig = simulator::sign(self.version, &self.poet, &serialized);
        WaitCertificate::new(body.clone(), serialized, sig.to_bytes().to_vec())
    }

    pub fn payload(&self, certificate: &WaitCertificate) -> Vec<u8> {
        let payload = Payload {
            serialized_certificate: certificate.serialized().to_string(),
            signature: hex::encode(certificate.signature()),
        };
        serde_json::to_vec(&payload).expect("payload serializes")
    }

    /// Block on top of the head carrying `consensus`; not added to the cache.
    pub fn block_with_payload(&self, consensus: Vec<u8>) -> Block {
        Block::from(Header {
            block_num: self.head.header.block_num + 1,
            previous_block_id: *self.head.id(),
            signer_public_key: self.signer.public_hex(),
            consensus,
            state_root_hash: self.root,
        })
    }

    pub fn candidate(&self) -> Block {
        self.block_with_payload(self.payload(&self.sign(&self.next_body())))
    }

    /// Appends `block` as the new head.
    pub fn push(&mut self, block: Block) {
        let enclave = self.enclave();
        if let Ok(Some(certificate)) = certificate::deserialize_wait_certificate(&block, enclave.as_ref()) {
            self.history.insert(0, certificate);
        }
        self.cache.insert(block.clone());
        self.head = block;
    }

    pub fn extend(&mut self, count: usize) {
        for _ in 0..count {
            let block = self.candidate();
            self.push(block);
        }
    }
}

fn base_state(version: EnclaveVersion, timer: &TimerSettings, signer: &Keypair, poet: &Keypair) -> State {
    let mut state = State::default();
    state.set(enclave::VERSION_KEY, version.to_string().into_bytes());
    for (key, value) in [
        (settings::MINIMUM_WAIT_TIME_KEY, timer.minimum_wait_time.to_string()),
        (settings::TARGET_WAIT_TIME_KEY, timer.target_wait_time.to_string()),
        (settings::INITIAL_WAIT_TIME_KEY, timer.initial_wait_time.to_string()),
        (settings::SAMPLE_LENGTH_KEY, timer.certificate_sample_length.to_string()),
        (settings::FIXED_DURATION_BLOCKS_KEY, timer.fixed_duration_blocks.to_string()),
    ] {
        state.set(key, value.into_bytes());
    }
    let info = ValidatorInfo {
        name: String::from("validator-0"),
        id: signer.public_hex(),
        signup_info: SignupInfo {
            poet_public_key: poet.public_hex(),
            proof_data: String::from("{}"),
            anti_sybil_id: String::from("simulated"),
            nonce: String::from("0"),
        },
    };
    state.set(
        ValidatorInfo::address(&info.id),
        serde_json::to_vec(&info).expect("validator info serializes")
    );
    state
}

#[derive(Clone)]
struct CaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with a thread-local subscriber and returns what it logged.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let writer = CaptureWriter { buffer: Arc::clone(&buffer) };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8_lossy(&buffer.lock().unwrap_or_else(PoisonError::into_inner)).into_owned();
    (result, logs)
}
