use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::account;
use crate::block::{Block, BlockCache};
use crate::certificate;
use crate::config::{Config, Policy};
use crate::enclave::{self, EnclaveFactory};
use crate::registry::{self, RegistryView};
use crate::settings::SettingsView;
use crate::state::{self, StateRoot, StateViewFactory};

/// Collaborator failures outside the expected rejection paths. Each one
/// rejects the block being checked and nothing else.
#[derive(Debug, Error)]
pub enum Error {
    #[error("state unavailable: {0}")]
    State(#[from] state::Error),
    #[error("enclave unavailable: {0}")]
    Enclave(#[from] enclave::Error),
    #[error("registry unreadable: {0}")]
    Registry(#[from] registry::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Valid,
    /// Nobody is registered yet, so there is no key to check against.
    Bootstrap,
    /// Certificate failed validation but policy admits it.
    Lenient(certificate::Error),
    Unregistered,
    Malformed(certificate::Error),
    /// Certificate failed validation under the strict policy.
    Invalid(certificate::Error),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Valid | Verdict::Bootstrap | Verdict::Lenient(_))
    }
}

/// Decides whether candidate blocks satisfy the PoET consensus rules.
///
/// Holds read-only handles only, so a single verifier can check blocks from
/// competing forks on several threads at once.
pub struct BlockVerifier {
    block_cache: Arc<dyn BlockCache>,
    state_view_factory: Arc<dyn StateViewFactory>,
    enclaves: Arc<EnclaveFactory>,
    config: Config,
}

impl BlockVerifier {
    pub fn new(
        block_cache: Arc<dyn BlockCache>,
        state_view_factory: Arc<dyn StateViewFactory>,
        config: Config
    ) -> Self {
        Self::with_factory(block_cache, state_view_factory, config, EnclaveFactory::global())
    }

    pub fn with_factory(
        block_cache: Arc<dyn BlockCache>,
        state_view_factory: Arc<dyn StateViewFactory>,
        config: Config,
        enclaves: Arc<EnclaveFactory>
    ) -> Self {
        Self { block_cache, state_view_factory, enclaves, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// State root the block is judged against: the predecessor's, or the
    /// block's own when the predecessor is unknown (chain start).
    pub fn context_root(&self, block: &Block) -> StateRoot {
        match self.block_cache.get(block.previous_block_id()) {
            Some(previous) => *previous.state_root_hash(),
            None => *block.state_root_hash(),
        }
    }

    /// Returns whether `block` may extend its fork. Never panics.
    pub fn verify(&self, block: &Block) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| self.check(block))) {
            Ok(Ok(verdict)) => verdict.is_accepted(),
            Ok(Err(e)) => {
                error!(block_id = %block.id_hex(), error = %e, "Block verification failed");
                false
            }
            Err(_) => {
                error!(block_id = %block.id_hex(), "Block verification panicked");
                false
            }
        }
    }

    pub fn check(&self, block: &Block) -> Result<Verdict, Error> {
        let block_id = block.id_hex();
        let state_root = self.context_root(block);
        let state_view = self.state_view_factory.create_view(&state_root)?;
        let enclave = self.enclaves.get_enclave_module(&state_view, &self.config.data_dir)?;

        let registry = RegistryView::new(&state_view);
        if registry.count() == 0 {
            warn!(block_id = %block_id, "Block accepted by default because no validators registered");
            return Ok(Verdict::Bootstrap);
        }

        let validator_info = match registry.get_validator_info(&block.header.signer_public_key) {
            Ok(info) => info,
            Err(registry::Error::NotFound(signer)) => {
                error!(
                    block_id = %block_id,
                    signer = %account::abbrev(&signer),
                    "Attempted to verify block from validator with no validator registry entry"
                );
                return Ok(Verdict::Unregistered);
            }
            Err(e) => return Err(e.into()),
        };
        debug!(
            name = %validator_info.name,
            id = %account::abbrev(&validator_info.id),
            poet_public_key = %account::abbrev(&validator_info.signup_info.poet_public_key),
            "Block signer"
        );
        let poet_public_key = validator_info.poet_public_key()?;

        let timer = SettingsView::new(&state_view).timer_settings(&self.config.timer);
        let certificates = certificate::build_certificate_list(
            &block.header,
            self.block_cache.as_ref(),
            enclave.as_ref(),
            timer.certificate_sample_length
        );

        let wait_certificate = match certificate::deserialize_wait_certificate(block, enclave.as_ref()) {
            Ok(Some(wait_certificate)) => wait_certificate,
            Ok(None) => {
                let e = certificate::Error::Malformed(String::from("block carries no wait certificate"));
                error!(block_id = %block_id, error = %e, "Wait certificate is missing");
                return Ok(Verdict::Malformed(e));
            }
            Err(e) => {
                error!(block_id = %block_id, error = %e, "Wait certificate could not be deserialized");
                return Ok(Verdict::Malformed(e));
            }
        };

        match wait_certificate.check_valid(enclave.as_ref(), &certificates, &poet_public_key, &timer) {
            Ok(()) => {
                debug!(
                    block_id = %block_id,
                    certificate_id = %wait_certificate.identifier(),
                    sample = certificates.len(),
                    "Wait certificate is valid"
                );
                Ok(Verdict::Valid)
            }
            Err(e) => {
                error!(block_id = %block_id, error = %e, "Wait certificate is not valid");
                match self.config.policy {
                    Policy::Lenient => {
                        // TODO: make Policy::Strict the default.
                        warn!(block_id = %block_id, "We will accept for now");
                        Ok(Verdict::Lenient(e))
                    }
                    Policy::Strict => Ok(Verdict::Invalid(e)),
                }
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use std::thread;

    use super::*;
    use crate::account::Keypair;
    use crate::block::{BlockId, Header, MemoryBlockCache, NULL_BLOCK_ID};
    use crate::state::State;
    use crate::testing::{capture_logs, Chain};

    #[test]
    fn bootstrap_uses_own_root() {
        let chain = Chain::new();
        let verifier = chain.verifier(Policy::Lenient);
        let mut header = chain.candidate().header;
        header.previous_block_id = [42u8; 32];
        header.state_root_hash = [7u8; 32];
        let orphan = Block::from(header);
        assert_eq!(verifier.context_root(&orphan), [7u8; 32]);
    }

    #[test]
    fn known_predecessor_root_wins() {
        let mut chain = Chain::new();
        chain.extend(2);
        let verifier = chain.verifier(Policy::Lenient);
        let mut header = chain.candidate().header;
        header.state_root_hash = [7u8; 32];
        let block = Block::from(header);
        assert_eq!(verifier.context_root(&block), *chain.head().state_root_hash());
        assert_ne!(verifier.context_root(&block), [7u8; 32]);
    }

    #[test]
    fn empty_registry_accepts_anything() {
        let chain = Chain::new();
        let verifier = chain.verifier(Policy::Strict);
        let root = chain.store.insert(State::default());
        for payload in [Vec::new(), b"garbage".to_vec(), chain.candidate().header.consensus] {
            let block = Block::from(Header {
                block_num: 0,
                previous_block_id: NULL_BLOCK_ID,
                signer_public_key: Keypair::gen().public_hex(),
                consensus: payload,
                state_root_hash: root,
            });
            let (verdict, logs) = capture_logs(|| verifier.check(&block).unwrap());
            assert_eq!(verdict, Verdict::Bootstrap);
            assert!(logs.contains("Block accepted by default because no validators registered"));
            assert!(verifier.verify(&block));
        }
    }

    #[test]
    fn valid_chain_accepted() {
        let mut chain = Chain::new();
        let verifier = chain.verifier(Policy::Strict);
        // Walk well past the sample length so the bounded history is used.
        for _ in 0..chain.timer.certificate_sample_length * 2 + 1 {
            let candidate = chain.candidate();
            assert_eq!(verifier.check(&candidate).unwrap(), Verdict::Valid);
            chain.push(candidate);
        }
    }

    #[test]
    fn valid_on_v2_enclave() {
        let mut chain = Chain::with_version(crate::enclave::EnclaveVersion::V2);
        chain.extend(3);
        let verifier = chain.verifier(Policy::Strict);
        assert_eq!(verifier.check(&chain.candidate()).unwrap(), Verdict::Valid);
    }

    #[test]
    fn unregistered_proposer_rejected() {
        let mut chain = Chain::new();
        chain.extend(2);
        let verifier = chain.verifier(Policy::Lenient);
        let stranger = Keypair::gen();
        let mut header = chain.candidate().header;
        header.signer_public_key = stranger.public_hex();
        let block = Block::from(header);
        let (verdict, logs) = capture_logs(|| verifier.check(&block).unwrap());
        assert_eq!(verdict, Verdict::Unregistered);
        assert!(logs.contains("no validator registry entry"));
        assert!(logs.contains("ERROR"));
        assert!(!verifier.verify(&block));
    }

    #[test]
    fn non_ascii_signer_logged_without_panic() {
        let chain = Chain::new();
        let verifier = chain.verifier(Policy::Lenient);
        let mut header = chain.candidate().header;
        header.signer_public_key = format!("a{}", "é".repeat(16));
        let block = Block::from(header);
        let (verdict, logs) = capture_logs(|| verifier.check(&block).unwrap());
        assert_eq!(verdict, Verdict::Unregistered);
        assert!(logs.contains("aééééééé..."));
        let (ok, _) = capture_logs(|| verifier.verify(&block));
        assert!(!ok);
    }

    #[test]
    fn non_ascii_registry_id_logged_without_panic() {
        let chain = Chain::new();
        let id = format!("a{}", "é".repeat(16));
        let mut info: crate::registry::ValidatorInfo = serde_json::from_slice(
            chain.registered_state()
                .get(&crate::registry::ValidatorInfo::address(&chain.signer.public_hex()))
                .unwrap()
        ).unwrap();
        info.id = id.clone();
        let mut state = chain.registered_state();
        state.set(crate::registry::ValidatorInfo::address(&id), serde_json::to_vec(&info).unwrap());
        let root = chain.store.insert(state);
        let verifier = chain.verifier(Policy::Strict);
        let mut header = chain.candidate().header;
        header.signer_public_key = id;
        header.previous_block_id = NULL_BLOCK_ID;
        header.state_root_hash = root;
        let block = Block::from(header);
        let (verdict, _) = capture_logs(|| verifier.check(&block).unwrap());
        assert_eq!(verdict, Verdict::Valid);
    }

    #[test]
    fn huge_sample_length_setting() {
        let chain = Chain::new();
        let mut state = chain.registered_state();
        state.set(crate::settings::SAMPLE_LENGTH_KEY, b"1000000000000".to_vec());
        let root = chain.store.insert(state);
        let verifier = chain.verifier(Policy::Strict);
        let mut header = chain.candidate().header;
        header.previous_block_id = NULL_BLOCK_ID;
        header.state_root_hash = root;
        let block = Block::from(header);
        assert!(verifier.verify(&block));
    }

    #[test]
    fn malformed_certificate_rejected() {
        let mut chain = Chain::new();
        chain.extend(3);
        let verifier = chain.verifier(Policy::Lenient);
        let mut payload = chain.candidate().header.consensus;
        payload.truncate(payload.len() - 5);
        let block = chain.block_with_payload(payload);
        let (verdict, logs) = capture_logs(|| verifier.check(&block).unwrap());
        assert!(matches!(verdict, Verdict::Malformed(ref e) if e.is_structural()));
        assert!(logs.contains("could not be deserialized"));
        assert!(!verifier.verify(&block));
    }

    #[test]
    fn missing_certificate_rejected() {
        let chain = Chain::new();
        let verifier = chain.verifier(Policy::Lenient);
        let block = chain.block_with_payload(Vec::new());
        assert!(matches!(verifier.check(&block).unwrap(), Verdict::Malformed(_)));
        assert!(!verifier.verify(&block));
    }

    #[test]
    fn out_of_distribution_accepted_leniently() {
        let mut chain = Chain::new();
        chain.extend(4);
        let verifier = chain.verifier(Policy::Lenient);
        let mut body = chain.next_body();
        body.local_mean *= 3.0;
        let block = chain.block_with_payload(chain.payload(&chain.sign(&body)));
        let (verdict, logs) = capture_logs(|| verifier.check(&block).unwrap());
        assert!(matches!(verdict, Verdict::Lenient(certificate::Error::LocalMean { .. })));
        assert!(logs.contains("Wait certificate is not valid"));
        assert!(logs.contains("WARN"));
        assert!(logs.contains("We will accept for now"));
        assert!(verifier.verify(&block));
    }

    #[test]
    fn out_of_distribution_rejected_when_strict() {
        let mut chain = Chain::new();
        chain.extend(4);
        let verifier = chain.verifier(Policy::Strict);
        let mut body = chain.next_body();
        body.local_mean *= 3.0;
        let block = chain.block_with_payload(chain.payload(&chain.sign(&body)));
        assert!(matches!(verifier.check(&block).unwrap(), Verdict::Invalid(certificate::Error::LocalMean { .. })));
        assert!(!verifier.verify(&block));
    }

    #[test]
    fn forged_signature_lenient() {
        let mut chain = Chain::new();
        chain.extend(1);
        let verifier = chain.verifier(Policy::Lenient);
        let body = chain.next_body();
        let serialized = serde_json::to_string(&body).unwrap();
        let forged = Keypair::gen().sign(serialized.as_bytes());
        let cert = certificate::WaitCertificate::new(body, serialized, forged.to_bytes().to_vec());
        let block = chain.block_with_payload(chain.payload(&cert));
        assert_eq!(verifier.check(&block).unwrap(), Verdict::Lenient(certificate::Error::BadSig));
    }

    #[test]
    fn fork_uses_own_history() {
        let mut chain = Chain::new();
        chain.extend(3);
        let mut fork = chain.fork();
        chain.extend(2);
        fork.extend(4);
        let verifier = chain.verifier(Policy::Strict);
        // both forks share one cache
        assert_eq!(verifier.check(&chain.candidate()).unwrap(), Verdict::Valid);
        assert_eq!(verifier.check(&fork.candidate()).unwrap(), Verdict::Valid);
        // a certificate chained to the other fork's head does not fit here
        let cross = chain.block_with_payload(fork.candidate().header.consensus);
        assert!(matches!(verifier.check(&cross).unwrap(), Verdict::Invalid(_)));
    }

    #[test]
    fn unknown_state_root_rejected() {
        let chain = Chain::new();
        let verifier = chain.verifier(Policy::Lenient);
        let mut header = chain.candidate().header;
        header.previous_block_id = [1u8; 32];
        header.state_root_hash = [2u8; 32];
        let block = Block::from(header);
        assert!(matches!(verifier.check(&block), Err(Error::State(_))));
        let (ok, logs) = capture_logs(|| verifier.verify(&block));
        assert!(!ok);
        assert!(logs.contains("Block verification failed"));
    }

    #[test]
    fn corrupt_registry_entry_rejected() {
        let chain = Chain::new();
        let mut state = chain.registered_state();
        state.set(crate::registry::ValidatorInfo::address(&chain.signer.public_hex()), b"{".to_vec());
        let root = chain.store.insert(state);
        let verifier = chain.verifier(Policy::Lenient);
        let mut header = chain.candidate().header;
        header.previous_block_id = NULL_BLOCK_ID;
        header.state_root_hash = root;
        let block = Block::from(header);
        assert!(matches!(verifier.check(&block), Err(Error::Registry(_))));
        assert!(!verifier.verify(&block));
    }

    struct PanickingCache;

    impl BlockCache for PanickingCache {
        fn get(&self, _: &BlockId) -> Option<Block> {
            panic!("block store exploded")
        }
    }

    #[test]
    fn collaborator_panic_is_contained() {
        let chain = Chain::new();
        let verifier = BlockVerifier::with_factory(
            Arc::new(PanickingCache),
            chain.store.clone(),
            chain.config(Policy::Lenient),
            Arc::new(EnclaveFactory::default())
        );
        let hook = panic::take_hook();
        panic::set_hook(Box::new(|_| {}));
        let ok = verifier.verify(&chain.candidate());
        panic::set_hook(hook);
        assert!(!ok);
    }

    #[test]
    fn concurrent_forks() {
        let mut chain = Chain::new();
        chain.extend(2);
        let mut forks: Vec<Chain> = (0..4).map(|_| chain.fork()).collect();
        for (i, fork) in forks.iter_mut().enumerate() {
            fork.extend(i + 1);
        }
        let verifier = chain.verifier(Policy::Strict);
        let candidates: Vec<Block> = forks.iter().map(Chain::candidate).collect();
        let verifier = &verifier;
        let results: Vec<bool> = thread::scope(|s| {
            let handles: Vec<_> = candidates
                .iter()
                .map(|block| s.spawn(move || verifier.verify(block)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(results.iter().all(|ok| *ok));
    }

    #[test]
    fn global_factory_verifier() {
        let mut chain = Chain::new();
        chain.extend(1);
        let verifier = BlockVerifier::new(chain.cache.clone(), chain.store.clone(), chain.config(Policy::Strict));
        assert!(verifier.verify(&chain.candidate()));
        assert_eq!(verifier.config().policy, Policy::Strict);
    }

    #[test]
    fn separate_cache_without_history() {
        // Predecessor unknown: the block's own root is used and its
        // certificate must chain to nothing.
        let chain = Chain::new();
        let cache = Arc::new(MemoryBlockCache::default());
        let verifier = BlockVerifier::with_factory(
            cache,
            chain.store.clone(),
            chain.config(Policy::Strict),
            Arc::new(EnclaveFactory::default())
        );
        assert_eq!(verifier.check(&chain.candidate()).unwrap(), Verdict::Valid);
    }
}
