use std::collections::HashMap;
use std::fmt::{self, Debug, Display};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::{Lazy, OnceCell};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::info;

use crate::account::PublicKey;
use crate::certificate::{self, WaitCertificate};
use crate::settings::SettingsView;
use crate::simulator;
use crate::state::StateView;

/// Setting naming the attestation scheme in force at a given state.
pub const VERSION_KEY: &str = "poet.enclave_module.version";

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown enclave module version {0:?}")]
    UnknownVersion(String),
    #[error("enclave data directory {path:?}: {source}")]
    DataDir { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EnclaveVersion {
    V1,
    V2,
}

impl FromStr for EnclaveVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(EnclaveVersion::V1),
            "2" => Ok(EnclaveVersion::V2),
            other => Err(Error::UnknownVersion(other.to_string())),
        }
    }
}

impl Display for EnclaveVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnclaveVersion::V1 => write!(f, "1"),
            EnclaveVersion::V2 => write!(f, "2"),
        }
    }
}

/// The attestation capability the verifier relies on.
pub trait Enclave: Send + Sync + Debug {
    fn version(&self) -> EnclaveVersion;

    /// Fails with a structural error when the certificate cannot be read.
    fn deserialize_wait_certificate(
        &self,
        serialized: &str,
        signature: &str
    ) -> Result<WaitCertificate, certificate::Error>;

    /// Fails with a validation error when the signature does not hold.
    fn verify_wait_certificate(
        &self,
        certificate: &WaitCertificate,
        poet_public_key: &PublicKey
    ) -> Result<(), certificate::Error>;
}

type Slot = Arc<OnceCell<Arc<dyn Enclave>>>;

/// Enclave modules keyed by scheme version, each initialised at most once.
#[derive(Debug, Default)]
pub struct EnclaveFactory {
    modules: Mutex<HashMap<EnclaveVersion, Slot>>
}

static GLOBAL: Lazy<Arc<EnclaveFactory>> = Lazy::new(|| Arc::new(EnclaveFactory::default()));

impl EnclaveFactory {
    pub fn global() -> Arc<EnclaveFactory> {
        Arc::clone(&GLOBAL)
    }

    /// Scheme version in force at `state`; version 1 until one is set.
    pub fn version_for(state: &StateView) -> Result<EnclaveVersion, Error> {
        match SettingsView::new(state).get(VERSION_KEY) {
            Some(raw) => raw.parse(),
            None if state.get(VERSION_KEY).is_some() => {
                Err(Error::UnknownVersion(String::from("<non utf-8>")))
            }
            None => Ok(EnclaveVersion::V1),
        }
    }

    pub fn get_enclave_module(&self, state: &StateView, data_dir: &Path) -> Result<Arc<dyn Enclave>, Error> {
        self.module(Self::version_for(state)?, data_dir)
    }

    /// The first caller for a version initialises it with its `data_dir`;
    /// later callers share that instance.
    pub fn module(&self, version: EnclaveVersion, data_dir: &Path) -> Result<Arc<dyn Enclave>, Error> {
        let slot = {
            let mut modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(modules.entry(version).or_default())
        };
        slot.get_or_try_init(|| {
            info!(%version, data_dir = %data_dir.display(), "Initializing PoET enclave module");
            simulator::initialize(version, data_dir)
        })
        .map(Arc::clone)
    }

    pub fn loaded(&self) -> Vec<EnclaveVersion> {
        let modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
        let mut versions: Vec<EnclaveVersion> = modules
            .iter()
            .filter(|(_, slot)| slot.get().is_some())
            .map(|(version, _)| *version)
            .collect();
        versions.sort();
        versions
    }
}
