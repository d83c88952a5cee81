//! # Policy
//!
//! Whether a transaction gets signed is not decided by this crate. It is
//! decided by a small Lua script the operator writes:
//!
//! ```lua
//! function validate(tx)
//!   return tx.to == "0x5597285BbE81BaF351e2C0884e9a5f4416958862"
//! end
//! ```
//!
//! The script sees a read-only `tx` with `to` (checksummed string, `nil`
//! for contract creation), `value` (decimal string) and `data` (raw byte
//! string). Only a literal `true` authorizes. Anything else, including a
//! crash, a missing `validate`, or a runaway loop, means "no".
//!
//! Two pieces live here:
//!
//! - [`PolicyEvaluator`]: the decision function. [`LuaPolicyEngine`] is the
//!   only implementation; it spins up a fresh sandboxed interpreter per call.
//! - [`PolicySource`]: the current script text, shared by every request and
//!   swappable at runtime without tearing.

pub mod engine;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::transaction::CandidateTransaction;

pub use engine::LuaPolicyEngine;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Evaluation failures. None of these are a denial: they mean the policy
/// could not produce an answer at all.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PolicyError {
    #[error("policy failed to load: {0}")]
    Load(String),

    #[error("policy runtime error: {0}")]
    Runtime(String),

    #[error("policy exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("policy source unavailable: {0}")]
    Source(String),
}

// ---------------------------------------------------------------------------
// Evaluator Trait
// ---------------------------------------------------------------------------

/// Decides whether a candidate transaction may be signed.
///
/// Implementations must be stateless between calls: two evaluations of the
/// same source and candidate give the same answer regardless of what ran in
/// between or alongside.
pub trait PolicyEvaluator: Send + Sync {
    /// `Ok(true)` authorizes, `Ok(false)` denies.
    fn evaluate(&self, source: &str, tx: &CandidateTransaction) -> Result<bool, PolicyError>;

    /// Loads `source` and confirms it defines a callable entry point,
    /// without evaluating any transaction.
    fn check(&self, source: &str) -> Result<(), PolicyError>;
}

// ---------------------------------------------------------------------------
// PolicySource
// ---------------------------------------------------------------------------

/// The live policy script.
///
/// Cloning is cheap and every clone sees the same script. Readers take a
/// snapshot with [`current`](Self::current) and keep evaluating against it
/// even if the script is replaced mid-request.
#[derive(Debug, Clone)]
pub struct PolicySource {
    script: Arc<RwLock<Arc<str>>>,
    path: Option<PathBuf>,
}

impl PolicySource {
    /// An in-memory script with no backing file.
    pub fn new(script: impl Into<Arc<str>>) -> Self {
        Self {
            script: Arc::new(RwLock::new(script.into())),
            path: None,
        }
    }

    /// Reads the script from `path`, remembering it for [`reload`](Self::reload).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref().to_path_buf();
        let script = read_script(&path)?;
        Ok(Self {
            script: Arc::new(RwLock::new(script.into())),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Snapshot of the script as it is right now.
    pub fn current(&self) -> Arc<str> {
        self.script.read().clone()
    }

    /// Swaps in a new script for every subsequent evaluation.
    pub fn replace(&self, script: impl Into<Arc<str>>) {
        *self.script.write() = script.into();
    }

    /// Re-reads the backing file and swaps it in if `evaluator` accepts it.
    ///
    /// On any failure the previous script stays in place.
    pub fn reload(&self, evaluator: &dyn PolicyEvaluator) -> Result<(), PolicyError> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| PolicyError::Source("policy has no backing file".into()))?;
        let script = read_script(path)?;
        evaluator.check(&script)?;
        self.replace(script);
        Ok(())
    }
}

fn read_script(path: &Path) -> Result<String, PolicyError> {
    std::fs::read_to_string(path)
        .map_err(|e| PolicyError::Source(format!("{}: {e}", path.display())))
}
