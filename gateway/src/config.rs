//! # Gateway Configuration & Constants
//!
//! Defaults for the HTTP surface, the policy sandbox, the ledger and nonce
//! reservations. The
//! node binary exposes most of these as CLI flags; the library only ever
//! reads them through [`PolicyLimits`] or the constants below.

use std::time::Duration;

// ---------------------------------------------------------------------------
// HTTP Surface
// ---------------------------------------------------------------------------

/// Default port for the proxy API.
pub const DEFAULT_PORT: u16 = 8080;

/// Default port for the Prometheus metrics endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9090;

/// Path prefix every proxy route hangs off.
pub const API_PREFIX: &str = "/v1/proxy";

/// Realm advertised in `WWW-Authenticate` when basic auth fails.
pub const AUTH_REALM: &str = "Restricted";

// ---------------------------------------------------------------------------
// Policy Sandbox
// ---------------------------------------------------------------------------

/// Default policy file, resolved relative to the working directory.
pub const DEFAULT_POLICY_PATH: &str = "rules.lua";

/// Name of the global function a policy script must define.
pub const POLICY_ENTRY_POINT: &str = "validate";

/// Wall-clock budget for one policy evaluation, load and call included.
pub const DEFAULT_POLICY_TIMEOUT: Duration = Duration::from_millis(250);

/// The deadline is checked every this many VM instructions.
pub const DEFAULT_POLICY_HOOK_INTERVAL: u32 = 1_000;

/// Memory ceiling for a single interpreter instance.
pub const DEFAULT_POLICY_MEMORY_LIMIT: usize = 16 * 1024 * 1024;

/// Resource limits applied to every policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyLimits {
    /// Evaluations running longer than this fail with a timeout.
    pub timeout: Duration,
    /// Instruction count between deadline checks.
    pub hook_interval: u32,
    /// Maximum bytes the interpreter may allocate.
    pub memory_limit: usize,
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_POLICY_TIMEOUT,
            hook_interval: DEFAULT_POLICY_HOOK_INTERVAL,
            memory_limit: DEFAULT_POLICY_MEMORY_LIMIT,
        }
    }
}

impl PolicyLimits {
    /// Same limits with a different deadline.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Directory (under the data dir) holding the sled ledger.
pub const LEDGER_DIR: &str = "ledger";

// ---------------------------------------------------------------------------
// Nonces
// ---------------------------------------------------------------------------

/// How long a nonce the node accepted stays reserved while the node's
/// pending count has not reached it. Past this the node is assumed to have
/// dropped the transaction and the nonce is handed out again.
pub const DEFAULT_NONCE_SETTLE_GRACE: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_match_constants() {
        let limits = PolicyLimits::default();
        assert_eq!(limits.timeout, DEFAULT_POLICY_TIMEOUT);
        assert_eq!(limits.hook_interval, DEFAULT_POLICY_HOOK_INTERVAL);
        assert_eq!(limits.memory_limit, DEFAULT_POLICY_MEMORY_LIMIT);
    }

    #[test]
    fn with_timeout_keeps_other_limits() {
        let limits = PolicyLimits::default().with_timeout(Duration::from_millis(5));
        assert_eq!(limits.timeout, Duration::from_millis(5));
        assert_eq!(limits.memory_limit, DEFAULT_POLICY_MEMORY_LIMIT);
    }

    #[test]
    fn ports_are_distinct() {
        assert_ne!(DEFAULT_PORT, DEFAULT_METRICS_PORT);
    }
}
