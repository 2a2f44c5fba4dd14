//! Fault injection for the mock adapter.
//!
//! Enables configurable failures per adapter operation or per tag, so the
//! query façade's per-tag isolation and the polling bridge's retry loop can
//! be exercised deterministically.

use super::rng::MockRng;
use anyhow::{bail, Result};
use hist_core::TagKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Operation name of tag resolution.
pub const OP_RESOLVE: &str = "resolve_tag";
/// Operation name of raw reads.
pub const OP_READ_RAW: &str = "read_raw";
/// Operation name of snapshot reads.
pub const OP_READ_SNAPSHOT: &str = "read_snapshot";
/// Operation name of native push subscribe calls.
pub const OP_SUBSCRIBE: &str = "subscribe";

/// A specific failure scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultScenario {
    /// The next `count` calls of `operation` fail, later ones succeed.
    FailNext {
        /// One of the `OP_*` names.
        operation: &'static str,
        /// Calls that fail.
        count: u32,
    },
    /// `operation` succeeds `count` times, then fails forever.
    FailAfterN {
        /// One of the `OP_*` names.
        operation: &'static str,
        /// Calls that succeed first.
        count: u32,
    },
    /// Raw reads of `tag` fail when opened.
    TagOffline {
        /// Tag id or name.
        tag: String,
    },
    /// Raw streams of `tag` yield an error after `count` samples.
    BreakStreamAfter {
        /// Tag id or name.
        tag: String,
        /// Samples yielded before the error.
        count: usize,
    },
}

#[derive(Default, Debug)]
struct FaultState {
    /// Calls per operation, for FailNext/FailAfterN
    operation_counts: HashMap<&'static str, u32>,
}

/// Fault injection configuration
#[derive(Clone, Debug)]
pub struct FaultConfig {
    /// Per-operation failure rate (0.0 to 1.0), `"*"` for all
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<FaultScenario>>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<FaultState>>,
}

impl FaultConfig {
    /// No faults (default)
    pub fn none() -> Self {
        Self::scenarios(Vec::new())
    }

    /// Uniform random failures on every operation, with a fixed seed.
    pub fn random_failures_seeded(rate: f64, seed: u64) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(Vec::new()),
            rng: Arc::new(MockRng::new(Some(seed))),
            state: Arc::new(Mutex::new(FaultState::default())),
        }
    }

    /// A single scenario.
    pub fn scenario(scenario: FaultScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Multiple scenarios.
    pub fn scenarios(scenarios: Vec<FaultScenario>) -> Self {
        Self {
            failure_rates: Arc::new(HashMap::new()),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(None)),
            state: Arc::new(Mutex::new(FaultState::default())),
        }
    }

    /// Check whether `operation` should fail now.
    pub fn check_operation(&self, operation: &'static str) -> Result<()> {
        let mut state = self.state.lock();
        let calls = {
            let count = state.operation_counts.entry(operation).or_insert(0);
            *count += 1;
            *count
        };

        for scenario in self.scenarios.iter() {
            match scenario {
                FaultScenario::FailNext { operation: op, count } if *op == operation => {
                    if calls <= *count {
                        bail!("injected failure {calls}/{count} on '{operation}'");
                    }
                }
                FaultScenario::FailAfterN { operation: op, count } if *op == operation => {
                    if calls > *count {
                        bail!("injected failure after {count} '{operation}' calls");
                    }
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);
        if self.rng.should_fail(rate) {
            bail!("random failure on operation '{operation}'");
        }
        Ok(())
    }

    /// Check whether raw reads of `tag` should fail.
    pub fn check_tag(&self, tag: &str) -> Result<()> {
        let offline = self.scenarios.iter().any(|s| {
            matches!(s, FaultScenario::TagOffline { tag: t } if TagKey::same_identifier(t, tag))
        });
        if offline {
            bail!("tag '{tag}' is offline");
        }
        Ok(())
    }

    /// Number of samples after which raw streams of `tag` break, if any.
    pub fn stream_break(&self, tag: &str) -> Option<usize> {
        self.scenarios.iter().find_map(|s| match s {
            FaultScenario::BreakStreamAfter { tag: t, count } if TagKey::same_identifier(t, tag) => {
                Some(*count)
            }
            _ => None,
        })
    }

    /// Reset call counters.
    pub fn reset(&self) {
        *self.state.lock() = FaultState::default();
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_faults() {
        let config = FaultConfig::none();
        for _ in 0..100 {
            assert!(config.check_operation(OP_READ_RAW).is_ok());
        }
        assert!(config.check_tag("any").is_ok());
    }

    #[test]
    fn test_random_failures() {
        let config = FaultConfig::random_failures_seeded(0.5, 42);
        let failures = (0..1000)
            .filter(|_| config.check_operation(OP_READ_SNAPSHOT).is_err())
            .count();
        assert!(failures > 400 && failures < 600, "Got {} failures", failures);
    }

    #[test]
    fn test_fail_next_then_recover() {
        let config = FaultConfig::scenario(FaultScenario::FailNext {
            operation: OP_READ_SNAPSHOT,
            count: 2,
        });
        assert!(config.check_operation(OP_READ_SNAPSHOT).is_err());
        assert!(config.check_operation(OP_READ_SNAPSHOT).is_err());
        assert!(config.check_operation(OP_READ_SNAPSHOT).is_ok());
        // Other operations unaffected
        assert!(config.check_operation(OP_READ_RAW).is_ok());
    }

    #[test]
    fn test_fail_after_n() {
        let config = FaultConfig::scenario(FaultScenario::FailAfterN {
            operation: OP_READ_RAW,
            count: 3,
        });
        for i in 0..3 {
            assert!(config.check_operation(OP_READ_RAW).is_ok(), "call {}", i + 1);
        }
        assert!(config.check_operation(OP_READ_RAW).is_err());
        config.reset();
        assert!(config.check_operation(OP_READ_RAW).is_ok());
    }

    #[test]
    fn test_tag_scenarios_are_case_insensitive() {
        let config = FaultConfig::scenarios(vec![
            FaultScenario::TagOffline { tag: "Pump.Speed".into() },
            FaultScenario::BreakStreamAfter { tag: "Tank.Level".into(), count: 3 },
        ]);
        assert!(config.check_tag("pump.speed").is_err());
        assert!(config.check_tag("tank.level").is_ok());
        assert_eq!(config.stream_break("TANK.LEVEL"), Some(3));
        assert_eq!(config.stream_break("pump.speed"), None);
    }
}
