//! Reconciliation primitives.
//!
//! This library holds the pure, side-effect free parts of the placement
//! reconciler so they can be tested without a runtime. Key concepts:
//!
//! - **Lookup**: a store read is one of `Found`, `NotFound` or `ReadError`.
//!   Callers must pick a [`ReadErrorPolicy`] to turn it into a yes/no.
//! - **Health**: what the observed instances say about a service.
//! - **Heal action**: the single corrective step a tick takes for a health
//!   verdict.
//!
//! # Invariants
//!
//! - All corrective actions are idempotent by service identity
//! - Decisions are deterministic given the same inputs (host choice takes
//!   the RNG as an argument)

use std::str::FromStr;
use std::time::Duration;

use rand::seq::IndexedRandom;
use rand::Rng;
use thiserror::Error;

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// An unknown policy name was supplied.
    #[error("unknown read error policy: {0}")]
    UnknownPolicy(String),
}

// =============================================================================
// Store lookups
// =============================================================================

/// Result of reading a single key from the desired-state store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    /// The key exists.
    Found(T),

    /// The store answered and the key does not exist.
    NotFound,

    /// The store could not answer.
    ReadError(String),
}

impl<T> Lookup<T> {
    /// Decide whether the key exists, resolving read errors with `policy`.
    pub fn exists(&self, policy: ReadErrorPolicy) -> bool {
        match self {
            Lookup::Found(_) => true,
            Lookup::NotFound => false,
            Lookup::ReadError(_) => policy == ReadErrorPolicy::AssumePresent,
        }
    }

    /// Returns true if the read failed.
    pub fn is_read_error(&self) -> bool {
        matches!(self, Lookup::ReadError(_))
    }

    /// Map the found value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Lookup<U> {
        match self {
            Lookup::Found(v) => Lookup::Found(f(v)),
            Lookup::NotFound => Lookup::NotFound,
            Lookup::ReadError(e) => Lookup::ReadError(e),
        }
    }
}

/// How an existence check treats a failed store read.
///
/// `AssumeAbsent` favors one extra create attempt over a missed create.
/// The caller keeps that attempt idempotent by reusing the current pin.
/// `AssumePresent` never creates on a failed read and waits for the next
/// tick instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadErrorPolicy {
    #[default]
    AssumeAbsent,
    AssumePresent,
}

impl FromStr for ReadErrorPolicy {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assume_absent" => Ok(Self::AssumeAbsent),
            "assume_present" => Ok(Self::AssumePresent),
            other => Err(ReconcileError::UnknownPolicy(other.to_string())),
        }
    }
}

// =============================================================================
// Health
// =============================================================================

/// Health verdict for a service after observing its instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Health {
    /// At least one instance exists.
    pub deployed: bool,

    /// At least one instance reports `loaded`.
    pub loaded: bool,
}

impl Health {
    /// Nothing is deployed.
    pub const ABSENT: Self = Self {
        deployed: false,
        loaded: false,
    };

    /// Instances exist but none is loaded.
    pub const STALLED: Self = Self {
        deployed: true,
        loaded: false,
    };

    /// At least one instance is loaded.
    pub const HEALTHY: Self = Self {
        deployed: true,
        loaded: true,
    };

    /// Derive a verdict from instance counts.
    pub fn from_counts(total: usize, loaded: usize) -> Self {
        match (total, loaded) {
            (0, _) => Self::ABSENT,
            (_, 0) => Self::STALLED,
            _ => Self::HEALTHY,
        }
    }

    /// True when instances exist but none is loaded yet.
    ///
    /// This is the only verdict worth a second look after a startup grace
    /// period.
    pub fn needs_recheck(&self) -> bool {
        *self == Self::STALLED
    }

    /// The corrective action for this verdict.
    pub fn heal_action(&self) -> HealAction {
        match (self.deployed, self.loaded) {
            (false, _) => HealAction::Deploy,
            (true, false) => HealAction::Repin,
            (true, true) => HealAction::None,
        }
    }

    /// Convergence status for reporting.
    pub fn convergence(&self) -> ConvergenceStatus {
        match self.heal_action() {
            HealAction::None => ConvergenceStatus::Converged,
            HealAction::Deploy => ConvergenceStatus::Converging,
            HealAction::Repin => ConvergenceStatus::Diverged,
        }
    }
}

/// Corrective step taken by a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealAction {
    /// Ask the control plane to deploy an instance.
    Deploy,

    /// Move the pin to a freshly chosen eligible host.
    Repin,

    /// Nothing to do.
    None,
}

/// Convergence status for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Observed state matches desired state.
    Converged,

    /// Observed state is moving toward desired state.
    Converging,

    /// Observed state will not converge without intervention.
    Diverged,
}

impl ConvergenceStatus {
    /// Returns true if the resource has converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }

    /// Label for structured logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::Converging => "converging",
            Self::Diverged => "diverged",
        }
    }
}

impl std::fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Placement choice
// =============================================================================

/// Choose one candidate uniformly at random.
///
/// Deliberately unweighted: no affinity and no least-loaded heuristic, so a
/// tick needs no memory of earlier choices. Returns `None` for an empty
/// slice.
pub fn choose_uniform<'a, T, R>(candidates: &'a [T], rng: &mut R) -> Option<&'a T>
where
    R: Rng + ?Sized,
{
    candidates.choose(rng)
}

// =============================================================================
// Timings
// =============================================================================

/// Delay between the end of one tick and the start of the next.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Delay before retrying when no eligible host exists.
pub const DEFAULT_NO_HOST_DELAY: Duration = Duration::from_secs(60);

/// Grace period before re-listing instances that have not loaded yet.
pub const DEFAULT_LOAD_WAIT: Duration = Duration::from_secs(30);

/// Pause after a promotion when the store has no services yet.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_lookup_exists_policy() {
        let found: Lookup<&str> = Lookup::Found("{}");
        let missing: Lookup<&str> = Lookup::NotFound;
        let failed: Lookup<&str> = Lookup::ReadError("timeout".into());

        for policy in [ReadErrorPolicy::AssumeAbsent, ReadErrorPolicy::AssumePresent] {
            assert!(found.exists(policy));
            assert!(!missing.exists(policy));
        }

        assert!(!failed.exists(ReadErrorPolicy::AssumeAbsent));
        assert!(failed.exists(ReadErrorPolicy::AssumePresent));
    }

    #[test]
    fn test_lookup_map_preserves_variant() {
        assert_eq!(Lookup::Found(2).map(|v| v * 2), Lookup::Found(4));
        assert_eq!(Lookup::<i32>::NotFound.map(|v| v * 2), Lookup::NotFound);
        assert!(Lookup::<i32>::ReadError("x".into())
            .map(|v| v * 2)
            .is_read_error());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "assume_present".parse::<ReadErrorPolicy>().unwrap(),
            ReadErrorPolicy::AssumePresent
        );
        assert_eq!(ReadErrorPolicy::default(), ReadErrorPolicy::AssumeAbsent);
        assert!("sometimes".parse::<ReadErrorPolicy>().is_err());
    }

    #[test]
    fn test_health_from_counts() {
        assert_eq!(Health::from_counts(0, 0), Health::ABSENT);
        assert_eq!(Health::from_counts(2, 0), Health::STALLED);
        assert_eq!(Health::from_counts(2, 1), Health::HEALTHY);
    }

    #[test]
    fn test_heal_action() {
        assert_eq!(Health::ABSENT.heal_action(), HealAction::Deploy);
        assert_eq!(Health::STALLED.heal_action(), HealAction::Repin);
        assert_eq!(Health::HEALTHY.heal_action(), HealAction::None);
        assert!(Health::STALLED.needs_recheck());
        assert!(!Health::ABSENT.needs_recheck());
    }

    #[test]
    fn test_convergence() {
        assert!(Health::HEALTHY.convergence().is_converged());
        assert_eq!(Health::ABSENT.convergence(), ConvergenceStatus::Converging);
        assert_eq!(Health::STALLED.convergence().to_string(), "diverged");
    }

    #[test]
    fn test_choose_uniform_empty() {
        let mut rng = StdRng::seed_from_u64(7);
        let empty: [u8; 0] = [];
        assert!(choose_uniform(&empty, &mut rng).is_none());
    }

    #[test]
    fn test_choose_uniform_reaches_every_candidate() {
        let mut rng = StdRng::seed_from_u64(42);
        let hosts = ["a", "b", "c"];
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(*choose_uniform(&hosts, &mut rng).unwrap());
        }
        assert_eq!(seen.len(), 3);
    }

    proptest! {
        #[test]
        fn prop_choice_is_member(len in 1usize..32, seed in any::<u64>()) {
            let candidates: Vec<usize> = (0..len).collect();
            let mut rng = StdRng::seed_from_u64(seed);
            let picked = choose_uniform(&candidates, &mut rng).unwrap();
            prop_assert!(candidates.contains(picked));
        }
    }
}
