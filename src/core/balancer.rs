use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use thiserror::Error;

use crate::config::Target;

/// Error type for balancer construction and target election
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BalancerError {
    /// The configured strategy name is not registered
    #[error("Unsupported load balancing algorithm: {0}")]
    NotFound(String),

    /// There is nothing to elect from
    #[error("No upstream targets available")]
    NoTargets,

    /// Every target carries a zero weight
    #[error("All upstream targets have zero weight")]
    ZeroWeight,
}

/// Trait defining the interface for load balancing strategies
pub trait Balancer: Send + Sync + 'static {
    /// Elect the target that serves the next request
    fn elect<'a>(&self, targets: &'a [Target]) -> Result<&'a Target, BalancerError>;
    /// Create a new instance of this strategy as a boxed trait object
    fn boxed(self) -> Box<dyn Balancer>
    where
        Self: Sized,
    {
        Box::new(self)
    }
}

/// Round-robin load balancing strategy
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinBalancer {
    /// Create a new round-robin strategy
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Balancer for RoundRobinBalancer {
    fn elect<'a>(&self, targets: &'a [Target]) -> Result<&'a Target, BalancerError> {
        if targets.is_empty() {
            return Err(BalancerError::NoTargets);
        }
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(&targets[count % targets.len()])
    }
}

/// Weighted random selection. A target with weight 3 is elected three
/// times as often as one with weight 1; weight 0 is never elected.
pub struct WeightBalancer;

impl Default for WeightBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl Balancer for WeightBalancer {
    fn elect<'a>(&self, targets: &'a [Target]) -> Result<&'a Target, BalancerError> {
        if targets.is_empty() {
            return Err(BalancerError::NoTargets);
        }
        let total: u64 = targets.iter().map(|t| u64::from(t.weight)).sum();
        if total == 0 {
            return Err(BalancerError::ZeroWeight);
        }

        let mut pick = rand::rng().random_range(0..total);
        for target in targets {
            let weight = u64::from(target.weight);
            if pick < weight {
                return Ok(target);
            }
            pick -= weight;
        }
        // pick < total guarantees the loop returns
        Err(BalancerError::ZeroWeight)
    }
}

/// Random selection load balancing strategy
pub struct RandomBalancer;

impl Default for RandomBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomBalancer {
    /// Create a new random selection strategy
    pub fn new() -> Self {
        Self
    }
}

impl Balancer for RandomBalancer {
    fn elect<'a>(&self, targets: &'a [Target]) -> Result<&'a Target, BalancerError> {
        if targets.is_empty() {
            return Err(BalancerError::NoTargets);
        }
        let index = rand::rng().random_range(0..targets.len());
        Ok(&targets[index])
    }
}

/// Factory for creating balancers from the strategy name in a definition
pub struct BalancerFactory;

impl BalancerFactory {
    /// Registered strategy names. Lookup is exact, names are lower-case.
    pub const STRATEGIES: &'static [&'static str] = &["roundrobin", "rr", "weight", "random"];

    /// Create a fresh balancer instance for `name`.
    ///
    /// Every call returns new state, so two definitions naming the same
    /// strategy never share a round-robin counter.
    pub fn create(name: &str) -> Result<Box<dyn Balancer>, BalancerError> {
        match name {
            "roundrobin" | "rr" => Ok(RoundRobinBalancer::new().boxed()),
            "weight" => Ok(WeightBalancer::new().boxed()),
            "random" => Ok(RandomBalancer::new().boxed()),
            other => Err(BalancerError::NotFound(other.to_string())),
        }
    }
}
