//! Deployment selection strategies

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::router::cache::CachedDeployment;
use crate::core::router::cooldown::StatsRegistry;

/// The rule by which one deployment is chosen from the healthy set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
    /// Uniform random choice
    SimpleShuffle,
    /// Minimum in-flight requests, ties broken randomly
    LeastBusy,
    /// Minimum EWMA latency; unsampled deployments count as infinitely slow
    LatencyBased,
    /// Uniform choice among the maximum-priority group
    #[default]
    PriorityBased,
    /// Per-model counter modulo list length
    RoundRobin,
}

impl std::str::FromStr for RoutingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple-shuffle" => Ok(Self::SimpleShuffle),
            "least-busy" => Ok(Self::LeastBusy),
            "latency-based" => Ok(Self::LatencyBased),
            "priority-based" => Ok(Self::PriorityBased),
            "round-robin" => Ok(Self::RoundRobin),
            other => Err(format!("invalid routing strategy: {}", other)),
        }
    }
}

/// Applies a strategy over the healthy deployment list
#[derive(Debug)]
pub struct DeploymentSelector {
    strategy: RoutingStrategy,
    /// Per-model round-robin counters; races only affect fairness
    round_robin: Mutex<HashMap<String, usize>>,
}

impl DeploymentSelector {
    pub fn new(strategy: RoutingStrategy) -> Self {
        Self {
            strategy,
            round_robin: Mutex::new(HashMap::new()),
        }
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    /// Choose one deployment; `None` when the healthy list is empty
    pub fn select(
        &self,
        healthy: &[Arc<CachedDeployment>],
        model_name: &str,
        stats: &StatsRegistry,
    ) -> Option<Arc<CachedDeployment>> {
        if healthy.is_empty() {
            return None;
        }

        let picked = match self.strategy {
            RoutingStrategy::SimpleShuffle => healthy.choose(&mut rand::thread_rng())?.clone(),

            RoutingStrategy::LeastBusy => {
                let min = healthy
                    .iter()
                    .map(|d| stats.get(d.id).in_flight())
                    .min()?;
                let least: Vec<_> = healthy
                    .iter()
                    .filter(|d| stats.get(d.id).in_flight() == min)
                    .collect();
                (*least.choose(&mut rand::thread_rng())?).clone()
            }

            RoutingStrategy::LatencyBased => healthy
                .iter()
                .min_by(|a, b| {
                    let latency = |d: &Arc<CachedDeployment>| {
                        let avg = stats.get(d.id).avg_latency();
                        if avg == 0.0 {
                            f64::INFINITY
                        } else {
                            avg
                        }
                    };
                    latency(a)
                        .partial_cmp(&latency(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })?
                .clone(),

            RoutingStrategy::PriorityBased => {
                let max_priority = healthy.iter().map(|d| d.priority).max()?;
                let top: Vec<_> = healthy
                    .iter()
                    .filter(|d| d.priority == max_priority)
                    .collect();
                (*top.choose(&mut rand::thread_rng())?).clone()
            }

            RoutingStrategy::RoundRobin => {
                let mut counters = self.round_robin.lock();
                let counter = counters.entry(model_name.to_string()).or_insert(0);
                let index = *counter % healthy.len();
                *counter += 1;
                healthy[index].clone()
            }
        };

        Some(picked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::providers::ProviderKind;
    use crate::core::types::ModelType;
    use std::time::Duration;
    use uuid::Uuid;

    fn deployment(priority: i32) -> Arc<CachedDeployment> {
        Arc::new(CachedDeployment {
            id: Uuid::new_v4(),
            model_name: "m".into(),
            provider_model: "m-upstream".into(),
            model_type: ModelType::Chat,
            provider_type: ProviderKind::OpenAi,
            provider_name: "test".into(),
            priority,
            timeout: None,
            api_key: Some("sk".into()),
            api_base: None,
            settings: Default::default(),
        })
    }

    #[test]
    fn test_empty_list_yields_none() {
        let selector = DeploymentSelector::new(RoutingStrategy::SimpleShuffle);
        let stats = StatsRegistry::new();
        assert!(selector.select(&[], "m", &stats).is_none());
    }

    #[test]
    fn test_least_busy_prefers_idle() {
        let selector = DeploymentSelector::new(RoutingStrategy::LeastBusy);
        let stats = StatsRegistry::new();
        let busy = deployment(1);
        let idle = deployment(1);

        stats.get(busy.id).begin_request();
        stats.get(busy.id).begin_request();
        stats.get(idle.id).begin_request();

        let picked = selector
            .select(&[busy.clone(), idle.clone()], "m", &stats)
            .unwrap();
        assert_eq!(picked.id, idle.id);
    }

    #[test]
    fn test_latency_based_prefers_measured_paths() {
        let selector = DeploymentSelector::new(RoutingStrategy::LatencyBased);
        let stats = StatsRegistry::new();
        let sampled = deployment(1);
        let unsampled = deployment(1);

        stats
            .get(sampled.id)
            .record_latency(Duration::from_millis(800));

        // Unsampled counts as infinitely slow, so the measured path wins
        let picked = selector
            .select(&[unsampled.clone(), sampled.clone()], "m", &stats)
            .unwrap();
        assert_eq!(picked.id, sampled.id);
    }

    #[test]
    fn test_latency_based_picks_fastest() {
        let selector = DeploymentSelector::new(RoutingStrategy::LatencyBased);
        let stats = StatsRegistry::new();
        let slow = deployment(1);
        let fast = deployment(1);

        stats.get(slow.id).record_latency(Duration::from_millis(900));
        stats.get(fast.id).record_latency(Duration::from_millis(50));

        let picked = selector
            .select(&[slow.clone(), fast.clone()], "m", &stats)
            .unwrap();
        assert_eq!(picked.id, fast.id);
    }

    #[test]
    fn test_priority_based_restricts_to_top_group() {
        let selector = DeploymentSelector::new(RoutingStrategy::PriorityBased);
        let stats = StatsRegistry::new();
        let low = deployment(1);
        let high_a = deployment(5);
        let high_b = deployment(5);

        for _ in 0..20 {
            let picked = selector
                .select(&[low.clone(), high_a.clone(), high_b.clone()], "m", &stats)
                .unwrap();
            assert_eq!(picked.priority, 5);
        }
    }

    #[test]
    fn test_round_robin_cycles_per_model() {
        let selector = DeploymentSelector::new(RoutingStrategy::RoundRobin);
        let stats = StatsRegistry::new();
        let a = deployment(1);
        let b = deployment(1);
        let list = [a.clone(), b.clone()];

        let first = selector.select(&list, "m", &stats).unwrap();
        let second = selector.select(&list, "m", &stats).unwrap();
        let third = selector.select(&list, "m", &stats).unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.id, third.id);

        // A different model group has its own counter
        let other = selector.select(&list, "other", &stats).unwrap();
        assert_eq!(other.id, a.id);
    }

    #[test]
    fn test_strategy_parsing() {
        use std::str::FromStr;
        assert_eq!(
            RoutingStrategy::from_str("simple-shuffle").unwrap(),
            RoutingStrategy::SimpleShuffle
        );
        assert_eq!(
            RoutingStrategy::from_str("least-busy").unwrap(),
            RoutingStrategy::LeastBusy
        );
        assert!(RoutingStrategy::from_str("cheapest-first").is_err());
    }
}
