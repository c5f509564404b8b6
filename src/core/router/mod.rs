//! Request routing and dispatch
//!
//! The router resolves a public model name to concrete deployments (via the
//! TTL cache), filters them through cooldown state, picks one per the
//! configured strategy, and drives the retry/fallback loop around the
//! provider adapters.

pub mod cache;
pub mod cooldown;
pub mod router;
pub mod stream;
pub mod strategy;

pub use cache::{
    CachedDeployment, DeploymentCache, DeploymentRow, DeploymentSource, DeploymentSpec,
    ProviderSpec,
};
pub use cooldown::{CooldownTracker, DeploymentStats, StatsRegistry};
pub use router::{Router, RouterConfig, RouterResponse};
pub use stream::RouterStream;
pub use strategy::{DeploymentSelector, RoutingStrategy};
