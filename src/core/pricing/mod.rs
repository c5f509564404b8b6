//! Pricing lookup and spend accounting

pub mod manager;
pub mod spend;
pub mod static_prices;
pub mod types;

pub use manager::{PricingManager, PricingSource};
pub use spend::{SpendRecord, SpendRecorder, SpendSink};
pub use types::{ModelPricing, SpendLogEntry};
