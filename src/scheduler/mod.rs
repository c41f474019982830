//! Time-driven orchestration.
//!
//! ```text
//!   RTC alarm / interval ──▶ SamplingScheduler ──▶ pumps + gascard capture
//!   feed times          ──▶ FeedScheduler     ──▶ valve pulse trains
//! ```
//!
//! Both are advanced from the super-loop tick and never block.

pub mod feed;
pub mod sampling;

pub use feed::FeedScheduler;
pub use sampling::{SamplingPlan, SamplingScheduler};
