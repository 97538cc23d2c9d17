//! Upstream Adapters
//!
//! HTTP access to the rate-limited market data APIs, plus the market
//! snapshot provider the mode controller polls.

mod http;

pub use http::{CalmMarketProvider, HttpSnapshotProvider, HttpUpstream};
