//! Upstream market data client.

mod chart_client;
mod types;

pub use chart_client::ChartClient;
