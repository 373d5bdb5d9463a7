//! Yahoo Finance v8 chart client (read-only daily bars).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};
use crate::market_data::{DateRange, PriceProvider};
use crate::models::{normalize_series, PricePoint};

use super::types::*;

const CHART_API_BASE: &str = "https://query1.finance.yahoo.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// HTTP client for the chart endpoint.
pub struct ChartClient {
    client: Client,
    base_url: String,
}

impl ChartClient {
    /// Create a new chart client with default settings.
    pub fn new() -> Result<Self> {
        Self::with_base_url(CHART_API_BASE.to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    fn chart_url(&self, symbol: &str, range: &DateRange, interval: &str) -> String {
        format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval={}",
            self.base_url,
            symbol,
            range.start_ts(),
            range.end_ts(),
            interval
        )
    }
}

#[async_trait]
impl PriceProvider for ChartClient {
    async fn fetch_series(
        &self,
        symbol: &str,
        range: &DateRange,
        interval: &str,
    ) -> ServiceResult<Vec<PricePoint>> {
        let url = self.chart_url(symbol, range, interval);
        debug!(url = %url, "Fetching chart");

        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound(format!("no data found for symbol {}", symbol)));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ServiceError::Unavailable(format!(
                "chart request for {} failed: {}",
                symbol, status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Internal(format!(
                "chart request for {} failed: {} - {}",
                symbol, status, body
            )));
        }

        let body: ChartResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Internal(format!("failed to decode chart for {}: {}", symbol, e)))?;

        parse_chart(symbol, body)
    }
}

/// Flatten the parallel chart arrays into bars, skipping null slots.
pub fn parse_chart(symbol: &str, response: ChartResponse) -> ServiceResult<Vec<PricePoint>> {
    let results = match response.chart.result {
        Some(results) => results,
        None => {
            return Err(match response.chart.error {
                Some(err) if err.code.eq_ignore_ascii_case("not found") => {
                    ServiceError::NotFound(format!("no data found for symbol {}", symbol))
                }
                Some(err) => ServiceError::Internal(format!("{}: {}", err.code, err.description)),
                None => ServiceError::NotFound(format!("no data found for symbol {}", symbol)),
            });
        }
    };

    let Some(data) = results.into_iter().next() else {
        return Err(ServiceError::NotFound(format!("no data found for symbol {}", symbol)));
    };

    let timestamps = data.timestamp.unwrap_or_default();
    let quote = data.indicators.quote.into_iter().next().unwrap_or_default();
    let adj_closes = data
        .indicators
        .adjclose
        .and_then(|blocks| blocks.into_iter().next())
        .map(|block| block.adjclose)
        .unwrap_or_default();

    let at = |values: &[Option<f64>], i: usize| values.get(i).copied().flatten();

    let points: Vec<PricePoint> = timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            let open = at(&quote.open, i)?;
            let high = at(&quote.high, i)?;
            let low = at(&quote.low, i)?;
            let close = at(&quote.close, i)?;
            Some(PricePoint {
                symbol: symbol.to_string(),
                timestamp: ts,
                open,
                high,
                low,
                close,
                adjusted_close: at(&adj_closes, i).unwrap_or(close),
                volume: quote.volume.get(i).copied().flatten().unwrap_or(0),
            })
        })
        .collect();

    if points.is_empty() {
        return Err(ServiceError::NotFound(format!("no data found for symbol {}", symbol)));
    }

    Ok(normalize_series(points))
}
