//! Fixtures and service doubles shared by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::deadline::Deadline;
use crate::error::{ServiceError, ServiceResult};
use crate::market_data::{BatchResult, DateRange, PriceProvider};
use crate::models::{PricePoint, SignalReport};
use crate::services::{BatchRequest, DataService, SeriesRequest, SignalRequest, StrategyService};

/// 2020-01-02 00:00:00 UTC
pub const BASE_TS: i64 = 1_577_923_200;

pub fn day_ts(i: i64) -> i64 {
    BASE_TS + i * 86_400
}

/// Wednesday 2021-06-02, the first Wednesday of its month.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 6, 2, 12, 0, 0).unwrap()
}

fn bar(symbol: &str, i: usize, close: f64) -> PricePoint {
    PricePoint {
        symbol: symbol.to_string(),
        timestamp: day_ts(i as i64),
        open: close,
        high: close * 1.01,
        low: close * 0.99,
        close,
        adjusted_close: close,
        volume: 1_000,
    }
}

pub fn flat_series(symbol: &str, n: usize, price: f64) -> Vec<PricePoint> {
    (0..n).map(|i| bar(symbol, i, price)).collect()
}

/// Daily bars with close = start * e^(growth * i).
pub fn exponential_series(symbol: &str, n: usize, start: f64, growth: f64) -> Vec<PricePoint> {
    (0..n)
        .map(|i| bar(symbol, i, start * (growth * i as f64).exp()))
        .collect()
}

pub fn bars_from_closes(symbol: &str, closes: &[f64]) -> Vec<PricePoint> {
    closes.iter().enumerate().map(|(i, c)| bar(symbol, i, *c)).collect()
}

/// Scripted upstream provider.
#[derive(Default)]
pub struct MockProvider {
    series: Mutex<HashMap<String, Vec<PricePoint>>>,
    errors: Mutex<HashMap<String, ServiceError>>,
    transient: Mutex<HashMap<String, usize>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, symbol: &str, points: Vec<PricePoint>) {
        self.series.lock().unwrap().insert(symbol.to_string(), points);
    }

    pub fn insert_error(&self, symbol: &str, err: ServiceError) {
        self.errors.lock().unwrap().insert(symbol.to_string(), err);
    }

    /// Answer the next `n` calls for `symbol` with `Unavailable`.
    pub fn fail_times(&self, symbol: &str, n: usize) {
        self.transient.lock().unwrap().insert(symbol.to_string(), n);
    }

    pub fn calls(&self, symbol: &str) -> usize {
        self.calls.lock().unwrap().get(symbol).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PriceProvider for MockProvider {
    async fn fetch_series(&self, symbol: &str, _range: &DateRange, _interval: &str) -> ServiceResult<Vec<PricePoint>> {
        *self.calls.lock().unwrap().entry(symbol.to_string()).or_insert(0) += 1;

        if let Some(remaining) = self.transient.lock().unwrap().get_mut(symbol) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ServiceError::Unavailable(format!("upstream 503 for {}", symbol)));
            }
        }
        if let Some(err) = self.errors.lock().unwrap().get(symbol) {
            return Err(err.clone());
        }

        self.series
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("no data found for symbol {}", symbol)))
    }
}

/// In-memory `DataService` that ignores ranges.
#[derive(Default)]
pub struct StubDataService {
    series: Mutex<HashMap<String, Vec<PricePoint>>>,
}

impl StubDataService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, symbol: &str, points: Vec<PricePoint>) {
        self.series.lock().unwrap().insert(symbol.to_string(), points);
    }

    fn lookup(&self, symbol: &str) -> ServiceResult<Vec<PricePoint>> {
        self.series
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("no data found for symbol {}", symbol)))
    }
}

#[async_trait]
impl DataService for StubDataService {
    async fn get_stock_data(&self, request: &SeriesRequest, _deadline: Deadline) -> ServiceResult<Vec<PricePoint>> {
        DateRange::parse(&request.start_date, &request.end_date)?;
        self.lookup(&request.symbol)
    }

    async fn get_batch_stock_data(&self, request: &BatchRequest, _deadline: Deadline) -> ServiceResult<BatchResult> {
        DateRange::parse(&request.start_date, &request.end_date)?;
        let mut batch = BatchResult::default();
        for symbol in &request.symbols {
            match self.lookup(symbol) {
                Ok(points) => {
                    batch.series.insert(symbol.clone(), points);
                }
                Err(e) => {
                    batch.errors.insert(symbol.clone(), e.to_string());
                }
            }
        }
        Ok(batch)
    }
}

/// Strategy service answering from a script. The last response repeats.
#[derive(Default)]
pub struct StubSignals {
    responses: Mutex<Vec<ServiceResult<SignalReport>>>,
    calls: Mutex<usize>,
}

impl StubSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, report: SignalReport) -> &Self {
        self.responses.lock().unwrap().push(Ok(report));
        self
    }

    pub fn push_error(&self, err: ServiceError) -> &Self {
        self.responses.lock().unwrap().push(Err(err));
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl StrategyService for StubSignals {
    async fn generate_signals(&self, _request: &SignalRequest, _deadline: Deadline) -> ServiceResult<SignalReport> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls - 1
        };
        let responses = self.responses.lock().unwrap();
        match responses.get(call).or_else(|| responses.last()) {
            Some(response) => response.clone(),
            None => Err(ServiceError::internal("no scripted signal response")),
        }
    }
}
