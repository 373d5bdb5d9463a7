//! Trade execution simulator.
//!
//! Fills orders with random latency, market-order slippage and occasional
//! partial fills, folds the fills into the stored portfolio state, and keeps
//! each applied batch retrievable by id.
//!
//! Portfolio write-back is serialized by a simulator-wide lock, so
//! overlapping batches apply one after another. A version conflict with
//! another writer is retried against the fresh state. Buys are capped at the
//! cash on hand.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    ExecutionBatch, ExecutionResult, ExecutionStatus, Order, OrderType, PortfolioState, Position, TradeSide,
};
use crate::services::TradeExecutionService;
use crate::trading::{PortfolioStateStore, PositionSizer};

/// Load/apply/save attempts before a version conflict is returned.
const MAX_APPLY_ATTEMPTS: usize = 3;

/// How fills move cash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashSettlement {
    /// Buys debit, sells credit
    Directional,
    /// Every fill debits cash, sells included. Kept only to replay old books.
    LegacyDebitAll,
}

impl CashSettlement {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "legacy" | "legacy_debit_all" => Self::LegacyDebitAll,
            _ => Self::Directional,
        }
    }
}

/// Simulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Upper bound of the random per-order delay
    pub max_latency_ms: u64,

    /// Market orders fill within +/- this fraction of the reference price
    pub slippage: f64,

    /// Chance that an order only partially fills
    pub partial_fill_probability: f64,

    pub cash_settlement: CashSettlement,

    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,

    /// Cash seeded into an empty portfolio store
    pub initial_cash: Decimal,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            max_latency_ms: 1_000,            // up to 1s
            slippage: 0.01,                   // +/- 1%
            partial_fill_probability: 0.1,    // 10% of orders
            cash_settlement: CashSettlement::Directional,
            seed: None,
            initial_cash: dec!(1000000),
        }
    }
}

/// Simulated broker.
pub struct TradeExecutionSimulator {
    config: SimulatorConfig,
    store: Arc<dyn PortfolioStateStore>,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
    state_lock: Mutex<()>,
    executions: RwLock<HashMap<Uuid, ExecutionBatch>>,
}

impl TradeExecutionSimulator {
    pub fn new(config: SimulatorConfig, store: Arc<dyn PortfolioStateStore>, clock: Arc<dyn Clock>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        if config.cash_settlement == CashSettlement::LegacyDebitAll {
            warn!("Legacy cash settlement enabled: sell fills will debit cash");
        }

        Self {
            config,
            store,
            clock,
            rng: Mutex::new(rng),
            state_lock: Mutex::new(()),
            executions: RwLock::new(HashMap::new()),
        }
    }

    /// Simulate every order, apply the fills to the stored state, then record the batch.
    pub async fn execute(&self, orders: Vec<Order>) -> ServiceResult<ExecutionBatch> {
        if orders.is_empty() {
            return Err(ServiceError::invalid("no orders to execute"));
        }
        for order in &orders {
            validate(order)?;
        }

        let id = Uuid::new_v4();
        info!(execution_id = %id, orders = orders.len(), "Executing orders");

        let mut results = Vec::with_capacity(orders.len());
        for order in &orders {
            results.push(self.simulate_fill(order).await?);
        }

        let results = self.apply_to_portfolio(id, results).await?;

        let batch = ExecutionBatch {
            id,
            created_at: self.clock.now(),
            results,
        };
        self.executions.write().await.insert(id, batch.clone());
        Ok(batch)
    }

    pub async fn status(&self, id: Uuid) -> ServiceResult<ExecutionBatch> {
        self.executions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("execution {}", id)))
    }

    async fn simulate_fill(&self, order: &Order) -> ServiceResult<ExecutionResult> {
        let (latency_ms, slip, partial_fraction) = {
            let mut rng = self.rng.lock().await;
            let latency_ms = if self.config.max_latency_ms > 0 {
                rng.gen_range(0..=self.config.max_latency_ms)
            } else {
                0
            };
            let slip = if self.config.slippage > 0.0 {
                rng.gen_range(-self.config.slippage..=self.config.slippage)
            } else {
                0.0
            };
            let partial = rng
                .gen_bool(self.config.partial_fill_probability.clamp(0.0, 1.0))
                .then(|| rng.gen::<f64>());
            (latency_ms, slip, partial)
        };

        if latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        }

        let average_price = match order.order_type {
            OrderType::Market => {
                let factor = Decimal::from_f64(1.0 + slip).unwrap_or(Decimal::ONE);
                (order.price * factor).round_dp(4)
            }
            OrderType::Limit => order.limit_price.unwrap_or(order.price),
        };

        let (status, filled_quantity) = match partial_fraction {
            Some(fraction) => (
                ExecutionStatus::PartiallyFilled,
                ((order.quantity as f64) * fraction).floor() as i64,
            ),
            None => (ExecutionStatus::Filled, order.quantity),
        };

        debug!(
            symbol = %order.symbol,
            side = %order.side,
            requested = order.quantity,
            filled = filled_quantity,
            price = %average_price,
            "Simulated fill"
        );

        Ok(ExecutionResult {
            symbol: order.symbol.clone(),
            side: order.side,
            status,
            requested_quantity: order.quantity,
            filled_quantity,
            average_price,
        })
    }

    /// Fold fills into the latest stored state and save it. Returns the
    /// fills as applied, buys trimmed to what the cash covered.
    async fn apply_to_portfolio(&self, id: Uuid, fills: Vec<ExecutionResult>) -> ServiceResult<Vec<ExecutionResult>> {
        let _guard = self.state_lock.lock().await;
        let today = self.clock.today();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut state = self
                .store
                .load_latest()
                .await?
                .unwrap_or_else(|| PortfolioState::new(today, self.config.initial_cash));

            let mut applied = fills.clone();
            for result in applied.iter_mut() {
                apply_fill(&mut state, result, self.config.cash_settlement);
            }
            state.date = today;
            state.refresh_totals();

            match self.store.save(&state).await {
                Ok(version) => {
                    info!(
                        execution_id = %id,
                        version = version,
                        cash = %state.cash_balance,
                        "Applied fills to portfolio"
                    );
                    return Ok(applied);
                }
                Err(ServiceError::Conflict(msg)) if attempt < MAX_APPLY_ATTEMPTS => {
                    warn!(execution_id = %id, attempt = attempt, conflict = %msg, "Portfolio changed underneath, reapplying fills");
                }
                Err(e) => {
                    warn!(execution_id = %id, error = %e, "Failed to apply fills to portfolio");
                    return Err(e);
                }
            }
        }
    }
}

fn validate(order: &Order) -> ServiceResult<()> {
    if order.symbol.trim().is_empty() {
        return Err(ServiceError::invalid("order symbol must not be empty"));
    }
    if order.quantity <= 0 {
        return Err(ServiceError::invalid(format!(
            "order quantity for {} must be positive",
            order.symbol
        )));
    }
    let price = match order.order_type {
        OrderType::Market => order.price,
        OrderType::Limit => order.limit_price.unwrap_or(order.price),
    };
    if price <= Decimal::ZERO {
        return Err(ServiceError::invalid(format!("order price for {} must be positive", order.symbol)));
    }
    Ok(())
}

/// Fold one fill into the portfolio. A buy the cash can't cover is cut down
/// to the affordable share count and reported as partially filled.
fn apply_fill(state: &mut PortfolioState, result: &mut ExecutionResult, settlement: CashSettlement) {
    if result.filled_quantity <= 0 {
        return;
    }
    let price = result.average_price;

    if result.side == TradeSide::Buy {
        let affordable = PositionSizer::affordable_quantity(result.filled_quantity, price, state.cash_balance);
        if affordable < result.filled_quantity {
            warn!(
                symbol = %result.symbol,
                filled = result.filled_quantity,
                affordable = affordable,
                cash = %state.cash_balance,
                "Buy fill capped by cash"
            );
            result.filled_quantity = affordable;
            result.status = ExecutionStatus::PartiallyFilled;
            if affordable == 0 {
                return;
            }
        }
    }
    let notional = Decimal::from(result.filled_quantity) * price;

    match result.side {
        TradeSide::Buy => {
            match state.positions.get_mut(&result.symbol) {
                Some(position) => position.add(result.filled_quantity, price),
                None => {
                    state.positions.insert(
                        result.symbol.clone(),
                        Position::new(result.symbol.clone(), result.filled_quantity, price),
                    );
                }
            }
            state.cash_balance -= notional;
        }
        TradeSide::Sell => {
            let sold = match state.positions.get_mut(&result.symbol) {
                Some(position) => {
                    let sold = position.reduce(result.filled_quantity);
                    position.update_price(price);
                    sold
                }
                None => 0,
            };
            if sold < result.filled_quantity {
                warn!(symbol = %result.symbol, filled = result.filled_quantity, held = sold, "Sell exceeded holding");
            }
            match settlement {
                CashSettlement::Directional => state.cash_balance += Decimal::from(sold) * price,
                CashSettlement::LegacyDebitAll => state.cash_balance -= notional,
            }
        }
    }
}

#[async_trait]
impl TradeExecutionService for TradeExecutionSimulator {
    async fn execute_trades(&self, orders: Vec<Order>) -> ServiceResult<ExecutionBatch> {
        self.execute(orders).await
    }

    async fn get_execution_status(&self, execution_id: Uuid) -> ServiceResult<ExecutionBatch> {
        self.status(execution_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::MemoryStateStore;
    use crate::test_support::fixed_now;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn config(partial: f64, settlement: CashSettlement) -> SimulatorConfig {
        SimulatorConfig {
            max_latency_ms: 0,
            partial_fill_probability: partial,
            cash_settlement: settlement,
            seed: Some(42),
            initial_cash: dec!(10000),
            ..SimulatorConfig::default()
        }
    }

    fn simulator(config: SimulatorConfig) -> (TradeExecutionSimulator, Arc<MemoryStateStore>) {
        let store = Arc::new(MemoryStateStore::new());
        let sim = TradeExecutionSimulator::new(config, store.clone(), Arc::new(ManualClock::new(fixed_now())));
        (sim, store)
    }

    #[tokio::test]
    async fn test_market_fill_within_slippage_band() {
        let (sim, _store) = simulator(config(0.0, CashSettlement::Directional));
        let batch = assert_ok!(sim.execute(vec![Order::market("AAPL", TradeSide::Buy, 10, dec!(100))]).await);

        let result = &batch.results[0];
        assert_eq!(result.status, ExecutionStatus::Filled);
        assert_eq!(result.filled_quantity, 10);
        assert!(result.average_price >= dec!(99) && result.average_price <= dec!(101));
    }

    #[tokio::test]
    async fn test_limit_fill_and_portfolio_update() {
        let (sim, store) = simulator(config(0.0, CashSettlement::Directional));
        assert_ok!(sim.execute(vec![Order::limit("AAPL", TradeSide::Buy, 10, dec!(100))]).await);

        let state = store.load_latest().await.unwrap().unwrap();
        assert_eq!(state.quantity_of("AAPL"), 10);
        assert_eq!(state.cash_balance, dec!(9000));
        assert_eq!(state.total_value, dec!(10000));
    }

    #[tokio::test]
    async fn test_partial_fill() {
        let (sim, _store) = simulator(config(1.0, CashSettlement::Directional));
        let batch = assert_ok!(sim.execute(vec![Order::limit("MSFT", TradeSide::Buy, 100, dec!(50))]).await);

        let result = &batch.results[0];
        assert_eq!(result.status, ExecutionStatus::PartiallyFilled);
        assert!(result.filled_quantity < 100);
    }

    #[tokio::test]
    async fn test_directional_sell_credits_cash() {
        let (sim, store) = simulator(config(0.0, CashSettlement::Directional));
        assert_ok!(sim.execute(vec![Order::limit("AAPL", TradeSide::Buy, 10, dec!(100))]).await);
        assert_ok!(sim.execute(vec![Order::limit("AAPL", TradeSide::Sell, 4, dec!(110))]).await);

        let state = store.load_latest().await.unwrap().unwrap();
        assert_eq!(state.quantity_of("AAPL"), 6);
        assert_eq!(state.cash_balance, dec!(9440));
    }

    #[tokio::test]
    async fn test_legacy_settlement_debits_sells() {
        let (sim, store) = simulator(config(0.0, CashSettlement::LegacyDebitAll));
        assert_ok!(sim.execute(vec![Order::limit("AAPL", TradeSide::Buy, 10, dec!(100))]).await);
        assert_ok!(sim.execute(vec![Order::limit("AAPL", TradeSide::Sell, 10, dec!(100))]).await);

        let state = store.load_latest().await.unwrap().unwrap();
        assert!(state.positions.is_empty());
        assert_eq!(state.cash_balance, dec!(8000));
    }

    #[tokio::test]
    async fn test_execution_status_lookup() {
        let (sim, _store) = simulator(config(0.0, CashSettlement::Directional));
        let batch = assert_ok!(sim.execute(vec![Order::market("AAPL", TradeSide::Buy, 1, dec!(10))]).await);

        assert_eq!(assert_ok!(sim.status(batch.id).await), batch);
        let err = assert_err!(sim.get_execution_status(Uuid::new_v4()).await);
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_orders_are_rejected_up_front() {
        let (sim, store) = simulator(config(0.0, CashSettlement::Directional));
        let orders = vec![
            Order::market("AAPL", TradeSide::Buy, 1, dec!(10)),
            Order::market("MSFT", TradeSide::Buy, 0, dec!(10)),
        ];
        assert!(matches!(sim.execute(orders).await, Err(ServiceError::InvalidArgument(_))));
        assert!(matches!(sim.execute(vec![]).await, Err(ServiceError::InvalidArgument(_))));
        assert_eq!(store.version().await, 0);
    }

    /// Store whose reads stall, widening the load/save window.
    struct SlowStore {
        inner: MemoryStateStore,
        delay: Duration,
    }

    #[async_trait]
    impl PortfolioStateStore for SlowStore {
        async fn save(&self, state: &PortfolioState) -> ServiceResult<u64> {
            self.inner.save(state).await
        }

        async fn load(&self, date: NaiveDate) -> ServiceResult<Option<PortfolioState>> {
            self.inner.load(date).await
        }

        async fn load_latest(&self) -> ServiceResult<Option<PortfolioState>> {
            let latest = self.inner.load_latest().await;
            tokio::time::sleep(self.delay).await;
            latest
        }

        async fn history(&self, start: NaiveDate, end: NaiveDate) -> ServiceResult<Vec<PortfolioState>> {
            self.inner.history(start, end).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_batches_both_reach_portfolio() {
        let store = Arc::new(SlowStore {
            inner: MemoryStateStore::new(),
            delay: Duration::from_millis(30),
        });
        let sim = TradeExecutionSimulator::new(
            config(0.0, CashSettlement::Directional),
            store.clone(),
            Arc::new(ManualClock::new(fixed_now())),
        );

        let (a, b) = tokio::join!(
            sim.execute(vec![Order::limit("AAPL", TradeSide::Buy, 10, dec!(100))]),
            sim.execute(vec![Order::limit("MSFT", TradeSide::Buy, 10, dec!(50))]),
        );
        let a = assert_ok!(a);
        let b = assert_ok!(b);

        let state = store.inner.load_latest().await.unwrap().unwrap();
        assert_eq!(state.quantity_of("AAPL"), 10);
        assert_eq!(state.quantity_of("MSFT"), 10);
        assert_eq!(state.cash_balance, dec!(8500));
        assert_eq!(store.inner.version().await, 2);
        assert!(sim.status(a.id).await.is_ok());
        assert!(sim.status(b.id).await.is_ok());
    }

    /// Store that lets one foreign write land between the first load and save.
    struct RacingStore {
        inner: MemoryStateStore,
        raced: AtomicBool,
    }

    #[async_trait]
    impl PortfolioStateStore for RacingStore {
        async fn save(&self, state: &PortfolioState) -> ServiceResult<u64> {
            self.inner.save(state).await
        }

        async fn load(&self, date: NaiveDate) -> ServiceResult<Option<PortfolioState>> {
            self.inner.load(date).await
        }

        async fn load_latest(&self) -> ServiceResult<Option<PortfolioState>> {
            let latest = self.inner.load_latest().await;
            if !self.raced.swap(true, Ordering::SeqCst) {
                let mut foreign = PortfolioState::new(fixed_now().date_naive(), dec!(20000));
                foreign.refresh_totals();
                self.inner.save(&foreign).await?;
            }
            latest
        }

        async fn history(&self, start: NaiveDate, end: NaiveDate) -> ServiceResult<Vec<PortfolioState>> {
            self.inner.history(start, end).await
        }
    }

    #[tokio::test]
    async fn test_conflict_is_reapplied_on_fresh_state() {
        let store = Arc::new(RacingStore {
            inner: MemoryStateStore::new(),
            raced: AtomicBool::new(false),
        });
        let sim = TradeExecutionSimulator::new(
            config(0.0, CashSettlement::Directional),
            store.clone(),
            Arc::new(ManualClock::new(fixed_now())),
        );

        assert_ok!(sim.execute(vec![Order::limit("AAPL", TradeSide::Buy, 10, dec!(100))]).await);

        let state = store.inner.load_latest().await.unwrap().unwrap();
        assert_eq!(state.cash_balance, dec!(19000));
        assert_eq!(state.quantity_of("AAPL"), 10);
        assert_eq!(store.inner.version().await, 2);
    }

    struct FailingStore;

    #[async_trait]
    impl PortfolioStateStore for FailingStore {
        async fn save(&self, _state: &PortfolioState) -> ServiceResult<u64> {
            Err(ServiceError::internal("disk full"))
        }

        async fn load(&self, _date: NaiveDate) -> ServiceResult<Option<PortfolioState>> {
            Ok(None)
        }

        async fn load_latest(&self) -> ServiceResult<Option<PortfolioState>> {
            Ok(None)
        }

        async fn history(&self, _start: NaiveDate, _end: NaiveDate) -> ServiceResult<Vec<PortfolioState>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_failed_write_back_records_no_batch() {
        let sim = TradeExecutionSimulator::new(
            config(0.0, CashSettlement::Directional),
            Arc::new(FailingStore),
            Arc::new(ManualClock::new(fixed_now())),
        );

        let err = assert_err!(sim.execute(vec![Order::limit("AAPL", TradeSide::Buy, 1, dec!(10))]).await);
        assert!(matches!(err, ServiceError::Internal(_)));
        assert!(sim.executions.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_buys_never_overdraw_cash_under_slippage() {
        for seed in 0..20 {
            let (sim, store) = simulator(SimulatorConfig {
                max_latency_ms: 0,
                partial_fill_probability: 0.0,
                seed: Some(seed),
                initial_cash: dec!(10000),
                ..SimulatorConfig::default()
            });
            let batch = assert_ok!(
                sim.execute(vec![
                    Order::market("AAPL", TradeSide::Buy, 75, dec!(100)),
                    Order::market("MSFT", TradeSide::Buy, 50, dec!(50)),
                ])
                .await
            );

            let state = store.load_latest().await.unwrap().unwrap();
            assert!(state.cash_balance >= Decimal::ZERO, "seed {} left cash {}", seed, state.cash_balance);
            let spent: Decimal = batch
                .results
                .iter()
                .map(|r| Decimal::from(r.filled_quantity) * r.average_price)
                .sum();
            assert_eq!(state.cash_balance, dec!(10000) - spent);
        }
    }
}
