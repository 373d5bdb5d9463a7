//! Portfolio reconciler: turns signals into trades and persists the result.
//!
//! Operations on the portfolio take one async mutex for their whole duration.
//! Every pass works on a copy of the latest stored state and nothing is
//! written until the final versioned save, so a failed fetch, timeout or
//! version conflict leaves nothing half-applied.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::deadline::Deadline;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{ExecutionBatch, MarketRegime, Order, PortfolioState, SignalReport, TradeRecord, TradeSide};
use crate::services::{PortfolioService, SignalRequest, StrategyService, TradeExecutionService};

use super::{to_price, PortfolioStateStore, PositionSizer, ReconcilerConfig, WorkingPortfolio};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceKind {
    Weekly,
    Biweekly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerPhase {
    Idle,
    Rebalancing,
}

/// Trades applied by a rebalance and the state they produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceOutcome {
    pub kind: RebalanceKind,
    pub regime: MarketRegime,
    pub trades: Vec<TradeRecord>,
    pub status: PortfolioState,
}

/// Orders routed to the execution service and the state read back afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub orders: Vec<Order>,
    pub execution: Option<ExecutionBatch>,
    pub status: PortfolioState,
}

pub struct PortfolioReconciler {
    signals: Arc<dyn StrategyService>,
    store: Arc<dyn PortfolioStateStore>,
    executor: Option<Arc<dyn TradeExecutionService>>,
    clock: Arc<dyn Clock>,
    sizer: PositionSizer,
    config: ReconcilerConfig,
    write_lock: Mutex<()>,
    rebalancing: AtomicBool,
}

/// Marks a rebalance in flight until dropped.
struct RebalanceMark<'a>(&'a AtomicBool);

impl<'a> RebalanceMark<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RebalanceMark<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl PortfolioReconciler {
    pub fn new(
        signals: Arc<dyn StrategyService>,
        store: Arc<dyn PortfolioStateStore>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            signals,
            store,
            executor: None,
            clock,
            sizer: PositionSizer::new(config.sizing_base),
            config,
            write_lock: Mutex::new(()),
            rebalancing: AtomicBool::new(false),
        }
    }

    /// Route `submit_orders` through an execution service.
    pub fn with_executor(mut self, executor: Arc<dyn TradeExecutionService>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn phase(&self) -> ReconcilerPhase {
        if self.rebalancing.load(Ordering::SeqCst) {
            ReconcilerPhase::Rebalancing
        } else {
            ReconcilerPhase::Idle
        }
    }

    /// Weekly pass: liquidate symbols that lost their signal, then (in a
    /// bull regime) resize holdings and open new positions.
    pub async fn weekly_rebalance(&self, date: Option<NaiveDate>) -> ServiceResult<RebalanceOutcome> {
        let date = date.unwrap_or_else(|| self.clock.today());
        self.config.gate.check_weekly(date)?;

        if self.phase() == ReconcilerPhase::Rebalancing {
            info!("Waiting for in-flight rebalance to finish");
        }
        let _lock = self.write_lock.lock().await;
        let _mark = RebalanceMark::set(&self.rebalancing);
        info!(date = %date, "Starting weekly rebalance");

        let current = self.reload(date).await?;
        let report = self.fetch_signals(date).await?;

        let mut book = WorkingPortfolio::new(current);
        self.apply_weekly(&mut book, &report)?;

        self.commit(book, date, RebalanceKind::Weekly, report.regime)
            .await
    }

    /// Weekly pass followed by a resize of every holding against fresh
    /// signals. Both passes are persisted together.
    pub async fn biweekly_rebalance(&self, date: Option<NaiveDate>) -> ServiceResult<RebalanceOutcome> {
        let date = date.unwrap_or_else(|| self.clock.today());
        self.config.gate.check_biweekly(date)?;

        if self.phase() == ReconcilerPhase::Rebalancing {
            info!("Waiting for in-flight rebalance to finish");
        }
        let _lock = self.write_lock.lock().await;
        let _mark = RebalanceMark::set(&self.rebalancing);
        info!(date = %date, "Starting biweekly rebalance");

        let current = self.reload(date).await?;
        let report = self.fetch_signals(date).await?;

        let mut book = WorkingPortfolio::new(current);
        self.apply_weekly(&mut book, &report)?;

        let fresh = self.fetch_signals(date).await?;
        self.apply_resize(&mut book, &fresh)?;

        self.commit(book, date, RebalanceKind::Biweekly, fresh.regime)
            .await
    }

    /// Diff a risk-weighted target portfolio against current holdings and
    /// send the difference to the execution service as market orders.
    pub async fn submit_orders(&self, date: Option<NaiveDate>) -> ServiceResult<SubmissionOutcome> {
        let executor = self
            .executor
            .as_ref()
            .ok_or_else(|| ServiceError::FailedPrecondition("no trade execution service configured".into()))?;
        let date = date.unwrap_or_else(|| self.clock.today());

        let _lock = self.write_lock.lock().await;
        let current = self.reload(date).await?;
        let report = self.fetch_signals(date).await?;
        let orders = self.plan_orders(&current, &report)?;

        if orders.is_empty() {
            info!("Portfolio already matches targets, no orders");
            return Ok(SubmissionOutcome {
                orders,
                execution: None,
                status: current,
            });
        }

        info!(orders = orders.len(), "Submitting orders");
        let batch = self
            .timed("execute trades", executor.execute_trades(orders.clone()))
            .await?;

        let status = self.reload(date).await?;

        Ok(SubmissionOutcome {
            orders,
            execution: Some(batch),
            status,
        })
    }

    /// Latest persisted state.
    pub async fn portfolio_status(&self) -> ServiceResult<PortfolioState> {
        let _lock = self.write_lock.lock().await;
        self.reload(self.clock.today()).await
    }

    pub async fn portfolio_history(&self, start: NaiveDate, end: NaiveDate) -> ServiceResult<Vec<PortfolioState>> {
        if start > end {
            return Err(ServiceError::invalid(format!("start {} is after end {}", start, end)));
        }
        self.timed("load history", self.store.history(start, end)).await
    }

    fn apply_weekly(&self, book: &mut WorkingPortfolio, report: &SignalReport) -> ServiceResult<()> {
        for symbol in book.state().held_symbols() {
            if !report.contains(&symbol) {
                if let Some(trade) = book.sell_position(&symbol) {
                    info!(symbol = %symbol, quantity = trade.quantity, "Sold position without signal");
                }
            }
        }

        if !report.regime.is_bullish() {
            info!(regime = ?report.regime, "Regime not bullish, skipping buys");
            return Ok(());
        }

        let capital = self.sizer.available_capital(book.state());
        for signal in &report.signals {
            let price = to_price(signal.reference_price)?;
            let target = self.sizer.target_quantity(signal.risk_unit, capital);

            if book.state().quantity_of(&signal.symbol) > 0 {
                book.adjust_position(&signal.symbol, target, price);
            } else if book.state().cash_balance > Decimal::ZERO {
                book.buy_position(&signal.symbol, target, price);
            }
        }
        Ok(())
    }

    fn apply_resize(&self, book: &mut WorkingPortfolio, report: &SignalReport) -> ServiceResult<()> {
        if !report.regime.is_bullish() {
            info!(regime = ?report.regime, "Regime not bullish, skipping resize");
            return Ok(());
        }

        let capital = self.sizer.available_capital(book.state());
        for symbol in book.state().held_symbols() {
            let Some(signal) = report.find(&symbol) else {
                continue;
            };
            let price = to_price(signal.reference_price)?;
            let target = self.sizer.target_quantity(signal.risk_unit, capital);
            book.adjust_position(&symbol, target, price);
        }
        Ok(())
    }

    fn plan_orders(&self, current: &PortfolioState, report: &SignalReport) -> ServiceResult<Vec<Order>> {
        let capital = self.sizer.available_capital(current);
        let targets =
            self.sizer
                .risk_weighted_allocation(&report.signals, capital, self.config.order_slippage_buffer)?;
        let mut sells = Vec::new();
        let mut buys = Vec::new();

        for (symbol, position) in &current.positions {
            if position.quantity > 0 && !targets.iter().any(|(s, _, _)| s == symbol) {
                sells.push(Order::market(symbol.clone(), TradeSide::Sell, position.quantity, position.current_price));
            }
        }

        for (symbol, target, price) in targets {
            let diff = target - current.quantity_of(&symbol);
            if diff > 0 {
                buys.push(Order::market(symbol, TradeSide::Buy, diff, price));
            } else if diff < 0 {
                sells.push(Order::market(symbol, TradeSide::Sell, -diff, price));
            }
        }

        // sells settle first so their proceeds fund the buys
        sells.extend(buys);
        Ok(sells)
    }

    async fn reload(&self, date: NaiveDate) -> ServiceResult<PortfolioState> {
        let latest = self.timed("load portfolio state", self.store.load_latest()).await?;
        Ok(latest.unwrap_or_else(|| {
            info!(cash = %self.config.initial_cash, "No stored portfolio, starting from cash");
            PortfolioState::new(date, self.config.initial_cash)
        }))
    }

    async fn fetch_signals(&self, date: NaiveDate) -> ServiceResult<SignalReport> {
        let start = date - ChronoDuration::days(self.config.history_days);
        let request = SignalRequest::new(
            self.config.universe.clone(),
            start.format("%Y-%m-%d").to_string(),
            date.format("%Y-%m-%d").to_string(),
        );
        let deadline = Deadline::after(self.call_timeout());
        let report = deadline
            .run("generate signals", self.signals.generate_signals(&request, deadline))
            .await?;

        info!(regime = ?report.regime, signals = report.signals.len(), "Received signals");
        Ok(report)
    }

    async fn commit(
        &self,
        book: WorkingPortfolio,
        date: NaiveDate,
        kind: RebalanceKind,
        regime: MarketRegime,
    ) -> ServiceResult<RebalanceOutcome> {
        let (mut state, trades) = book.finish(date);

        let version = match self.timed("save portfolio state", self.store.save(&state)).await {
            Ok(version) => version,
            Err(e) => {
                warn!(error = %e, "Rebalance aborted, state not committed");
                return Err(e);
            }
        };
        state.version = version;

        info!(
            kind = ?kind,
            trades = trades.len(),
            cash = %state.cash_balance,
            total = %state.total_value,
            "Rebalance committed"
        );

        Ok(RebalanceOutcome {
            kind,
            regime,
            trades,
            status: state,
        })
    }

    fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.config.call_timeout_secs.max(1))
    }

    async fn timed<T, F>(&self, what: &str, fut: F) -> ServiceResult<T>
    where
        F: Future<Output = ServiceResult<T>>,
    {
        Deadline::after(self.call_timeout()).run(what, fut).await
    }
}

#[async_trait]
impl PortfolioService for PortfolioReconciler {
    async fn weekly_rebalance(&self, date: Option<NaiveDate>) -> ServiceResult<RebalanceOutcome> {
        PortfolioReconciler::weekly_rebalance(self, date).await
    }

    async fn biweekly_rebalance(&self, date: Option<NaiveDate>) -> ServiceResult<RebalanceOutcome> {
        PortfolioReconciler::biweekly_rebalance(self, date).await
    }

    async fn portfolio_status(&self) -> ServiceResult<PortfolioState> {
        PortfolioReconciler::portfolio_status(self).await
    }
}
