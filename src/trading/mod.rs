//! Portfolio reconciliation: rebalance scheduling, position sizing, state persistence.

mod book;
mod config;
mod position_sizer;
mod reconciler;
mod schedule;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::ServiceResult;
use crate::models::PortfolioState;

pub use book::WorkingPortfolio;
pub use config::{RebalanceGate, ReconcilerConfig, SizingBase};
pub use position_sizer::{to_price, PositionSizer};
pub use reconciler::{PortfolioReconciler, RebalanceKind, RebalanceOutcome, ReconcilerPhase, SubmissionOutcome};
pub use schedule::{is_second_wednesday, is_wednesday};

/// Durable portfolio snapshots with optimistic versioning.
#[async_trait]
pub trait PortfolioStateStore: Send + Sync {
    /// Store `state` as the new latest snapshot and return its version.
    ///
    /// `state.version` must equal the latest stored version (0 for an empty
    /// store), otherwise the save fails with `Conflict`.
    async fn save(&self, state: &PortfolioState) -> ServiceResult<u64>;

    /// Latest snapshot recorded for `date`.
    async fn load(&self, date: NaiveDate) -> ServiceResult<Option<PortfolioState>>;

    async fn load_latest(&self) -> ServiceResult<Option<PortfolioState>>;

    /// Snapshots dated within `[start, end]`, oldest first.
    async fn history(&self, start: NaiveDate, end: NaiveDate) -> ServiceResult<Vec<PortfolioState>>;
}
