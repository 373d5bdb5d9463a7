//! Simulated order execution.

mod simulator;

pub use simulator::{CashSettlement, SimulatorConfig, TradeExecutionSimulator};
