//! Technical indicators used by the signal generator.

mod indicators;

pub use indicators::Indicators;
