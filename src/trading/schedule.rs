//! Rebalance calendar rules.

use chrono::{Datelike, NaiveDate, Weekday};

use crate::error::{ServiceError, ServiceResult};

use super::RebalanceGate;

pub fn is_wednesday(date: NaiveDate) -> bool {
    date.weekday() == Weekday::Wed
}

/// Second Wednesday of the month falls on day 8 through 14.
pub fn is_second_wednesday(date: NaiveDate) -> bool {
    is_wednesday(date) && (date.day() - 1) / 7 == 1
}

impl RebalanceGate {
    pub fn check_weekly(&self, date: NaiveDate) -> ServiceResult<()> {
        match self {
            RebalanceGate::Strict if !is_wednesday(date) => Err(ServiceError::FailedPrecondition(
                format!("weekly rebalance only runs on Wednesday, {} is a {}", date, date.weekday()),
            )),
            _ => Ok(()),
        }
    }

    pub fn check_biweekly(&self, date: NaiveDate) -> ServiceResult<()> {
        match self {
            RebalanceGate::Strict if !is_second_wednesday(date) => Err(ServiceError::FailedPrecondition(
                format!("biweekly rebalance only runs on the second Wednesday, not {}", date),
            )),
            _ => Ok(()),
        }
    }
}
