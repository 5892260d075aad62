use std::fmt::{Display, Formatter};

use equisync_warehouse::PriceRecord;
use serde::{Deserialize, Serialize};
use time::Date;

use crate::{Symbol, ValidationError};

/// One validated trading day for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub date: Date,
    pub symbol: Symbol,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl PriceRow {
    pub fn new(
        symbol: Symbol,
        date: Date,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Result<Self, ValidationError> {
        validate_price("open", open)?;
        validate_price("high", high)?;
        validate_price("low", low)?;
        validate_price("close", close)?;

        if high < low {
            return Err(ValidationError::InvalidBarRange);
        }

        if open < low || open > high || close < low || close > high {
            return Err(ValidationError::InvalidBarBounds);
        }

        Ok(Self {
            date,
            symbol,
            open,
            high,
            low,
            close,
            volume,
        })
    }

    /// Timezone-free `YYYY-MM-DD`.
    pub fn date_string(&self) -> String {
        format_date(self.date)
    }
}

impl From<&PriceRow> for PriceRecord {
    fn from(row: &PriceRow) -> Self {
        Self {
            date: row.date_string(),
            symbol: row.symbol.to_string(),
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        }
    }
}

/// History window requested from the price provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchWindow {
    /// Named relative period such as `7d`, `10y`, or `max`.
    Period(&'static str),
    /// Everything from this date onward.
    Since(Date),
}

impl FetchWindow {
    /// Trailing window used on routine runs.
    pub const INCREMENTAL: Self = Self::Period("7d");
}

impl Display for FetchWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Period(period) => write!(f, "period={period}"),
            Self::Since(date) => write!(f, "since={}", format_date(*date)),
        }
    }
}

pub(crate) fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

fn validate_price(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value <= 0.0 {
        return Err(ValidationError::NonPositivePrice { field });
    }
    Ok(())
}
