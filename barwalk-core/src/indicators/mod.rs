//! Volatility indicators.
//!
//! Only ATR is needed by the engine: it supplies the 1R stop distance for the
//! outcome simulator.

pub mod atr;

pub use atr::{
    atr, atr_series, stop_distance_at, true_range, true_range_series, AtrError, AtrPoint,
    AtrState, DEFAULT_ATR_PERIOD,
};

/// Build one-minute bars from `(open, high, low, close)` tuples for testing.
///
/// Bars start at 2024-03-04 09:30 and are one minute apart.
#[cfg(test)]
pub fn make_ohlc_bars(data: &[(f64, f64, f64, f64)]) -> Vec<crate::domain::Bar> {
    use crate::domain::Bar;
    let start = chrono::NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap();
    data.iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| Bar {
            timestamp: start + chrono::Duration::minutes(i as i64),
            open,
            high,
            low,
            close,
            volume: 1000,
        })
        .collect()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
