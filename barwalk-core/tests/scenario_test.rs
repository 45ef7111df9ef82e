//! End-to-end scenarios through the public API.
//!
//! A: R1 reached, stop later: WIN with max_r = 1.
//! B: R1 touched on the stop bar: LOSS, the target is not credited.
//! C: a confirmed swing high is broken by a close: BULL until the swing low breaks.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::sync::Arc;

use barwalk_core::data::{BarSource, DataError, HtfCache, HtfLookback};
use barwalk_core::domain::{Bar, BarSeries, Direction, Entry, SeriesKey, Timeframe, TradeId};
use barwalk_core::simulation::{ExitReason, OutcomeSimulator, SimulationConfig, TradeResult};
use barwalk_core::structure::{classify, structure_at, BreakKind, StructureLabel};

fn session() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, 13).unwrap()
}

fn at(h: u32, m: u32) -> NaiveDateTime {
    session().and_hms_opt(h, m, 0).unwrap()
}

fn m1_series(start: NaiveDateTime, ohlc: &[(f64, f64, f64, f64)]) -> BarSeries {
    let bars = ohlc
        .iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| Bar {
            timestamp: start + Duration::minutes(i as i64),
            open,
            high,
            low,
            close,
            volume: 1_000,
        })
        .collect();
    BarSeries::new(SeriesKey::new("MU", session(), Timeframe::M1), bars).unwrap()
}

fn long_entry() -> Entry {
    Entry {
        trade_id: TradeId::new("MU-1"),
        instrument: "MU".into(),
        session: session(),
        entry_time: Some(at(10, 0) + Duration::seconds(40)),
        entry_price: Some(152.50),
        direction: Direction::Long,
    }
}

// ── Scenario A ───────────────────────────────────────────────────────

#[test]
fn scenario_a_no_conflict() {
    let series = m1_series(
        at(10, 0),
        &[
            (152.45, 152.55, 152.40, 152.50), // anchor bar
            (152.50, 152.70, 152.40, 152.60),
            (152.60, 152.90, 152.55, 152.80),
            (152.80, 153.00, 151.90, 151.95),
        ],
    );
    let sim = OutcomeSimulator::new(SimulationConfig::default()).unwrap();
    let out = sim.simulate(&long_entry(), &series, Some(0.35)).unwrap();

    assert_eq!(out.result, TradeResult::Win);
    assert_eq!(out.max_r, 1);
    assert_eq!(out.level(1).unwrap().time, Some(at(10, 2)));
    assert_eq!(out.stop.time, Some(at(10, 3)));
    assert_eq!(out.exit_reason, ExitReason::StopHit);
    assert!((out.stop.price - 152.15).abs() < 1e-9);
    assert!((out.level(1).unwrap().price - 152.85).abs() < 1e-9);
}

// ── Scenario B ───────────────────────────────────────────────────────

#[test]
fn scenario_b_same_bar_conflict() {
    let series = m1_series(
        at(10, 0),
        &[
            (152.45, 152.55, 152.40, 152.50),
            (152.50, 152.70, 152.40, 152.60),
            (152.60, 152.90, 152.00, 152.10),
        ],
    );
    let sim = OutcomeSimulator::new(SimulationConfig::default()).unwrap();
    let out = sim.simulate(&long_entry(), &series, Some(0.35)).unwrap();

    assert_eq!(out.result, TradeResult::Loss);
    assert_eq!(out.max_r, -1);
    assert!(!out.level(1).unwrap().hit);
    assert_eq!(out.stop.time, Some(at(10, 2)));
}

// ── Scenario C ───────────────────────────────────────────────────────

/// Highs for a rally to a peak at bar 8, a dip to bar 14, a breakout at bar 20
/// and a collapse through the dip low at bar 25.
const SCENARIO_C_HIGHS: [f64; 26] = [
    100.0, 100.5, 101.0, 101.5, 102.0, 102.5, 103.0, 103.5, 104.0, // 0..=8
    103.4, 102.8, 102.2, 101.6, 101.0, 100.4, // 9..=14
    100.9, 101.4, 101.9, 102.4, 102.9, // 15..=19
    105.0, // 20
    104.5, 104.0, 103.0, 101.0, 99.5, // 21..=25
];

fn scenario_c_bars(step: Duration) -> Vec<Bar> {
    SCENARIO_C_HIGHS
        .iter()
        .enumerate()
        .map(|(i, &high)| Bar {
            timestamp: at(9, 30) + step * i as i32,
            open: high - 0.5,
            high,
            low: high - 1.0,
            close: high - 0.3,
            volume: 1_000,
        })
        .collect()
}

#[test]
fn scenario_c_structure_break() {
    let bars = scenario_c_bars(Duration::minutes(1));
    let states = classify(&bars, 2).unwrap();

    // Swing high at bar 8 is confirmed by bar 10.
    assert!(states[9].upper_reference().is_none());
    let upper = states[10].upper_reference().unwrap();
    assert_eq!(upper.price, 104.0);
    assert_eq!(upper.swing_time, bars[8].timestamp);

    for state in &states[..20] {
        assert_eq!(state.label(), StructureLabel::Neutral);
    }
    for state in &states[20..25] {
        assert_eq!(state.label(), StructureLabel::Bull);
    }
    assert_eq!(states[20].event().unwrap().kind, BreakKind::Bos);

    // Swing low at bar 14 (99.4) is broken by the close of bar 25.
    assert_eq!(states[24].lower_reference().unwrap().price, 99.4);
    assert_eq!(states[25].label(), StructureLabel::Bear);
    assert_eq!(states[25].event().unwrap().kind, BreakKind::Choch);
}

// ── Structure through the HTF cache ──────────────────────────────────

struct ScenarioSource;

impl BarSource for ScenarioSource {
    fn name(&self) -> &str {
        "scenario"
    }

    fn fetch(
        &self,
        _instrument: &str,
        timeframe: Timeframe,
        _session: NaiveDate,
        _lookback_days: u32,
    ) -> Result<Vec<Bar>, DataError> {
        Ok(scenario_c_bars(timeframe.duration()))
    }
}

#[test]
fn structure_snapshot_through_cache() {
    let cache = HtfCache::new(Arc::new(ScenarioSource), HtfLookback::default());

    // M5 bar 20 opens at 11:10 and closes at 11:15.
    let before = structure_at(&cache, "MU", session(), &[Timeframe::M5], 2, at(11, 14)).unwrap();
    assert_eq!(before.get(Timeframe::M5), Some(StructureLabel::Neutral));

    let after = structure_at(&cache, "MU", session(), &[Timeframe::M5], 2, at(11, 15)).unwrap();
    assert_eq!(after.get(Timeframe::M5), Some(StructureLabel::Bull));

    let multi = structure_at(
        &cache,
        "MU",
        session(),
        &[Timeframe::M5, Timeframe::M15],
        2,
        at(11, 15),
    )
    .unwrap();
    assert_eq!(multi.labels.len(), 2);
    assert_eq!(cache.fetch_count(), 2);
}
