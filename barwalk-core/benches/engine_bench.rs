//! Criterion benchmarks for BarWalk hot paths.
//!
//! Benchmarks:
//! 1. ATR fold over a session of minute bars
//! 2. Structure classifier fold
//! 3. Outcome simulation (forward walk over a full session)

use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use barwalk_core::domain::{Bar, BarSeries, Direction, Entry, SeriesKey, Timeframe, TradeId};
use barwalk_core::indicators::atr_series;
use barwalk_core::simulation::{OutcomeSimulator, SimulationConfig};
use barwalk_core::structure::classify;

// ── Helpers ──────────────────────────────────────────────────────────

fn session() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
}

fn make_bars(n: usize) -> Vec<Bar> {
    let start = session().and_hms_opt(4, 0, 0).unwrap();
    (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.1).sin() * 2.0;
            let open = close - 0.05;
            Bar {
                timestamp: start + Duration::minutes(i as i64),
                open,
                high: close + 0.15,
                low: open - 0.15,
                close,
                volume: 10_000 + (i as u64 % 5_000),
            }
        })
        .collect()
}

// ── 1. ATR ───────────────────────────────────────────────────────────

fn bench_atr(c: &mut Criterion) {
    let mut group = c.benchmark_group("atr_fold");
    for &bar_count in &[390, 960, 4800] {
        let bars = make_bars(bar_count);
        group.bench_with_input(BenchmarkId::from_parameter(bar_count), &bars, |b, bars| {
            b.iter(|| atr_series(black_box(bars), 14))
        });
    }
    group.finish();
}

// ── 2. Structure ─────────────────────────────────────────────────────

fn bench_structure(c: &mut Criterion) {
    let mut group = c.benchmark_group("structure_classify");
    for &bar_count in &[390, 960] {
        let bars = make_bars(bar_count);
        group.bench_with_input(BenchmarkId::from_parameter(bar_count), &bars, |b, bars| {
            b.iter(|| classify(black_box(bars), 2))
        });
    }
    group.finish();
}

// ── 3. Simulation ────────────────────────────────────────────────────

fn bench_simulation(c: &mut Criterion) {
    let bars = make_bars(960); // 04:00 through 19:59
    let series = BarSeries::new(SeriesKey::new("BENCH", session(), Timeframe::M1), bars).unwrap();
    let sim = OutcomeSimulator::new(SimulationConfig::default()).unwrap();
    let entry = Entry {
        trade_id: TradeId::new("bench"),
        instrument: "BENCH".into(),
        session: session(),
        entry_time: Some(session().and_hms_opt(9, 35, 10).unwrap()),
        entry_price: Some(100.0),
        direction: Direction::Long,
    };

    // Wide stop: the walk runs all the way to the cutoff.
    c.bench_function("simulate_full_session", |b| {
        b.iter(|| sim.simulate(black_box(&entry), black_box(&series), Some(50.0)))
    });
}

criterion_group!(benches, bench_atr, bench_structure, bench_simulation);
criterion_main!(benches);
