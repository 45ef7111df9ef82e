//! Deterministic synthetic sessions for tests, benches and offline runs.
//!
//! Each (instrument, session) pair seeds its own RNG from a BLAKE3 hash, so
//! regenerating a session always yields the same bars regardless of which
//! other sessions were generated alongside it.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use barwalk_core::domain::{Bar, Direction, Entry, SeriesError, Timeframe, TradeId};

use crate::data_loader::BarStore;

/// Regular US equity session length in minutes (09:30 to 16:00).
pub const REGULAR_SESSION_MINUTES: usize = 390;

fn session_rng(instrument: &str, session: NaiveDate) -> StdRng {
    let seed = blake3::hash(format!("{instrument}:{session}").as_bytes());
    StdRng::from_seed(*seed.as_bytes())
}

/// One session of one-minute bars starting at `open`.
pub fn synthetic_session(
    instrument: &str,
    session: NaiveDate,
    open: NaiveTime,
    minutes: usize,
) -> Vec<Bar> {
    let mut rng = session_rng(instrument, session);
    let start = session.and_time(open);
    let mut price: f64 = rng.gen_range(20.0..200.0);
    let mut bars = Vec::with_capacity(minutes);

    for i in 0..minutes {
        let open_price = price;
        let ret: f64 = rng.gen_range(-0.0015..0.0015);
        let close = (open_price * (1.0 + ret)).max(0.01);
        let high = open_price.max(close) * (1.0 + rng.gen_range(0.0..0.0008));
        let low = open_price.min(close) * (1.0 - rng.gen_range(0.0..0.0008));
        bars.push(Bar {
            timestamp: start + Duration::minutes(i as i64),
            open: open_price,
            high,
            low,
            close,
            volume: rng.gen_range(1_000..50_000u64),
        });
        price = close;
    }
    bars
}

/// The `count` most recent weekdays ending at `end` (inclusive), oldest first.
pub fn recent_weekdays(end: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut days = Vec::with_capacity(count);
    let mut day = end;
    while days.len() < count {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(day);
        }
        day -= Duration::days(1);
    }
    days.reverse();
    days
}

/// A one-minute bar store covering every instrument and session given.
pub fn synthetic_store(
    instruments: &[String],
    sessions: &[NaiveDate],
    open: NaiveTime,
) -> Result<BarStore, SeriesError> {
    let mut store = BarStore::new(Timeframe::M1);
    for instrument in instruments {
        for &session in sessions {
            let bars = synthetic_session(instrument, session, open, REGULAR_SESSION_MINUTES);
            store.insert_session(instrument.clone(), session, bars)?;
        }
    }
    Ok(store)
}

/// Random entries on the bars of `store`, `per_session` per session.
///
/// Entries land between the second hour and the last half hour of each
/// session, a few seconds into a bar, priced at that bar's close.
pub fn synthetic_entries(store: &BarStore, per_session: usize, seed: u64) -> Vec<Entry> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut entries = Vec::new();
    for instrument in store.instruments() {
        for session in store.sessions(instrument) {
            let Some(bars) = store.session_bars(instrument, session) else {
                continue;
            };
            if bars.len() < 120 {
                continue;
            }
            for k in 0..per_session {
                let bar = bars[rng.gen_range(60..bars.len() - 30)];
                let direction = if rng.gen_bool(0.5) {
                    Direction::Long
                } else {
                    Direction::Short
                };
                entries.push(Entry {
                    trade_id: TradeId::new(format!("{instrument}-{session}-{k}")),
                    instrument: instrument.to_string(),
                    session,
                    entry_time: Some(bar.timestamp + Duration::seconds(rng.gen_range(1..60))),
                    entry_price: Some(bar.close),
                    direction,
                });
            }
        }
    }
    entries
}
