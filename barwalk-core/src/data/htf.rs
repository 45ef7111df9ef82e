//! Higher-timeframe bar cache.
//!
//! Fetch once, serve many: the first request for a (instrument, session,
//! timeframe) key pulls the whole lookback window through the [`BarSource`]
//! and later requests for any `as_of` time are answered by slicing that one
//! series in memory.
//!
//! Reads go through an `arc-swap` snapshot of the key map and never block.
//! Population is serialized per key: concurrent callers for the same key wait
//! on that key's fetch lock and then find the slot already filled. Callers for
//! different keys populate in parallel.
//!
//! A failed fetch marks the key unavailable for the life of the cache. It is
//! not retried.

use arc_swap::ArcSwap;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

use super::provider::BarSource;
use crate::domain::{Bar, BarSeries, SeriesKey, Timeframe};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HtfError {
    #[error("bars for {key} are unavailable: {reason}")]
    Unavailable { key: String, reason: String },
}

/// Calendar days fetched per timeframe when a key is first populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HtfLookback {
    pub m1: u32,
    pub m5: u32,
    pub m15: u32,
    pub m30: u32,
    pub h1: u32,
    pub h4: u32,
    pub d1: u32,
}

impl Default for HtfLookback {
    fn default() -> Self {
        Self {
            m1: 1,
            m5: 5,
            m15: 10,
            m30: 20,
            h1: 30,
            h4: 90,
            d1: 365,
        }
    }
}

impl HtfLookback {
    pub fn days(&self, timeframe: Timeframe) -> u32 {
        match timeframe {
            Timeframe::M1 => self.m1,
            Timeframe::M5 => self.m5,
            Timeframe::M15 => self.m15,
            Timeframe::M30 => self.m30,
            Timeframe::H1 => self.h1,
            Timeframe::H4 => self.h4,
            Timeframe::D1 => self.d1,
        }
    }
}

/// A prefix view of a cached series: every bar with `timestamp <= as_of`.
///
/// Windows for the same key share one `Arc<BarSeries>`.
#[derive(Debug, Clone)]
pub struct HtfWindow {
    series: Arc<BarSeries>,
    len: usize,
}

impl HtfWindow {
    fn new(series: Arc<BarSeries>, as_of: NaiveDateTime) -> Self {
        let len = series.count_up_to(as_of);
        Self { series, len }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.series.bars()[..self.len]
    }

    /// The full cached superset this window was cut from.
    pub fn series(&self) -> &Arc<BarSeries> {
        &self.series
    }

    pub fn key(&self) -> &SeriesKey {
        self.series.key()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars().last()
    }

    pub fn shares_storage_with(&self, other: &HtfWindow) -> bool {
        Arc::ptr_eq(&self.series, &other.series)
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Ready(Arc<BarSeries>),
    Unavailable(String),
}

type SlotMap = HashMap<SeriesKey, Slot>;

pub struct HtfCache {
    source: Arc<dyn BarSource>,
    lookback: HtfLookback,
    slots: ArcSwap<SlotMap>,
    fetch_locks: Mutex<HashMap<SeriesKey, Arc<Mutex<()>>>>,
    fetches: AtomicUsize,
}

impl HtfCache {
    pub fn new(source: Arc<dyn BarSource>, lookback: HtfLookback) -> Self {
        Self {
            source,
            lookback,
            slots: ArcSwap::from_pointee(SlotMap::new()),
            fetch_locks: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn lookback(&self) -> &HtfLookback {
        &self.lookback
    }

    /// Bars for the key with `timestamp <= as_of`.
    pub fn get_bars(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        session: NaiveDate,
        as_of: NaiveDateTime,
    ) -> Result<HtfWindow, HtfError> {
        let key = SeriesKey::new(instrument, session, timeframe);
        let series = self.series(&key)?;
        Ok(HtfWindow::new(series, as_of))
    }

    /// The full cached series for `key`, populating it on first use.
    pub fn series(&self, key: &SeriesKey) -> Result<Arc<BarSeries>, HtfError> {
        if let Some(slot) = self.slots.load().get(key) {
            return resolve(key, slot);
        }

        let lock = {
            let mut locks = self
                .fetch_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        // Another caller may have populated the key while we waited.
        if let Some(slot) = self.slots.load().get(key) {
            return resolve(key, slot);
        }

        let slot = self.populate(key);
        self.slots.rcu(|current| {
            let mut next = SlotMap::clone(current);
            next.insert(key.clone(), slot.clone());
            next
        });
        resolve(key, &slot)
    }

    fn populate(&self, key: &SeriesKey) -> Slot {
        let days = self.lookback.days(key.timeframe);
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let fetched = self
            .source
            .fetch(&key.instrument, key.timeframe, key.session, days)
            .map_err(|e| e.to_string())
            .and_then(|bars| {
                BarSeries::from_unsorted(key.clone(), bars).map_err(|e| e.to_string())
            });

        match fetched {
            Ok(series) => {
                debug!(
                    key = %key,
                    source = self.source.name(),
                    lookback_days = days,
                    bars = series.len(),
                    "htf series cached"
                );
                Slot::Ready(Arc::new(series))
            }
            Err(reason) => {
                warn!(key = %key, %reason, "htf series unavailable");
                Slot::Unavailable(reason)
            }
        }
    }

    /// Number of underlying fetches performed so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of populated keys, including unavailable ones.
    pub fn len(&self) -> usize {
        self.slots.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.load().is_empty()
    }

    /// Drop every cached slot. The fetch counter is kept.
    ///
    /// Per-key fetch locks outlive the slots, so a population already running
    /// when `clear` is called still serializes later callers for that key and
    /// its result lands in the cleared map.
    pub fn clear(&self) {
        self.slots.store(Arc::new(SlotMap::new()));
    }
}

fn resolve(key: &SeriesKey, slot: &Slot) -> Result<Arc<BarSeries>, HtfError> {
    match slot {
        Slot::Ready(series) => Ok(Arc::clone(series)),
        Slot::Unavailable(reason) => Err(HtfError::Unavailable {
            key: key.to_string(),
            reason: reason.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::DataError;
    use std::sync::mpsc;
    use std::thread;

    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingSource {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    impl BarSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        fn fetch(
            &self,
            instrument: &str,
            timeframe: Timeframe,
            session: NaiveDate,
            _lookback_days: u32,
        ) -> Result<Vec<Bar>, DataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DataError::NotFound {
                    instrument: instrument.to_string(),
                    session,
                });
            }
            let start = session.and_hms_opt(9, 30, 0).unwrap();
            Ok((0..12)
                .map(|i| {
                    let px = 100.0 + i as f64;
                    Bar {
                        timestamp: start + timeframe.duration() * i,
                        open: px,
                        high: px + 1.0,
                        low: px - 1.0,
                        close: px + 0.5,
                        volume: 10,
                    }
                })
                .collect())
        }
    }

    fn session() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        session().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn second_request_is_served_from_memory() {
        let source = CountingSource::new(false);
        let cache = HtfCache::new(source.clone(), HtfLookback::default());

        let early = cache.get_bars("MU", Timeframe::M5, session(), at(9, 40)).unwrap();
        let late = cache.get_bars("MU", Timeframe::M5, session(), at(10, 0)).unwrap();

        assert_eq!(early.len(), 3); // 09:30, 09:35, 09:40
        assert_eq!(late.len(), 7);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.fetch_count(), 1);
        assert!(early.shares_storage_with(&late));
        assert_eq!(early.bars(), &late.bars()[..early.len()]);
    }

    #[test]
    fn as_of_before_first_bar_is_empty() {
        let cache = HtfCache::new(CountingSource::new(false), HtfLookback::default());
        let window = cache.get_bars("MU", Timeframe::H1, session(), at(9, 0)).unwrap();
        assert!(window.is_empty());
        assert!(window.last().is_none());
    }

    #[test]
    fn distinct_keys_fetch_separately() {
        let cache = HtfCache::new(CountingSource::new(false), HtfLookback::default());
        cache.get_bars("MU", Timeframe::M5, session(), at(10, 0)).unwrap();
        cache.get_bars("MU", Timeframe::M15, session(), at(10, 0)).unwrap();
        cache.get_bars("NVDA", Timeframe::M5, session(), at(10, 0)).unwrap();
        assert_eq!(cache.fetch_count(), 3);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn failure_is_permanent_and_not_refetched() {
        let source = CountingSource::new(true);
        let cache = HtfCache::new(source.clone(), HtfLookback::default());
        for _ in 0..3 {
            let err = cache
                .get_bars("MU", Timeframe::H1, session(), at(11, 0))
                .unwrap_err();
            assert!(matches!(err, HtfError::Unavailable { .. }));
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_first_access_fetches_once() {
        let source = CountingSource::new(false);
        let cache = Arc::new(HtfCache::new(source.clone(), HtfLookback::default()));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    cache
                        .get_bars("MU", Timeframe::M15, session(), at(9, 30 + (i % 4) * 5))
                        .unwrap()
                })
            })
            .collect();
        let windows: Vec<HtfWindow> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        for w in &windows {
            assert!(w.shares_storage_with(&windows[0]));
        }
    }

    #[test]
    fn clear_forces_refetch() {
        let cache = HtfCache::new(CountingSource::new(false), HtfLookback::default());
        cache.get_bars("MU", Timeframe::M5, session(), at(10, 0)).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        cache.get_bars("MU", Timeframe::M5, session(), at(10, 0)).unwrap();
        assert_eq!(cache.fetch_count(), 2);
    }

    /// Blocks its first fetch until released; later fetches return at once.
    struct GatedSource {
        calls: AtomicUsize,
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl BarSource for GatedSource {
        fn name(&self) -> &str {
            "gated"
        }

        fn fetch(
            &self,
            _instrument: &str,
            timeframe: Timeframe,
            session: NaiveDate,
            _lookback_days: u32,
        ) -> Result<Vec<Bar>, DataError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.started.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            let start = session.and_hms_opt(9, 30, 0).unwrap();
            Ok((0..4)
                .map(|i| Bar {
                    timestamp: start + timeframe.duration() * i,
                    open: 100.0,
                    high: 101.0,
                    low: 99.0,
                    close: 100.5,
                    volume: 10,
                })
                .collect())
        }
    }

    #[test]
    fn clear_during_population_does_not_duplicate_fetch() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let source = Arc::new(GatedSource {
            calls: AtomicUsize::new(0),
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        });
        let cache = Arc::new(HtfCache::new(source.clone(), HtfLookback::default()));

        let first = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get_bars("MU", Timeframe::M5, session(), at(10, 0)))
        };
        started_rx.recv().unwrap();
        cache.clear();

        let second = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get_bars("MU", Timeframe::M5, session(), at(10, 0)))
        };
        thread::sleep(std::time::Duration::from_millis(50));
        release_tx.send(()).unwrap();

        let a = first.join().unwrap().unwrap();
        let b = second.join().unwrap().unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.fetch_count(), 1);
        assert!(a.shares_storage_with(&b));
    }

    #[test]
    fn lookback_defaults() {
        let lb = HtfLookback::default();
        assert_eq!(lb.days(Timeframe::M5), 5);
        assert_eq!(lb.days(Timeframe::H1), 30);
        assert_eq!(lb.days(Timeframe::D1), 365);
    }
}
