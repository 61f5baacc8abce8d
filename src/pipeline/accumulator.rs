//! Size/time batch accumulator.
//!
//! The accumulator is a plain state machine: callers pass the current instant
//! in, so the delivery loop decides the cadence and tests control the clock.

use crate::domain::{Batch, FlushTrigger, LogLine};
use std::mem;
use std::time::Duration;
use tokio::time::Instant;

/// Default size threshold (1 MiB).
pub const DEFAULT_MAX_BYTES: usize = 1024 * 1024;

/// Default time threshold.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Flush once the buffered lines reach this many bytes.
    pub max_bytes: usize,
    /// Flush once this long has passed since the previous flush.
    pub max_age: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

#[derive(Debug)]
pub struct BatchAccumulator {
    config: BatchConfig,
    lines: Vec<LogLine>,
    byte_size: usize,
    last_flush: Instant,
}

impl BatchAccumulator {
    pub fn new(config: BatchConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    /// Create an accumulator whose time window opens at `now`.
    pub fn starting_at(config: BatchConfig, now: Instant) -> Self {
        Self {
            config,
            lines: Vec::new(),
            byte_size: 0,
            last_flush: now,
        }
    }

    /// Append a line, then evaluate both triggers.
    pub fn push(&mut self, line: LogLine, now: Instant) -> Option<Batch> {
        self.byte_size += line.len();
        self.lines.push(line);
        self.evaluate(now)
    }

    /// Evaluate the triggers without new input.
    pub fn poll(&mut self, now: Instant) -> Option<Batch> {
        self.evaluate(now)
    }

    fn evaluate(&mut self, now: Instant) -> Option<Batch> {
        if self.lines.is_empty() {
            return None;
        }
        if self.byte_size >= self.config.max_bytes {
            return Some(self.flush(FlushTrigger::Size, now));
        }
        if now.saturating_duration_since(self.last_flush) >= self.config.max_age {
            return Some(self.flush(FlushTrigger::Time, now));
        }
        None
    }

    fn flush(&mut self, trigger: FlushTrigger, now: Instant) -> Batch {
        let lines = mem::take(&mut self.lines);
        let byte_size = mem::replace(&mut self.byte_size, 0);
        self.last_flush = now;
        Batch::from_parts(lines, byte_size, trigger)
    }

    /// Take whatever is buffered without a flush. Used at shutdown for accounting.
    pub(crate) fn discard(&mut self) -> usize {
        self.byte_size = 0;
        mem::take(&mut self.lines).len()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn last_flush(&self) -> Instant {
        self.last_flush
    }

    /// Instant at which the time trigger fires for a non-empty buffer.
    pub fn deadline(&self) -> Instant {
        self.last_flush + self.config.max_age
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(max_bytes: usize, max_age_secs: u64) -> BatchConfig {
        BatchConfig {
            max_bytes,
            max_age: Duration::from_secs(max_age_secs),
        }
    }

    #[test]
    fn one_byte_threshold_flushes_every_line() {
        let start = Instant::now();
        let mut acc = BatchAccumulator::starting_at(config(1, 60), start);

        let batches: Vec<Batch> = ["a", "b", "c"]
            .into_iter()
            .filter_map(|l| acc.push(l.to_string(), start))
            .collect();

        assert_eq!(batches.len(), 3);
        for (batch, expected) in batches.iter().zip(["a", "b", "c"]) {
            assert_eq!(batch.lines(), [expected.to_string()]);
            assert_eq!(batch.trigger(), FlushTrigger::Size);
        }
        assert!(acc.is_empty());
    }

    #[test]
    fn size_trigger_includes_the_crossing_line() {
        let start = Instant::now();
        let mut acc = BatchAccumulator::starting_at(config(10, 60), start);

        assert!(acc.push("12345".into(), start).is_none());
        assert!(acc.push("1234".into(), start).is_none());
        let batch = acc.push("123".into(), start).expect("threshold crossed");

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.byte_size(), 12);
        assert_eq!(acc.byte_size(), 0);
        assert!(acc.is_empty());
    }

    #[test]
    fn time_trigger_flushes_single_line_once() {
        let start = Instant::now();
        let mut acc = BatchAccumulator::starting_at(config(DEFAULT_MAX_BYTES, 60), start);

        assert!(acc.push("0123456789".into(), start).is_none());
        assert!(acc.poll(start + Duration::from_secs(59)).is_none());

        let batch = acc.poll(start + Duration::from_secs(61)).expect("time flush");
        assert_eq!(batch.lines(), ["0123456789".to_string()]);
        assert_eq!(batch.trigger(), FlushTrigger::Time);

        // Nothing left: no empty batch later on.
        assert!(acc.poll(start + Duration::from_secs(200)).is_none());
    }

    #[test]
    fn empty_accumulator_never_flushes() {
        let start = Instant::now();
        let mut acc = BatchAccumulator::starting_at(config(1, 1), start);
        for secs in [0, 1, 5, 3600] {
            assert!(acc.poll(start + Duration::from_secs(secs)).is_none());
        }
        assert_eq!(acc.last_flush(), start);
    }

    #[test]
    fn flush_resets_the_time_window() {
        let start = Instant::now();
        let mut acc = BatchAccumulator::starting_at(config(DEFAULT_MAX_BYTES, 10), start);

        acc.push("x".into(), start);
        let t1 = start + Duration::from_secs(10);
        assert!(acc.poll(t1).is_some());
        assert_eq!(acc.last_flush(), t1);
        assert_eq!(acc.deadline(), t1 + Duration::from_secs(10));

        acc.push("y".into(), t1 + Duration::from_secs(1));
        assert!(acc.poll(t1 + Duration::from_secs(9)).is_none());
        assert!(acc.poll(t1 + Duration::from_secs(10)).is_some());
    }

    #[test]
    fn size_flush_also_resets_the_time_window() {
        let start = Instant::now();
        let mut acc = BatchAccumulator::starting_at(config(2, 10), start);

        let later = start + Duration::from_secs(7);
        assert!(acc.push("ab".into(), later).is_some());
        assert_eq!(acc.last_flush(), later);

        acc.push("c".into(), later);
        assert!(acc.poll(start + Duration::from_secs(12)).is_none());
    }

    #[test]
    fn stale_window_flushes_first_line_after_idle() {
        let start = Instant::now();
        let mut acc = BatchAccumulator::starting_at(config(DEFAULT_MAX_BYTES, 5), start);

        let batch = acc
            .push("late".into(), start + Duration::from_secs(30))
            .expect("window already expired");
        assert_eq!(batch.trigger(), FlushTrigger::Time);
    }

    #[test]
    fn discard_empties_buffer() {
        let start = Instant::now();
        let mut acc = BatchAccumulator::starting_at(config(100, 60), start);
        acc.push("one".into(), start);
        acc.push("two".into(), start);
        assert_eq!(acc.discard(), 2);
        assert!(acc.is_empty());
        assert_eq!(acc.byte_size(), 0);
    }

    proptest! {
        #[test]
        fn batches_preserve_arrival_order(
            lines in proptest::collection::vec("[a-z]{0,12}", 1..64),
            max_bytes in 1usize..64,
        ) {
            let start = Instant::now();
            let mut acc = BatchAccumulator::starting_at(config(max_bytes, 3600), start);
            let mut flushed: Vec<String> = Vec::new();

            for line in &lines {
                if let Some(batch) = acc.push(line.clone(), start) {
                    prop_assert!(!batch.is_empty());
                    // Only the last line may push the batch over the threshold.
                    let without_last = batch.byte_size() - batch.lines().last().map_or(0, String::len);
                    prop_assert!(without_last < max_bytes);
                    flushed.extend(batch.into_lines());
                }
            }
            if let Some(batch) = acc.poll(start + Duration::from_secs(3600)) {
                flushed.extend(batch.into_lines());
            }

            prop_assert_eq!(flushed, lines);
        }
    }
}
