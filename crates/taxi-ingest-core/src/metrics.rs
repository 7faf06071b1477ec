use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Named counters a record outcome can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Written,
    Skipped,
    UnknownType,
    NullLocation,
    InvalidLocation,
    OutOfRangeSpeed,
    OutOfRangeFare,
    OutOfRangeDuration,
    OutOfRangePassengerCount,
    OutOfRangeDistance,
    Unclassified,
    WriteFailure,
}

#[derive(Debug, Default)]
pub struct OutcomeCounters {
    written: AtomicU64,
    skipped: AtomicU64,
    unknown_type: AtomicU64,
    null_location: AtomicU64,
    invalid_location: AtomicU64,
    out_of_range_speed: AtomicU64,
    out_of_range_fare: AtomicU64,
    out_of_range_duration: AtomicU64,
    out_of_range_passenger_count: AtomicU64,
    out_of_range_distance: AtomicU64,
    unclassified: AtomicU64,
    write_failures: AtomicU64,
    pub(crate) write_retries: AtomicU64,
    pub(crate) bits_set: AtomicU64,
    pub(crate) lines_fetched: AtomicU64,
    pub(crate) fetch_failures: AtomicU64,
}

impl OutcomeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, outcome: Outcome) -> &AtomicU64 {
        match outcome {
            Outcome::Written => &self.written,
            Outcome::Skipped => &self.skipped,
            Outcome::UnknownType => &self.unknown_type,
            Outcome::NullLocation => &self.null_location,
            Outcome::InvalidLocation => &self.invalid_location,
            Outcome::OutOfRangeSpeed => &self.out_of_range_speed,
            Outcome::OutOfRangeFare => &self.out_of_range_fare,
            Outcome::OutOfRangeDuration => &self.out_of_range_duration,
            Outcome::OutOfRangePassengerCount => &self.out_of_range_passenger_count,
            Outcome::OutOfRangeDistance => &self.out_of_range_distance,
            Outcome::Unclassified => &self.unclassified,
            Outcome::WriteFailure => &self.write_failures,
        }
    }

    pub fn incr(&self, outcome: Outcome) {
        self.counter(outcome).fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, outcome: Outcome, count: u64) {
        if count > 0 {
            self.counter(outcome).fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn get(&self, outcome: Outcome) -> u64 {
        self.counter(outcome).load(Ordering::Relaxed)
    }

    pub fn add_write_retries(&self, retries: u64) {
        if retries > 0 {
            self.write_retries.fetch_add(retries, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy; individual loads are not synchronized with each other.
    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CounterSnapshot {
            written: load(&self.written),
            skipped: load(&self.skipped),
            unknown_type: load(&self.unknown_type),
            null_location: load(&self.null_location),
            invalid_location: load(&self.invalid_location),
            out_of_range_speed: load(&self.out_of_range_speed),
            out_of_range_fare: load(&self.out_of_range_fare),
            out_of_range_duration: load(&self.out_of_range_duration),
            out_of_range_passenger_count: load(&self.out_of_range_passenger_count),
            out_of_range_distance: load(&self.out_of_range_distance),
            unclassified: load(&self.unclassified),
            write_failures: load(&self.write_failures),
            write_retries: load(&self.write_retries),
            bits_set: load(&self.bits_set),
            lines_fetched: load(&self.lines_fetched),
            fetch_failures: load(&self.fetch_failures),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub written: u64,
    pub skipped: u64,
    pub unknown_type: u64,
    pub null_location: u64,
    pub invalid_location: u64,
    pub out_of_range_speed: u64,
    pub out_of_range_fare: u64,
    pub out_of_range_duration: u64,
    pub out_of_range_passenger_count: u64,
    pub out_of_range_distance: u64,
    pub unclassified: u64,
    pub write_failures: u64,
    pub write_retries: u64,
    pub bits_set: u64,
    pub lines_fetched: u64,
    pub fetch_failures: u64,
}

impl CounterSnapshot {
    /// Records that reached a terminal state.
    pub fn settled(&self) -> u64 {
        self.written + self.skipped + self.write_failures
    }
}

/// Issues column ids shared by every output of one record.
#[derive(Debug)]
pub struct SequenceAllocator {
    next: AtomicU64,
}

impl SequenceAllocator {
    pub fn new(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Next id that will be issued.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new(0)
    }
}
