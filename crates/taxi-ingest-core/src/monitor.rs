use crate::metrics::{CounterSnapshot, OutcomeCounters};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::info;

/// Records per second between two snapshots.
pub fn throughput(previous: &CounterSnapshot, current: &CounterSnapshot, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    current.settled().saturating_sub(previous.settled()) as f64 / secs
}

pub fn log_snapshot(label: &str, snapshot: &CounterSnapshot, rate: f64) {
    info!(
        "{label}: written={} skipped={} unknown_type={} null_location={} invalid_location={} \
         bad_speed={} bad_fare={} bad_duration={} bad_passenger_count={} bad_distance={} \
         unclassified={} write_failures={} write_retries={} bits_set={} lines_fetched={} \
         fetch_failures={} rate={:.1}/s",
        snapshot.written,
        snapshot.skipped,
        snapshot.unknown_type,
        snapshot.null_location,
        snapshot.invalid_location,
        snapshot.out_of_range_speed,
        snapshot.out_of_range_fare,
        snapshot.out_of_range_duration,
        snapshot.out_of_range_passenger_count,
        snapshot.out_of_range_distance,
        snapshot.unclassified,
        snapshot.write_failures,
        snapshot.write_retries,
        snapshot.bits_set,
        snapshot.lines_fetched,
        snapshot.fetch_failures,
        rate,
    );
}

pub(crate) fn spawn_monitor_task(
    counters: Arc<OutcomeCounters>,
    interval_seconds: f64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs_f64(interval_seconds.max(1.0));
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        let mut previous = counters.snapshot();
        let mut last_tick = Instant::now();
        loop {
            ticker.tick().await;
            let current = counters.snapshot();
            let rate = throughput(&previous, &current, last_tick.elapsed());
            log_snapshot("progress", &current, rate);
            previous = current;
            last_tick = Instant::now();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_counts_settled_records() {
        let previous = CounterSnapshot {
            written: 10,
            skipped: 5,
            ..CounterSnapshot::default()
        };
        let current = CounterSnapshot {
            written: 30,
            skipped: 10,
            write_failures: 5,
            bits_set: 1_000,
            ..CounterSnapshot::default()
        };
        assert_eq!(throughput(&previous, &current, Duration::from_secs(2)), 15.0);
        assert_eq!(throughput(&previous, &current, Duration::ZERO), 0.0);
    }
}
