use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Sentinel marker value meaning "not currently timing".
const UNSET: i64 = -1;

/// Thread-safe elapsed-time accumulator with start/stop markers, used
/// throughout the executor for per-partition accounting (exec time, idle
/// time, network time, utility time).
///
/// `start`/`stop` take a caller-supplied timestamp (nanoseconds since an
/// arbitrary epoch) rather than reading the clock themselves, so callers can
/// group several measurements under one coordinated snapshot.
#[derive(Debug)]
pub struct ProfileMeasurement {
    label: &'static str,
    total_elapsed_ns: AtomicU64,
    invocations: AtomicU64,
    in_flight_start: AtomicI64,
}

impl ProfileMeasurement {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            total_elapsed_ns: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
            in_flight_start: AtomicI64::new(UNSET),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Marks the start of a sample. Requires "not started"; calling twice
    /// without an intervening `stop` is a logic error in the caller and is
    /// reported via `tracing::warn!` rather than panicking, since a stray
    /// double-start must not take down an executor thread.
    pub fn start(&self, t: i64) {
        let previous = self.in_flight_start.swap(t, Ordering::AcqRel);
        if previous != UNSET {
            tracing::warn!(
                label = self.label,
                previous,
                "ProfileMeasurement::start called while already started"
            );
        }
    }

    /// Marks the end of a sample. Requires "started". A negative duration
    /// (clock regression) is logged and the sample is dropped without
    /// affecting `invocations` or `total_elapsed_ns`.
    pub fn stop(&self, t: i64) {
        let start = self.in_flight_start.swap(UNSET, Ordering::AcqRel);
        if start == UNSET {
            tracing::warn!(label = self.label, "ProfileMeasurement::stop called while not started");
            return;
        }
        self.record(start, t, 1);
    }

    /// Lock-free merge path: safe to call from concurrent producers that
    /// measured a span themselves (e.g. another thread reporting on this
    /// transaction's behalf) without going through `start`/`stop` on this
    /// instance.
    pub fn append_time(&self, start: i64, stop: i64, invocations: u64) {
        self.record(start, stop, invocations);
    }

    fn record(&self, start: i64, stop: i64, invocations: u64) {
        let delta = stop - start;
        if delta < 0 {
            tracing::warn!(
                label = self.label,
                start,
                stop,
                "ProfileMeasurement clock regression, sample dropped"
            );
            return;
        }
        self.total_elapsed_ns.fetch_add(delta as u64, Ordering::Relaxed);
        self.invocations.fetch_add(invocations, Ordering::Relaxed);
        metrics::histogram!("dtxn_profile_elapsed_ns", "label" => self.label).record(delta as f64);
    }

    pub fn total_elapsed_ns(&self) -> u64 {
        self.total_elapsed_ns.load(Ordering::Relaxed)
    }

    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn is_started(&self) -> bool {
        self.in_flight_start.load(Ordering::Acquire) != UNSET
    }

    /// Resets the accumulator. If called while a sample is in flight, the
    /// reset of the counters happens immediately but the in-flight sample
    /// is simply dropped on the next `stop` (its start marker is cleared
    /// here too, so that `stop` sees "not started" and logs rather than
    /// attributing a bogus duration to the new epoch).
    pub fn reset(&self) {
        self.total_elapsed_ns.store(0, Ordering::Relaxed);
        self.invocations.store(0, Ordering::Relaxed);
        self.in_flight_start.store(UNSET, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_stop_accumulates_elapsed_and_invocations() {
        let pm = ProfileMeasurement::new("exec");
        pm.start(100);
        pm.stop(150);
        pm.start(200);
        pm.stop(260);
        assert_eq!(pm.total_elapsed_ns(), 110);
        assert_eq!(pm.invocations(), 2);
    }

    #[test]
    fn clock_regression_is_dropped() {
        let pm = ProfileMeasurement::new("exec");
        pm.start(200);
        pm.stop(100);
        assert_eq!(pm.total_elapsed_ns(), 0);
        assert_eq!(pm.invocations(), 0);
    }

    #[test]
    fn append_time_merges_without_start_stop() {
        let pm = ProfileMeasurement::new("net");
        pm.append_time(0, 50, 1);
        pm.append_time(0, 30, 2);
        assert_eq!(pm.total_elapsed_ns(), 80);
        assert_eq!(pm.invocations(), 3);
    }

    #[test]
    fn reset_clears_counters_and_in_flight_marker() {
        let pm = ProfileMeasurement::new("exec");
        pm.start(10);
        pm.reset();
        assert!(!pm.is_started());
        assert_eq!(pm.invocations(), 0);
    }
}
