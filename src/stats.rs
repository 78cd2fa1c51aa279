use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Latency totals accumulated by the workers.
///
/// Both timings of a request and the completion count are committed together
/// under one lock.
#[derive(Debug, Default)]
pub struct ServerStats {
    totals: Mutex<StatsSnapshot>,
}

impl ServerStats {
    /// Creates empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one completed request.
    pub fn record(&self, waiting: Duration, service: Duration) {
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.total_waiting += waiting;
        totals.total_service += service;
        totals.completed += 1;
    }

    /// Copies out the current totals.
    pub fn snapshot(&self) -> StatsSnapshot {
        *self.totals.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Sum of time spent queued, from accept to dequeue.
    pub total_waiting: Duration,
    /// Sum of time spent serving, from dequeue to response sent.
    pub total_service: Duration,
    /// Number of requests that received a response.
    pub completed: u64,
}

impl StatsSnapshot {
    /// Mean waiting time in microseconds, or `None` with no completed requests.
    pub fn average_waiting_us(&self) -> Option<f64> {
        average_us(self.total_waiting, self.completed)
    }

    /// Mean service time in microseconds, or `None` with no completed requests.
    pub fn average_service_us(&self) -> Option<f64> {
        average_us(self.total_service, self.completed)
    }
}

fn average_us(total: Duration, count: u64) -> Option<f64> {
    if count == 0 {
        None
    } else {
        Some(total.as_secs_f64() * 1_000_000.0 / count as f64)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "completed-requests: {}", self.completed)?;
        match (self.average_waiting_us(), self.average_service_us()) {
            (Some(waiting), Some(service)) => {
                writeln!(f, "avg-waiting-time: {waiting:.3} usecs")?;
                write!(f, "avg-service-time: {service:.3} usecs")
            }
            _ => write!(f, "avg-waiting-time: no data\navg-service-time: no data"),
        }
    }
}
