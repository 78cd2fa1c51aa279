//! Traffic generator driving a server with station readings.
//!
//! Keys are `station.<n>` for `n` in `0..=MAX_STATION_ID`, values are random
//! temperatures between -20 and 44.

use std::ops::AddAssign;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use log::{debug, warn};
use rand::Rng;

use crate::client::KvsClient;
use crate::protocol::Request;
use crate::{KvError, Result};

/// Highest station id a sweep touches.
pub const MAX_STATION_ID: usize = 128;

/// Which requests a load run issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Sweep GETs over every station.
    Get,
    /// Sweep PUTs over every station.
    Put,
    /// Half the threads PUT while the other half GET.
    Both,
}

/// Outcome counts of a load run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Requests sent.
    pub sent: u64,
    /// Requests answered with `PUT OK` or `GET OK`.
    pub ok: u64,
    /// Requests answered with an error line.
    pub rejected: u64,
    /// Requests that failed in transport.
    pub errors: u64,
}

impl AddAssign for LoadSummary {
    fn add_assign(&mut self, other: Self) {
        self.sent += other.sent;
        self.ok += other.ok;
        self.rejected += other.rejected;
        self.errors += other.errors;
    }
}

/// Issues sweeps of requests against one server.
pub struct LoadGenerator {
    client: KvsClient,
    iterations: usize,
    threads: usize,
    max_station: usize,
}

impl LoadGenerator {
    /// Creates a generator doing one iteration with ten threads in `Both` mode.
    pub fn new(client: KvsClient) -> Self {
        Self {
            client,
            iterations: 1,
            threads: 10,
            max_station: MAX_STATION_ID,
        }
    }

    /// Number of sweeps to run.
    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Threads used by [`LoadMode::Both`]; at least two.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Highest station id included in a sweep.
    pub fn max_station(mut self, max_station: usize) -> Self {
        self.max_station = max_station;
        self
    }

    /// Runs every iteration in `mode` and returns the combined counts.
    pub fn run(&self, mode: LoadMode) -> Result<LoadSummary> {
        if mode == LoadMode::Both && self.threads < 2 {
            return Err(KvError::Config(format!(
                "both mode needs at least 2 threads, got {}",
                self.threads
            )));
        }

        let mut summary = LoadSummary::default();
        for iteration in 0..self.iterations {
            debug!("Starting iteration {} in {:?} mode", iteration + 1, mode);
            summary += match mode {
                LoadMode::Get | LoadMode::Put => self.sweep(mode),
                LoadMode::Both => self.mixed()?,
            };
        }
        Ok(summary)
    }

    fn sweep(&self, mode: LoadMode) -> LoadSummary {
        let mut summary = LoadSummary::default();
        for station in 0..=self.max_station {
            summary += self.talk(&self.request(mode, station));
        }
        summary
    }

    /// Splits the threads between a PUT sweep and a GET sweep sharing one
    /// station counter per operation.
    fn mixed(&self) -> Result<LoadSummary> {
        let next_put = AtomicUsize::new(0);
        let next_get = AtomicUsize::new(0);
        let writers = self.threads / 2;

        let outcomes = crossbeam::scope(|scope| {
            let handles: Vec<_> = (0..self.threads)
                .map(|t| {
                    let (mode, counter) = if t < writers {
                        (LoadMode::Put, &next_put)
                    } else {
                        (LoadMode::Get, &next_get)
                    };
                    scope.spawn(move |_| {
                        let mut summary = LoadSummary::default();
                        loop {
                            let station = counter.fetch_add(1, Ordering::Relaxed);
                            if station > self.max_station {
                                break;
                            }
                            summary += self.talk(&self.request(mode, station));
                        }
                        summary
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join())
                .collect::<Vec<_>>()
        })
        .map_err(|_| KvError::StringError("load thread panicked".to_owned()))?;

        combine(outcomes)
    }

    fn request(&self, mode: LoadMode, station: usize) -> Request {
        let key = format!("station.{station}");
        match mode {
            LoadMode::Put => {
                let value = rand::thread_rng().gen_range(-20..=44);
                Request::put(&key, &value.to_string(), &self.client.limits())
            }
            LoadMode::Get | LoadMode::Both => Request::get(&key, &self.client.limits()),
        }
    }

    fn talk(&self, request: &Request) -> LoadSummary {
        let mut summary = LoadSummary {
            sent: 1,
            ..Default::default()
        };
        match self.client.send(request) {
            Ok(response) => {
                debug!("{request} -> {response}");
                if response.is_ok() {
                    summary.ok = 1;
                } else {
                    summary.rejected = 1;
                }
            }
            Err(e) => {
                warn!("{request} failed: {e}");
                summary.errors = 1;
            }
        }
        summary
    }
}

/// Adds up per-thread summaries. A thread that panicked fails the whole run.
fn combine(outcomes: Vec<thread::Result<LoadSummary>>) -> Result<LoadSummary> {
    let mut total = LoadSummary::default();
    for outcome in outcomes {
        total += outcome.map_err(|_| KvError::StringError("load thread panicked".to_owned()))?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_adds_up_thread_summaries() {
        let one = LoadSummary {
            sent: 3,
            ok: 2,
            rejected: 1,
            errors: 0,
        };
        let total = combine(vec![Ok(one), Ok(one)]).unwrap();
        assert_eq!(total.sent, 6);
        assert_eq!(total.ok, 4);
        assert_eq!(total.rejected, 2);
    }

    #[test]
    fn panicked_thread_fails_the_run() {
        let panic: Box<dyn std::any::Any + Send> = Box::new("boom");
        let outcomes = vec![Ok(LoadSummary::default()), Err(panic)];
        assert!(matches!(combine(outcomes), Err(KvError::StringError(_))));
    }
}
