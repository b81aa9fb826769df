//! Bounded concurrent dispatch of batch fetches.

use std::fmt::{Debug, Formatter};
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{Batch, MeasurementQuery};
use crate::error::{RequestError, RequestErrorKind};
use crate::transport::{BatchFetcher, FetchOutcome};

/// Emitted once per finished batch, in completion order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub completed: usize,
    pub total: usize,
    pub batch: Batch,
    pub succeeded: bool,
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Where batch completion events go.
#[derive(Clone, Default)]
pub enum Progress {
    #[default]
    Disabled,
    /// `info!` event per finished batch.
    Log,
    Callback(ProgressCallback),
}

impl Progress {
    pub fn enabled(flag: bool) -> Self {
        if flag {
            Self::Log
        } else {
            Self::Disabled
        }
    }

    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(callback))
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    fn report(&self, event: &ProgressEvent) {
        match self {
            Self::Disabled => {}
            Self::Log => info!(
                completed = event.completed,
                total = event.total,
                batch = event.batch.index,
                range = %event.batch.range,
                succeeded = event.succeeded,
                "batch finished"
            ),
            Self::Callback(callback) => callback(event),
        }
    }
}

impl Debug for Progress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => f.write_str("Disabled"),
            Self::Log => f.write_str("Log"),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Dispatches batches to a [`BatchFetcher`] with bounded concurrency.
///
/// Two limits apply. Each [`run`](Self::run) keeps at most its own
/// `concurrency_limit` tasks alive, and every fetch also holds a permit from
/// the scheduler's semaphore, which caps all runs sharing this scheduler.
pub struct BatchScheduler {
    fetcher: Arc<dyn BatchFetcher>,
    permits: Arc<Semaphore>,
    max_concurrency: NonZeroUsize,
}

impl BatchScheduler {
    pub fn new(fetcher: Arc<dyn BatchFetcher>, max_concurrency: NonZeroUsize) -> Self {
        Self {
            fetcher,
            permits: Arc::new(Semaphore::new(max_concurrency.get())),
            max_concurrency,
        }
    }

    pub fn max_concurrency(&self) -> NonZeroUsize {
        self.max_concurrency
    }

    /// Fetches every batch once and returns the outcomes in input order.
    ///
    /// Once `deadline` passes nothing new is dispatched, in-flight fetches are
    /// abandoned, and every unfinished batch becomes a `Cancelled` failure.
    /// An `Authentication` failure stops the run the same way: the credential
    /// is unusable, so no other batch can succeed.
    pub async fn run(
        &self,
        batches: Vec<Batch>,
        query: Arc<MeasurementQuery>,
        concurrency_limit: NonZeroUsize,
        deadline: Option<Instant>,
        progress: &Progress,
    ) -> Vec<FetchOutcome> {
        let total = batches.len();
        let mut collector = Collector {
            slots: (0..total).map(|_| None).collect(),
            completed: 0,
            total,
            progress,
        };
        let mut tasks = JoinSet::new();
        let mut pending = batches.iter().copied().enumerate();
        let mut stop = None;

        debug!(
            batches = total,
            concurrency = concurrency_limit.get(),
            "dispatching batches"
        );

        loop {
            while tasks.len() < concurrency_limit.get() {
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    stop = Some(Stop::Deadline);
                    break;
                }
                let Some((slot, batch)) = pending.next() else {
                    break;
                };
                let fetcher = Arc::clone(&self.fetcher);
                let permits = Arc::clone(&self.permits);
                let query = Arc::clone(&query);
                tasks.spawn(async move {
                    let outcome = match permits.acquire_owned().await {
                        Ok(_permit) => fetcher.fetch(batch, &query).await,
                        Err(_) => FetchOutcome::Failure {
                            batch,
                            error: RequestError::cancelled("scheduler shut down"),
                        },
                    };
                    (slot, outcome)
                });
            }

            if stop.is_some() || tasks.is_empty() {
                break;
            }

            let joined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, tasks.join_next()).await
                {
                    Ok(joined) => joined,
                    Err(_) => {
                        stop = Some(Stop::Deadline);
                        break;
                    }
                },
                None => tasks.join_next().await,
            };

            match joined {
                Some(joined) => stop = collector.record(joined),
                None => break,
            }
            if stop.is_some() {
                break;
            }
        }

        if let Some(reason) = stop {
            while let Some(joined) = tasks.try_join_next() {
                collector.record(joined);
            }
            let abandoned = tasks.len() + pending.len();
            match reason {
                Stop::Deadline => {
                    warn!(abandoned, "deadline passed; unfinished batches are cancelled")
                }
                Stop::Authentication => {
                    warn!(abandoned, "credential rejected; remaining batches are cancelled")
                }
            }
            tasks.abort_all();
        }

        collector
            .slots
            .into_iter()
            .zip(batches)
            .map(|(slot, batch)| {
                slot.unwrap_or_else(|| FetchOutcome::Failure {
                    batch,
                    error: match stop {
                        Some(Stop::Deadline) => {
                            RequestError::cancelled("deadline passed before the batch finished")
                        }
                        Some(Stop::Authentication) => {
                            RequestError::cancelled("run stopped after the credential was rejected")
                        }
                        None => RequestError::permanent("fetch task aborted"),
                    },
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Deadline,
    Authentication,
}

/// Outcome slots of one run; the only place progress is reported from.
struct Collector<'a> {
    slots: Vec<Option<FetchOutcome>>,
    completed: usize,
    total: usize,
    progress: &'a Progress,
}

impl Collector<'_> {
    fn record(
        &mut self,
        joined: Result<(usize, FetchOutcome), tokio::task::JoinError>,
    ) -> Option<Stop> {
        let (slot, outcome) = match joined {
            Ok(finished) => finished,
            Err(join_error) => {
                warn!(error = %join_error, "batch task ended without an outcome");
                return None;
            }
        };

        self.completed += 1;
        self.progress.report(&ProgressEvent {
            completed: self.completed,
            total: self.total,
            batch: outcome.batch(),
            succeeded: outcome.is_success(),
        });
        let stop = match &outcome {
            FetchOutcome::Failure { error, .. }
                if error.kind() == RequestErrorKind::Authentication =>
            {
                Some(Stop::Authentication)
            }
            _ => None,
        };
        self.slots[slot] = Some(outcome);
        stop
    }
}

impl Debug for BatchScheduler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("max_concurrency", &self.max_concurrency)
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}
