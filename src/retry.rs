use crate::classify::{classify, Classification};
use crate::error::ServiceError;
use crate::observe::{Observer, TrialEvent};
use crate::service::{DatabaseService, OperationKind, RemoteOperation};
use crate::TRANSIENT_RETRY_COUNT;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Suspension primitive injected into every sleep the harness takes. The
/// production impl is a tokio sleep; tests substitute a recording no-op. This
/// is also what makes sequential and concurrent runs the same state machine.
#[async_trait]
pub trait Suspend: Send + Sync {
    async fn pause(&self, duration: Duration);
}

pub struct TokioSuspend;

#[async_trait]
impl Suspend for TokioSuspend {
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Fixed delay between transient-failure attempts.
    pub backoff: Duration,
    /// Optional safety ceiling. `None` is the faithful default: the scenario
    /// under test is an eventually consistent service, not a broken one.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            backoff: Duration::from_secs(15),
            max_attempts: None,
        }
    }
}

/// Result of one logical operation after internal retrying. Transient
/// failures never appear here.
#[derive(Debug)]
pub enum OperationOutcome {
    Success,
    /// Existence check only: the service reports the database absent.
    NotFound,
    FatalFailure(ServiceError),
}

#[derive(Debug)]
pub struct Execution {
    pub outcome: OperationOutcome,
    pub attempts: u32,
}

/// Wraps every network touch-point with the classify-and-retry loop.
pub struct Remote {
    service: Arc<dyn DatabaseService>,
    policy: RetryPolicy,
    suspend: Arc<dyn Suspend>,
    observer: Arc<dyn Observer>,
    shutdown: Arc<AtomicBool>,
}

impl Remote {
    pub fn new(
        service: Arc<dyn DatabaseService>,
        policy: RetryPolicy,
        suspend: Arc<dyn Suspend>,
        observer: Arc<dyn Observer>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Remote {
            service,
            policy,
            suspend,
            observer,
            shutdown,
        }
    }

    pub fn service(&self) -> &Arc<dyn DatabaseService> {
        &self.service
    }

    pub fn observer(&self) -> &dyn Observer {
        &*self.observer
    }

    pub fn suspend(&self) -> &dyn Suspend {
        &*self.suspend
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run one logical operation to a terminal outcome. Transient failures
    /// are retried in place after a fixed backoff; fatal failures are
    /// returned to the caller and end only that caller's trial.
    pub async fn execute(&self, op: &RemoteOperation<'_>) -> Execution {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let err = match self.service.perform(op).await {
                Ok(()) => {
                    return Execution {
                        outcome: OperationOutcome::Success,
                        attempts,
                    }
                }
                Err(err) => err,
            };
            match classify(&err) {
                Classification::NotFound if op.kind() == OperationKind::CheckExistence => {
                    return Execution {
                        outcome: OperationOutcome::NotFound,
                        attempts,
                    }
                }
                Classification::Transient => {
                    if let Some(cap) = self.policy.max_attempts {
                        if attempts >= cap {
                            return Execution {
                                outcome: OperationOutcome::FatalFailure(
                                    ServiceError::RetriesExhausted { attempts },
                                ),
                                attempts,
                            };
                        }
                    }
                    TRANSIENT_RETRY_COUNT.fetch_add(1, Ordering::SeqCst);
                    self.observer.observe(TrialEvent::Retrying {
                        trial: op.name(),
                        kind: op.kind(),
                        attempt: attempts,
                        code: err.primary_code(),
                    });
                    self.suspend.pause(self.policy.backoff).await;
                    if self.shutdown_requested() {
                        return Execution {
                            outcome: OperationOutcome::FatalFailure(ServiceError::Interrupted),
                            attempts,
                        };
                    }
                }
                Classification::NotFound | Classification::Fatal => {
                    return Execution {
                        outcome: OperationOutcome::FatalFailure(err),
                        attempts,
                    }
                }
            }
        }
    }
}
