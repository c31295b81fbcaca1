use crate::lifecycle::{Phase, TrialResult};
use crate::service::OperationKind;
use slog::{debug, info, warn, Logger};

/// Structured trial events. The core never formats output itself; it hands
/// these to an injected observer so tests can record them and the binary can
/// render the console lines.
#[derive(Debug)]
pub enum TrialEvent<'a> {
    PhaseEntered {
        trial: &'a str,
        phase: Phase,
    },
    Retrying {
        trial: &'a str,
        kind: OperationKind,
        attempt: u32,
        code: Option<i32>,
    },
    /// The database was created but the service still reports it absent.
    StillInvisible {
        trial: &'a str,
        waits: u32,
    },
    Finished {
        trial: &'a str,
        result: &'a TrialResult,
    },
}

pub trait Observer: Send + Sync {
    fn observe(&self, event: TrialEvent<'_>);
}

/// Renders events as the familiar `Database <name> ...` console lines.
pub struct LogObserver {
    log: Logger,
}

impl LogObserver {
    pub fn new(log: Logger) -> Self {
        LogObserver { log }
    }
}

impl Observer for LogObserver {
    fn observe(&self, event: TrialEvent<'_>) {
        match event {
            TrialEvent::PhaseEntered { trial, phase } => match phase {
                Phase::Deleting => {
                    info!(self.log, "Database {} already exists, dropping...", trial)
                }
                Phase::Creating => {
                    info!(self.log, "Database {} doesn't exist, creating...", trial)
                }
                Phase::DeletingAfterCreate => {
                    info!(
                        self.log,
                        "Database {} created successfully, dropping...", trial
                    )
                }
                _ => debug!(self.log, "Database {} entering {}", trial, phase),
            },
            TrialEvent::Retrying {
                trial,
                kind,
                attempt,
                code,
            } => match code {
                Some(code) => info!(
                    self.log,
                    "Retrying {} {} on error code {}", trial, kind, code;
                    "attempt" => attempt
                ),
                None => info!(
                    self.log,
                    "Retrying {} {} on timeout", trial, kind;
                    "attempt" => attempt
                ),
            },
            TrialEvent::StillInvisible { trial, waits } => {
                info!(
                    self.log,
                    "Database {} still doesn't exist, waiting", trial;
                    "waits" => waits
                )
            }
            TrialEvent::Finished { trial, result } => match result {
                TrialResult::Completed => {
                    info!(self.log, "Database {} lifecycle completed", trial)
                }
                TrialResult::Abandoned(reason) => {
                    warn!(self.log, "Database {} abandoned: {}", trial, reason)
                }
            },
        }
    }
}
