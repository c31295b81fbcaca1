use crate::error::ServiceError;
use crate::observe::TrialEvent;
use crate::retry::{OperationOutcome, Remote};
use crate::service::RemoteOperation;
use crate::VISIBILITY_WAIT_COUNT;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    CheckingExistence,
    /// The database already existed; dropping it ends the trial.
    Deleting,
    Creating,
    /// Created and acknowledged, waiting for the service to admit it exists.
    PollingVisibility,
    DeletingAfterCreate,
    Done,
    Abandoned,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Init => "init",
            Phase::CheckingExistence => "checking existence",
            Phase::Deleting => "dropping existing",
            Phase::Creating => "creating",
            Phase::PollingVisibility => "polling visibility",
            Phase::DeletingAfterCreate => "dropping after create",
            Phase::Done => "done",
            Phase::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrialResult {
    Completed,
    Abandoned(String),
}

/// Per-trial state, owned by exactly one trial and discarded after the run
/// summary is printed.
#[derive(Debug)]
pub struct LifecycleRecord {
    pub name: String,
    pub phase: Phase,
    pub check_attempts: u32,
    pub create_attempts: u32,
    pub delete_attempts: u32,
    pub visibility_waits: u32,
    pub result: Option<TrialResult>,
}

impl LifecycleRecord {
    pub fn new(name: String) -> Self {
        LifecycleRecord {
            name,
            phase: Phase::Init,
            check_attempts: 0,
            create_attempts: 0,
            delete_attempts: 0,
            visibility_waits: 0,
            result: None,
        }
    }
}

/// One end-to-end lifecycle for a single uniquely named database:
/// check → create-or-drop → poll-until-visible → drop.
pub struct Trial {
    name: String,
    remote: Arc<Remote>,
    poll_interval: Duration,
    /// Optional safety ceiling on visibility waits; `None` keeps the faithful
    /// unbounded loop that measures how long eventual visibility can take.
    max_visibility_waits: Option<u32>,
}

impl Trial {
    pub fn new(
        name: String,
        remote: Arc<Remote>,
        poll_interval: Duration,
        max_visibility_waits: Option<u32>,
    ) -> Self {
        Trial {
            name,
            remote,
            poll_interval,
            max_visibility_waits,
        }
    }

    pub async fn run(self) -> LifecycleRecord {
        let mut record = LifecycleRecord::new(self.name.clone());
        self.enter(&mut record, Phase::CheckingExistence);
        let check = self
            .remote
            .execute(&RemoteOperation::CheckExistence { name: &self.name })
            .await;
        record.check_attempts += check.attempts;
        match check.outcome {
            OperationOutcome::Success => {
                self.enter(&mut record, Phase::Deleting);
                match self.delete(&mut record).await {
                    Ok(()) => self.complete(record),
                    Err(cause) => self.abandon(record, cause),
                }
            }
            OperationOutcome::NotFound => self.create_and_poll(record).await,
            OperationOutcome::FatalFailure(cause) => self.abandon(record, cause),
        }
    }

    async fn create_and_poll(&self, mut record: LifecycleRecord) -> LifecycleRecord {
        self.enter(&mut record, Phase::Creating);
        let create = self
            .remote
            .execute(&RemoteOperation::Create { name: &self.name })
            .await;
        record.create_attempts += create.attempts;
        if let OperationOutcome::FatalFailure(cause) = create.outcome {
            // Nothing was created, so there is nothing to poll for.
            return self.abandon(record, cause);
        }

        // A pooled connection can keep serving the cached "not found" it saw
        // before the create; drop that state before polling.
        self.remote.service().invalidate(&self.name).await;

        self.enter(&mut record, Phase::PollingVisibility);
        loop {
            let check = self
                .remote
                .execute(&RemoteOperation::CheckExistence { name: &self.name })
                .await;
            record.check_attempts += check.attempts;
            match check.outcome {
                OperationOutcome::Success => {
                    self.enter(&mut record, Phase::DeletingAfterCreate);
                    return match self.delete(&mut record).await {
                        Ok(()) => self.complete(record),
                        Err(cause) => self.abandon(record, cause),
                    };
                }
                OperationOutcome::NotFound => {
                    record.visibility_waits += 1;
                    VISIBILITY_WAIT_COUNT.fetch_add(1, Ordering::SeqCst);
                    self.remote.observer().observe(TrialEvent::StillInvisible {
                        trial: &self.name,
                        waits: record.visibility_waits,
                    });
                    if let Some(cap) = self.max_visibility_waits {
                        if record.visibility_waits >= cap {
                            let attempts = record.visibility_waits;
                            return self.abandon(
                                record,
                                ServiceError::RetriesExhausted { attempts },
                            );
                        }
                    }
                    if self.remote.shutdown_requested() {
                        return self.abandon(record, ServiceError::Interrupted);
                    }
                    self.remote.suspend().pause(self.poll_interval).await;
                }
                OperationOutcome::FatalFailure(cause) => return self.abandon(record, cause),
            }
        }
    }

    async fn delete(&self, record: &mut LifecycleRecord) -> crate::Result<()> {
        let exec = self
            .remote
            .execute(&RemoteOperation::Delete {
                name: &self.name,
                force_single_user: true,
            })
            .await;
        record.delete_attempts += exec.attempts;
        match exec.outcome {
            OperationOutcome::FatalFailure(cause) => Err(cause),
            _ => Ok(()),
        }
    }

    fn enter(&self, record: &mut LifecycleRecord, phase: Phase) {
        record.phase = phase;
        self.remote.observer().observe(TrialEvent::PhaseEntered {
            trial: &self.name,
            phase,
        });
    }

    fn complete(&self, mut record: LifecycleRecord) -> LifecycleRecord {
        record.phase = Phase::Done;
        record.result = Some(TrialResult::Completed);
        self.finish(&record);
        record
    }

    fn abandon(&self, mut record: LifecycleRecord, cause: ServiceError) -> LifecycleRecord {
        record.phase = Phase::Abandoned;
        record.result = Some(TrialResult::Abandoned(cause.to_string()));
        self.finish(&record);
        record
    }

    fn finish(&self, record: &LifecycleRecord) {
        if let Some(result) = &record.result {
            self.remote.observer().observe(TrialEvent::Finished {
                trial: &record.name,
                result,
            });
        }
    }
}
