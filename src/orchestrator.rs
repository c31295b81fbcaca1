use crate::lifecycle::{LifecycleRecord, Phase, Trial, TrialResult};
use crate::retry::Remote;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One tokio task per trial; the mode the race is reproduced under.
    Concurrent,
    /// One trial at a time, the historical variant of the reproduction.
    Sequential,
}

/// Fans out independent trials over disjoint database names and waits for
/// every one of them to reach a terminal state. No global timeout: a stuck
/// trial stalling the run is part of the scenario being reproduced.
pub struct Orchestrator {
    pub remote: Arc<Remote>,
    pub prefix: String,
    pub poll_interval: Duration,
    pub max_visibility_waits: Option<u32>,
    pub mode: ExecutionMode,
}

impl Orchestrator {
    pub async fn run_all(&self, count: u32) -> Vec<LifecycleRecord> {
        match self.mode {
            ExecutionMode::Sequential => {
                let mut records = Vec::with_capacity(count as usize);
                for index in 0..count {
                    if self.remote.shutdown_requested() {
                        break;
                    }
                    records.push(self.trial(index).run().await);
                }
                records
            }
            ExecutionMode::Concurrent => {
                let handles: Vec<_> = (0..count)
                    .map(|index| tokio::spawn(self.trial(index).run()))
                    .collect();
                let mut records = Vec::with_capacity(count as usize);
                for (index, joined) in join_all(handles).await.into_iter().enumerate() {
                    match joined {
                        Ok(record) => records.push(record),
                        Err(e) => {
                            // A panicked trial still counts as finished.
                            let mut record =
                                LifecycleRecord::new(format!("{}{}", self.prefix, index));
                            record.phase = Phase::Abandoned;
                            record.result =
                                Some(TrialResult::Abandoned(format!("trial panicked: {}", e)));
                            records.push(record);
                        }
                    }
                }
                records
            }
        }
    }

    fn trial(&self, index: u32) -> Trial {
        Trial::new(
            format!("{}{}", self.prefix, index),
            self.remote.clone(),
            self.poll_interval,
            self.max_visibility_waits,
        )
    }
}
