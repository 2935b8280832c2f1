//! # Job Runner
//!
//! An in-process [`JobService`] on the tokio runtime. Each scheduled job
//! becomes a task that moves its state to RUNNING, runs the synchronous
//! engine work on the blocking pool, and records the final state.
//!
//! Job state lives in memory only and is lost when the process exits. Only
//! the most recent finished jobs are remembered; older terminal states are
//! forgotten and their handles become unknown.

use corvid_core::{
    CorvidError, EntityManager, JobHandle, JobParameters, JobService, JobState, run_job,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;

/// Terminal job states kept by default.
pub const DEFAULT_FINISHED_JOBS: usize = 256;

#[derive(Debug)]
struct JobTable {
    states: BTreeMap<JobHandle, JobState>,
    /// Terminal jobs, oldest first.
    finished: VecDeque<JobHandle>,
    retain: usize,
}

impl JobTable {
    fn record(&mut self, handle: JobHandle, state: JobState) {
        let terminal = state.is_terminal();
        self.states.insert(handle, state);
        if !terminal {
            return;
        }
        self.finished.push_back(handle);
        while self.finished.len() > self.retain {
            if let Some(oldest) = self.finished.pop_front() {
                self.states.remove(&oldest);
                tracing::debug!(job = %oldest, "finished job forgotten");
            }
        }
    }
}

type StateTable = Arc<RwLock<JobTable>>;

fn set_state(states: &StateTable, handle: JobHandle, state: JobState) {
    match states.write() {
        Ok(mut table) => table.record(handle, state),
        Err(_) => tracing::error!(job = %handle, "job table poisoned, state update lost"),
    }
}

/// Runs export and import jobs as tokio tasks.
#[derive(Debug, Clone)]
pub struct TokioJobService {
    manager: EntityManager,
    runtime: Handle,
    states: StateTable,
}

impl TokioJobService {
    /// Create a service that spawns onto `runtime`.
    #[must_use]
    pub fn new(manager: EntityManager, runtime: Handle) -> Self {
        Self::with_retention(manager, runtime, DEFAULT_FINISHED_JOBS)
    }

    /// Like [`TokioJobService::new`], remembering at most `retain` finished
    /// jobs (at least one).
    #[must_use]
    pub fn with_retention(manager: EntityManager, runtime: Handle, retain: usize) -> Self {
        let table = JobTable {
            states: BTreeMap::new(),
            finished: VecDeque::new(),
            retain: retain.max(1),
        };
        Self {
            manager,
            runtime,
            states: Arc::new(RwLock::new(table)),
        }
    }

    /// Poll until the job reaches a terminal state.
    pub async fn wait(&self, handle: &JobHandle, poll: Duration) -> Result<JobState, CorvidError> {
        loop {
            let state = self.get_state(handle)?;
            if state.is_terminal() {
                return Ok(state);
            }
            tokio::time::sleep(poll).await;
        }
    }
}

impl JobService for TokioJobService {
    fn schedule(&self, parameters: JobParameters) -> Result<JobHandle, CorvidError> {
        parameters.context().validate()?;
        let handle = JobHandle::generate();
        set_state(&self.states, handle, JobState::Scheduled);

        let manager = self.manager.clone();
        let states = Arc::clone(&self.states);
        let kind = parameters.kind();
        self.runtime.spawn(async move {
            set_state(&states, handle, JobState::Running);
            tracing::info!(job = %handle, kind, "job started");

            let state = match tokio::task::spawn_blocking(move || run_job(&manager, &parameters)).await
            {
                Ok(state) => state,
                Err(e) => JobState::Failed {
                    reason: format!("job task aborted: {}", e),
                },
            };
            tracing::info!(job = %handle, kind, state = ?state, "job ended");
            set_state(&states, handle, state);
        });

        Ok(handle)
    }

    fn get_state(&self, handle: &JobHandle) -> Result<JobState, CorvidError> {
        let table = self
            .states
            .read()
            .map_err(|_| CorvidError::IoError("job table poisoned".to_string()))?;
        table
            .states
            .get(handle)
            .cloned()
            .ok_or_else(|| CorvidError::Validation(format!("unknown job {}", handle)))
    }
}
