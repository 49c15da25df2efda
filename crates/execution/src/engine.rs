//! The job driver.
//!
//! One [`JobRunner`] backs one pool slot. Per job it runs:
//!
//! ```text
//!            dispatch (bounded)             reports (unbounded)
//! aggregator ------------------> N workers -------------------> aggregator
//!     ^                                                              |
//!     +---- failure policy, barrier, next_eligible <-----------------+
//! ```
//!
//! The aggregator is the only writer of the task list. Workers receive an
//! owned copy of a task plus a [`Scope`] snapshot and hand the task back.

use std::sync::Arc;
use std::time::Instant;
use jobworker_core::{validate_graph, Job, JobId, JobStatus, ServiceId, SystemParams, Task, TaskStatus};
use jobworker_storage::Storage;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{ExecutionError, Result};
use crate::pool::ActiveJobs;
use crate::queue::JobQueue;
use crate::resolver::Scope;
use crate::scheduler::{self, Completion};
use crate::strategy::StrategySet;
use crate::token::{LoginTokenIssuer, TokenIssuer};
use crate::worker::TaskWorker;

/// What a worker should do with a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    /// Run the task's action
    Execute,
    /// Run the task's rollback action
    Rollback,
}

/// A unit of work on the dispatch channel.
#[derive(Debug)]
pub struct Dispatch {
    /// Requested run
    pub kind: DispatchKind,
    /// Owned copy of the task
    pub task: Task,
    /// Values visible to token resolution
    pub scope: Arc<Scope>,
    /// Authorization token for the job
    pub token: Arc<str>,
}

/// A finished unit of work on the report channel.
#[derive(Debug)]
pub enum Report {
    /// The action ran
    Executed(Task),
    /// The rollback ran
    RolledBack(Task),
}

/// Outcome of one job run.
#[derive(Debug, Clone)]
pub struct JobReport {
    /// Job id
    pub job_id: JobId,
    /// Final job status
    pub status: JobStatus,
    /// Final state of every task, in load order
    pub tasks: Vec<Task>,
    /// Terminal task events counted by the barrier
    pub events: usize,
    /// Task ids in the order they were dispatched for execution, retries included
    pub dispatch_order: Vec<String>,
    /// True if the run ended because no task could become eligible
    pub stalled: bool,
    /// Wall-clock run time in seconds
    pub elapsed_secs: f64,
}

/// Channels and worker handles of a running slot.
struct Slot {
    dispatch: mpsc::Sender<Dispatch>,
    reports: mpsc::UnboundedReceiver<Report>,
    workers: Vec<JoinHandle<()>>,
}

impl Slot {
    async fn shutdown(self) {
        drop(self.dispatch);
        for handle in self.workers {
            if let Err(e) = handle.await {
                warn!("Task worker ended abnormally: {}", e);
            }
        }
    }
}

/// Aggregator state for one job.
struct Run {
    job: Job,
    tasks: Vec<Task>,
    token: Arc<str>,
    remaining: usize,
    in_flight: usize,
    events: usize,
    dispatch_order: Vec<String>,
}

impl Run {
    fn index_of(&self, task: &Task) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == task.id)
    }

    fn mark_failed(&mut self) {
        self.job.status = JobStatus::Fail;
    }
}

/// Drives jobs to completion with a fixed set of task workers.
#[derive(Clone)]
pub struct JobRunner {
    storage: Arc<dyn Storage>,
    system: Arc<SystemParams>,
    strategies: Arc<StrategySet>,
    tokens: Arc<dyn TokenIssuer>,
    config: WorkerConfig,
    service_id: Option<ServiceId>,
    active: ActiveJobs,
    label: String,
}

impl JobRunner {
    /// Create a runner with the standard strategies and login token issuer.
    pub fn new(storage: Arc<dyn Storage>, system: SystemParams) -> Self {
        let config = WorkerConfig::default();
        Self {
            strategies: Arc::new(StrategySet::standard(storage.clone())),
            storage,
            system: Arc::new(system),
            tokens: Arc::new(LoginTokenIssuer::new()),
            label: config.instance_name.clone(),
            config,
            service_id: None,
            active: ActiveJobs::default(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.label = config.instance_name.clone();
        self.config = config;
        self
    }

    /// Replace the strategy set.
    pub fn with_strategies(mut self, strategies: StrategySet) -> Self {
        self.strategies = Arc::new(strategies);
        self
    }

    /// Replace the token issuer.
    pub fn with_token_issuer(mut self, tokens: Arc<dyn TokenIssuer>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Record this service id on every job it runs.
    pub fn with_service_id(mut self, id: ServiceId) -> Self {
        self.service_id = Some(id);
        self
    }

    /// Share an active-job counter.
    pub fn with_active_jobs(mut self, active: ActiveJobs) -> Self {
        self.active = active;
        self
    }

    /// Name this runner as slot `n` of its instance.
    pub fn with_slot(mut self, n: usize) -> Self {
        self.label = format!("{}-{}", self.config.instance_name, n);
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// The active-job counter this runner reports to.
    pub fn active_jobs(&self) -> &ActiveJobs {
        &self.active
    }

    /// Run a single job with a dedicated set of task workers.
    pub async fn run(&self, job_id: &JobId) -> Result<JobReport> {
        let mut slot = self.start_workers();
        let result = self.drive(job_id, &mut slot).await;
        slot.shutdown().await;
        result
    }

    /// Take job ids from `queue` and run them one at a time.
    ///
    /// Returns the number of jobs taken once the queue is closed and drained.
    /// A failing job is logged and acknowledged; the slot moves on.
    pub async fn process(&self, queue: &dyn JobQueue) -> Result<usize> {
        let mut slot = self.start_workers();
        let mut taken = 0;
        info!("[{}] Waiting for jobs", self.label);

        while let Some(job_id) = queue.pop().await {
            taken += 1;
            let result = self.drive(&job_id, &mut slot).await;
            queue.ack(&job_id).await;
            match result {
                Ok(_) => {}
                Err(ExecutionError::WorkersGone) => {
                    error!("[{}] Task workers are gone, stopping slot", self.label);
                    return Err(ExecutionError::WorkersGone);
                }
                Err(e) => error!("[{}] Job {} aborted: {}", self.label, job_id, e),
            }
        }

        slot.shutdown().await;
        info!("[{}] Intake closed after {} jobs", self.label, taken);
        Ok(taken)
    }

    fn start_workers(&self) -> Slot {
        let (dispatch, rx) = mpsc::channel::<Dispatch>(self.config.dispatch_buffer.max(1));
        let (report_tx, reports) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));
        let worker = TaskWorker::new(self.storage.clone(), self.strategies.clone());

        let workers = (0..self.config.task_workers.max(1))
            .map(|_| tokio::spawn(work(worker.clone(), rx.clone(), report_tx.clone())))
            .collect();

        Slot {
            dispatch,
            reports,
            workers,
        }
    }

    async fn drive(&self, job_id: &JobId, slot: &mut Slot) -> Result<JobReport> {
        let started = Instant::now();
        let _active = self.active.enter();

        let mut job = self
            .storage
            .load_job(job_id)
            .await?
            .ok_or_else(|| ExecutionError::JobNotFound(job_id.clone()))?;
        let mut tasks = self.storage.load_tasks(job_id).await?;

        // Queue delivery is at-least-once; a finished job is left as it is.
        if matches!(job.status, JobStatus::Completed | JobStatus::Fail) {
            info!("[{}] Job {} already finished as {}, skipping", self.label, job.id, job.status);
            return Ok(JobReport {
                job_id: job.id,
                status: job.status,
                tasks,
                events: 0,
                dispatch_order: Vec::new(),
                stalled: false,
                elapsed_secs: started.elapsed().as_secs_f64(),
            });
        }

        for issue in validate_graph(&tasks) {
            warn!("[{}] Job {}: {}", self.label, job_id, issue);
        }

        let resumed = tasks.iter().any(|t| t.status != TaskStatus::Created);
        if resumed {
            self.reset_stranded(&job.id, &mut tasks).await;
        }
        let already_failed = tasks.iter().any(|t| t.status == TaskStatus::Fail);

        job.status = JobStatus::Processing;
        job.start_at = Some(chrono::Utc::now());
        job.finish_at = None;
        if self.service_id.is_some() {
            job.service_id = self.service_id.clone();
        }
        let token = match self.tokens.issue(&self.system).await {
            Ok(token) => token,
            Err(e) => {
                warn!("[{}] Job {}: could not obtain token: {}", self.label, job_id, e);
                String::new()
            }
        };
        self.persist_job(&job).await;

        info!("[{}] Job {} started with {} tasks", self.label, job.id, tasks.len());

        let mut run = Run {
            job,
            remaining: tasks.iter().filter(|t| !t.status.is_terminal()).count(),
            tasks,
            token: Arc::from(token),
            in_flight: 0,
            events: 0,
            dispatch_order: Vec::new(),
        };

        if already_failed {
            run.mark_failed();
        }

        let seeded = if resumed {
            scheduler::resume_eligible(&mut run.tasks)
        } else {
            scheduler::next_eligible(&mut run.tasks, None)
        };
        self.dispatch_execute(&mut run, &seeded, slot).await?;

        let mut stalled = false;
        while run.remaining > 0 {
            if run.in_flight == 0 {
                error!(
                    "[{}] Job {} stalled with {} tasks that can never run",
                    self.label, run.job.id, run.remaining
                );
                run.mark_failed();
                stalled = true;
                break;
            }

            let report = slot.reports.recv().await.ok_or(ExecutionError::WorkersGone)?;
            run.in_flight -= 1;
            match report {
                Report::Executed(task) => self.on_executed(&mut run, task, slot).await?,
                Report::RolledBack(task) => {
                    if let Some(i) = self.store(&mut run, task) {
                        self.on_terminal(&mut run, i, slot).await?;
                    }
                }
            }
        }

        if run.job.status != JobStatus::Fail {
            run.job.status = JobStatus::Completed;
        }
        run.job.finish_at = Some(chrono::Utc::now());
        self.persist_job(&run.job).await;

        let elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            "[{}] Job {} finished as {} in {:.2}s",
            self.label, run.job.id, run.job.status, elapsed_secs
        );

        Ok(JobReport {
            job_id: run.job.id,
            status: run.job.status,
            tasks: run.tasks,
            events: run.events,
            dispatch_order: run.dispatch_order,
            stalled,
            elapsed_secs,
        })
    }

    /// Fold a finished execution, applying the task's failure policy.
    async fn on_executed(&self, run: &mut Run, task: Task, slot: &Slot) -> Result<()> {
        let Some(i) = self.store(run, task) else {
            return Ok(());
        };

        if run.tasks[i].status == TaskStatus::Fail {
            let task = &mut run.tasks[i];
            if task.on_fail.retries() && task.retry_attempts < task.max_retry_attempts {
                task.retry_attempts += 1;
                task.status = TaskStatus::Retrying;
                info!(
                    "[{}] Retrying task {} ({}/{})",
                    self.label, task.code, task.retry_attempts, task.max_retry_attempts
                );
                let task = task.clone();
                self.persist_task(&task).await;
                return self.dispatch_execute(run, &[i], slot).await;
            }
            if task.on_fail.rolls_back() && task.has_rollback() {
                task.status = TaskStatus::Rollbacking;
                info!("[{}] Rolling back task {}", self.label, task.code);
                let scope = self.snapshot(run);
                return self.dispatch(run, i, DispatchKind::Rollback, scope, slot).await;
            }
            if task.on_fail.rolls_back() {
                debug!("[{}] Task {} has no rollback call", self.label, task.code);
            }
        }

        self.on_terminal(run, i, slot).await
    }

    /// Count a terminal task and schedule whatever it unblocks.
    async fn on_terminal(&self, run: &mut Run, i: usize, slot: &Slot) -> Result<()> {
        run.remaining = run.remaining.saturating_sub(1);
        run.events += 1;

        let (failed, cancels) = {
            let task = &run.tasks[i];
            debug!("[{}] Task {} ({}) finished as {}", self.label, task.id, task.code, task.status);
            (task.status == TaskStatus::Fail, task.on_fail.cancels())
        };

        if failed {
            run.mark_failed();
            if cancels {
                self.cancel_pending(run).await;
            }
        }

        let completion = Completion::of(&run.tasks[i]);
        let next = scheduler::next_eligible(&mut run.tasks, Some(&completion));
        self.dispatch_execute(run, &next, slot).await
    }

    /// Cancel every task of the job that has not been dispatched yet.
    async fn cancel_pending(&self, run: &mut Run) {
        let now = chrono::Utc::now();
        let mut cancelled = Vec::new();
        for task in run.tasks.iter_mut().filter(|t| t.status == TaskStatus::Created) {
            task.status = TaskStatus::Cancelled;
            task.finish_at = Some(now);
            cancelled.push(task.clone());
        }
        if cancelled.is_empty() {
            return;
        }

        info!("[{}] Job {}: cancelled {} pending tasks", self.label, run.job.id, cancelled.len());
        for task in &cancelled {
            self.persist_task(task).await;
        }
        run.remaining = run.remaining.saturating_sub(cancelled.len());
        run.events += cancelled.len();
    }

    fn store(&self, run: &mut Run, task: Task) -> Option<usize> {
        match run.index_of(&task) {
            Some(i) => {
                run.tasks[i] = task;
                Some(i)
            }
            None => {
                warn!("[{}] Report for unknown task {}", self.label, task.id);
                None
            }
        }
    }

    /// Reset tasks left mid-flight by an interrupted run so they run again.
    async fn reset_stranded(&self, job_id: &JobId, tasks: &mut [Task]) {
        let mut reset = 0;
        for task in tasks.iter_mut().filter(|t| {
            matches!(
                t.status,
                TaskStatus::Processing | TaskStatus::Retrying | TaskStatus::Rollbacking
            )
        }) {
            task.status = TaskStatus::Created;
            self.persist_task(task).await;
            reset += 1;
        }
        info!("[{}] Resuming job {}, {} tasks reset", self.label, job_id, reset);
    }

    fn snapshot(&self, run: &Run) -> Arc<Scope> {
        Arc::new(Scope::new(self.system.clone(), &run.job, &run.tasks))
    }

    async fn dispatch_execute(&self, run: &mut Run, indices: &[usize], slot: &Slot) -> Result<()> {
        if indices.is_empty() {
            return Ok(());
        }
        // One snapshot per round; tasks in a round cannot see each other's outputs.
        let scope = self.snapshot(run);
        for &i in indices {
            run.dispatch_order.push(run.tasks[i].id.to_string());
            self.dispatch(run, i, DispatchKind::Execute, scope.clone(), slot).await?;
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        run: &mut Run,
        i: usize,
        kind: DispatchKind,
        scope: Arc<Scope>,
        slot: &Slot,
    ) -> Result<()> {
        let dispatch = Dispatch {
            kind,
            task: run.tasks[i].clone(),
            scope,
            token: run.token.clone(),
        };
        slot.dispatch
            .send(dispatch)
            .await
            .map_err(|_| ExecutionError::WorkersGone)?;
        run.in_flight += 1;
        Ok(())
    }

    async fn persist_job(&self, job: &Job) {
        if let Err(e) = self.storage.update_job(job).await {
            warn!("[{}] Failed to persist job {}: {}", self.label, job.id, e);
        }
    }

    async fn persist_task(&self, task: &Task) {
        if let Err(e) = self.storage.update_task(task).await {
            warn!("[{}] Failed to persist task {}: {}", self.label, task.id, e);
        }
    }
}

/// Task worker loop: one dispatch in, one report out, until the channel closes.
async fn work(
    worker: TaskWorker,
    dispatch: Arc<Mutex<mpsc::Receiver<Dispatch>>>,
    reports: mpsc::UnboundedSender<Report>,
) {
    loop {
        let next = dispatch.lock().await.recv().await;
        let Some(Dispatch { kind, task, scope, token }) = next else {
            break;
        };

        let report = match kind {
            DispatchKind::Execute => Report::Executed(worker.run(task, &scope, &token).await),
            DispatchKind::Rollback => Report::RolledBack(worker.rollback(task, &scope, &token).await),
        };

        if reports.send(report).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use async_trait::async_trait;
    use jobworker_core::{OnFail, Param, ParamType, TaskAction, TaskId};
    use jobworker_storage::MemoryStorage;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::queue::MemoryQueue;
    use crate::strategy::{ActionRequest, ActionStrategy, Outcome};
    use crate::token::StaticTokenIssuer;
    use crate::pool::WorkerPool;

    /// Logs start/end per address and fails addresses a scripted number of times.
    #[derive(Default)]
    struct Script {
        log: std::sync::Mutex<Vec<String>>,
        failures: std::sync::Mutex<HashMap<String, u32>>,
    }

    impl Script {
        fn failing(self, address: &str, times: u32) -> Self {
            self.failures.lock().unwrap().insert(address.to_string(), times);
            self
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn position(&self, entry: &str) -> usize {
            self.log()
                .iter()
                .position(|e| e == entry)
                .unwrap_or_else(|| panic!("{} not in log {:?}", entry, self.log()))
        }
    }

    struct Scripted(Arc<Script>);

    #[async_trait]
    impl ActionStrategy for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn execute(&self, request: &ActionRequest) -> Outcome {
            self.0.log.lock().unwrap().push(format!("start:{}", request.address));
            tokio::task::yield_now().await;
            let fail = {
                let mut failures = self.0.failures.lock().unwrap();
                match failures.get_mut(&request.address) {
                    Some(n) if *n > 0 => {
                        *n = n.saturating_sub(1);
                        true
                    }
                    _ => false,
                }
            };
            self.0.log.lock().unwrap().push(format!("end:{}", request.address));
            if fail {
                Outcome::Failed { response: Some("scripted failure".to_string()) }
            } else {
                Outcome::Completed { response: Some("{}".to_string()) }
            }
        }
    }

    struct FailingIssuer;

    #[async_trait]
    impl TokenIssuer for FailingIssuer {
        async fn issue(&self, _system: &SystemParams) -> Result<String> {
            Err(ExecutionError::Token("login down".to_string()))
        }
    }

    fn job_id() -> JobId {
        JobId::from("job-1")
    }

    fn task(code: &str) -> Task {
        Task::new(job_id(), code)
            .with_id(code)
            .with_action(TaskAction::ApiPost)
            .with_address(code)
    }

    fn child_of(code: &str, parent: &str) -> Task {
        task(code).with_parent(&TaskId::from(parent))
    }

    async fn seed(tasks: Vec<Task>) -> Arc<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert_job(&Job::new(job_id()), &tasks).await.unwrap();
        storage
    }

    fn runner(storage: Arc<MemoryStorage>, script: Arc<Script>) -> JobRunner {
        let scripted: Arc<dyn ActionStrategy> = Arc::new(Scripted(script));
        JobRunner::new(storage, SystemParams::new())
            .with_strategies(
                StrategySet::empty()
                    .with(TaskAction::ApiPost, scripted.clone())
                    .with(TaskAction::ApiDelete, scripted),
            )
            .with_token_issuer(Arc::new(StaticTokenIssuer("t".to_string())))
            .with_config(WorkerConfig::new().with_task_workers(3))
    }

    fn status_of(report: &JobReport, code: &str) -> TaskStatus {
        report
            .tasks
            .iter()
            .find(|t| t.code == code)
            .map(|t| t.status)
            .unwrap_or_else(|| panic!("no task {}", code))
    }

    #[tokio::test]
    async fn test_two_roots_dispatch_at_cold_start() {
        let storage = seed(vec![task("a"), task("b")]).await;
        let report = runner(storage.clone(), Arc::new(Script::default()))
            .run(&job_id())
            .await
            .unwrap();

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.dispatch_order, vec!["a", "b"]);
        assert_eq!(report.events, 2);
        assert!(!report.stalled);

        let stored = storage.load_job(&job_id()).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.start_at.is_some() && stored.finish_at.is_some());
    }

    #[tokio::test]
    async fn test_child_runs_after_parent_completes() {
        let script = Arc::new(Script::default());
        let storage = seed(vec![task("a"), child_of("b", "a")]).await;
        let report = runner(storage, script.clone()).run(&job_id()).await.unwrap();

        assert_eq!(report.status, JobStatus::Completed);
        assert!(script.position("end:a") < script.position("start:b"));
    }

    #[tokio::test]
    async fn test_next_stage_waits_for_whole_stage() {
        let script = Arc::new(Script::default());
        let storage = seed(vec![task("x"), task("x2"), task("y").with_sequence(1)]).await;
        let report = runner(storage, script.clone()).run(&job_id()).await.unwrap();

        assert_eq!(report.status, JobStatus::Completed);
        let start_y = script.position("start:y");
        assert!(script.position("end:x") < start_y);
        assert!(script.position("end:x2") < start_y);
    }

    #[tokio::test]
    async fn test_barrier_counts_every_task_once() {
        let tasks = vec![
            task("a"),
            task("b"),
            task("c").with_sequence(1),
            child_of("a1", "a"),
            child_of("a2", "a").with_sequence(1),
            child_of("a1x", "a1"),
            child_of("c1", "c"),
        ];
        let storage = seed(tasks).await;
        let report = runner(storage.clone(), Arc::new(Script::default()))
            .run(&job_id())
            .await
            .unwrap();

        assert_eq!(report.events, 7);
        assert_eq!(report.dispatch_order.len(), 7);
        assert!(report.tasks.iter().all(|t| t.status == TaskStatus::Completed));
        // Two writes per task from the workers.
        assert_eq!(storage.task_writes().await, 14);
    }

    #[tokio::test]
    async fn test_failed_task_fails_job_without_stopping_it() {
        let script = Arc::new(Script::default().failing("a", u32::MAX));
        let storage = seed(vec![task("a"), child_of("a1", "a"), task("b").with_sequence(1)]).await;
        let report = runner(storage, script).run(&job_id()).await.unwrap();

        assert_eq!(report.status, JobStatus::Fail);
        assert_eq!(status_of(&report, "a"), TaskStatus::Fail);
        assert_eq!(status_of(&report, "a1"), TaskStatus::Completed);
        assert_eq!(status_of(&report, "b"), TaskStatus::Completed);
        assert_eq!(report.tasks[0].response, "scripted failure");
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let script = Arc::new(Script::default().failing("flaky", 2));
        let storage = seed(vec![
            task("flaky").with_on_fail(OnFail::RetryAndContinue, 3),
            task("next").with_sequence(1),
        ])
        .await;
        let report = runner(storage, script).run(&job_id()).await.unwrap();

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.tasks[0].retry_attempts, 2);
        assert_eq!(report.dispatch_order, vec!["flaky", "flaky", "flaky", "next"]);
        assert_eq!(report.events, 2);
    }

    #[tokio::test]
    async fn test_retry_exhausted_then_cancel() {
        let script = Arc::new(Script::default().failing("bad", u32::MAX));
        let storage = seed(vec![
            task("bad").with_on_fail(OnFail::RetryAndCancel, 1),
            task("ok"),
            task("later").with_sequence(1),
            child_of("child", "bad"),
        ])
        .await;
        let report = runner(storage.clone(), script.clone()).run(&job_id()).await.unwrap();

        assert_eq!(report.status, JobStatus::Fail);
        assert_eq!(report.tasks[0].retry_attempts, 1);
        assert_eq!(status_of(&report, "bad"), TaskStatus::Fail);
        assert_eq!(status_of(&report, "ok"), TaskStatus::Completed);
        assert_eq!(status_of(&report, "later"), TaskStatus::Cancelled);
        assert_eq!(status_of(&report, "child"), TaskStatus::Cancelled);
        assert_eq!(report.events, 4);
        assert!(!script.log().iter().any(|e| e == "start:later"));

        let stored = storage.load_tasks(&job_id()).await.unwrap();
        assert_eq!(stored[2].status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_rollback_and_cancel() {
        let script = Arc::new(Script::default().failing("pay", u32::MAX));
        let storage = seed(vec![
            task("pay")
                .with_on_fail(OnFail::RollbackAndCancel, 0)
                .with_rollback(TaskAction::ApiDelete, "undo-pay", ""),
            task("ship").with_sequence(1),
        ])
        .await;
        let report = runner(storage, script.clone()).run(&job_id()).await.unwrap();

        assert_eq!(report.status, JobStatus::Fail);
        assert!(script.position("end:pay") < script.position("start:undo-pay"));
        assert_eq!(status_of(&report, "pay"), TaskStatus::Fail);
        assert_eq!(report.tasks[0].rollback_response, "{}");
        assert_eq!(status_of(&report, "ship"), TaskStatus::Cancelled);
        assert_eq!(report.events, 2);
    }

    #[tokio::test]
    async fn test_rollback_then_continue() {
        let script = Arc::new(Script::default().failing("pay", u32::MAX));
        let storage = seed(vec![
            task("pay")
                .with_on_fail(OnFail::Rollback, 0)
                .with_rollback(TaskAction::ApiDelete, "undo-pay", ""),
            task("ship").with_sequence(1),
        ])
        .await;
        let report = runner(storage, script.clone()).run(&job_id()).await.unwrap();

        assert_eq!(report.status, JobStatus::Fail);
        assert!(script.position("end:undo-pay") < script.position("start:ship"));
        assert_eq!(status_of(&report, "ship"), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_rollback_policy_without_rollback_call() {
        let script = Arc::new(Script::default().failing("pay", u32::MAX));
        let storage = seed(vec![
            task("pay").with_on_fail(OnFail::Rollback, 0),
            task("ship").with_sequence(1),
        ])
        .await;
        let report = runner(storage.clone(), script.clone()).run(&job_id()).await.unwrap();

        assert_eq!(report.status, JobStatus::Fail);
        assert_eq!(status_of(&report, "pay"), TaskStatus::Fail);
        assert_eq!(status_of(&report, "ship"), TaskStatus::Completed);
        assert_eq!(report.tasks[0].rollback_response, "");
        // No rollback run: two writes per executed task only.
        assert_eq!(storage.task_writes().await, 4);
    }

    #[tokio::test]
    async fn test_root_stage_one_seeds_without_stage_zero() {
        let script = Arc::new(Script::default());
        let storage = seed(vec![
            task("b").with_sequence(1),
            task("c").with_sequence(1),
            task("d").with_sequence(2),
        ])
        .await;
        let report = runner(storage, script.clone()).run(&job_id()).await.unwrap();

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.dispatch_order, vec!["b", "c", "d"]);
        assert!(script.position("end:c") < script.position("start:d"));
        assert!(!report.stalled);
    }

    #[tokio::test]
    async fn test_redelivered_job_is_left_finished() {
        let script = Arc::new(Script::default());
        let storage = seed(vec![task("a"), task("b").with_sequence(1)]).await;
        let runner = runner(storage.clone(), script.clone());

        let first = runner.run(&job_id()).await.unwrap();
        assert_eq!(first.status, JobStatus::Completed);
        let stored = storage.load_job(&job_id()).await.unwrap().unwrap();
        let runs = script.log().len();

        let second = runner.run(&job_id()).await.unwrap();
        assert_eq!(second.status, JobStatus::Completed);
        assert!(!second.stalled);
        assert_eq!(second.events, 0);
        assert!(second.dispatch_order.is_empty());
        assert_eq!(script.log().len(), runs);
        assert_eq!(storage.load_job(&job_id()).await.unwrap().unwrap(), stored);
    }

    #[tokio::test]
    async fn test_interrupted_job_resumes_where_it_stopped() {
        let mut done = task("a");
        done.status = TaskStatus::Completed;
        let mut stranded = child_of("a1", "a");
        stranded.status = TaskStatus::Processing;
        let storage = Arc::new(MemoryStorage::new());
        let mut job = Job::new(job_id());
        job.status = JobStatus::Processing;
        storage
            .insert_job(&job, &[done, stranded, task("b").with_sequence(1), child_of("a2", "a").with_sequence(1)])
            .await
            .unwrap();

        let script = Arc::new(Script::default());
        let report = runner(storage, script.clone()).run(&job_id()).await.unwrap();

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.dispatch_order, vec!["a1", "b", "a2"]);
        assert_eq!(report.events, 3);
        assert!(!script.log().iter().any(|e| e == "start:a"));
        assert!(script.position("end:a1") < script.position("start:a2"));
    }

    #[tokio::test]
    async fn test_resumed_job_keeps_earlier_failure() {
        let mut failed = task("a");
        failed.status = TaskStatus::Fail;
        let storage = seed(vec![failed, task("b").with_sequence(1)]).await;
        let report = runner(storage, Arc::new(Script::default())).run(&job_id()).await.unwrap();

        assert_eq!(report.status, JobStatus::Fail);
        assert_eq!(status_of(&report, "b"), TaskStatus::Completed);
        assert_eq!(report.events, 1);
    }

    #[tokio::test]
    async fn test_dangling_parent_stalls_instead_of_hanging() {
        let storage = seed(vec![task("a"), child_of("orphan", "ghost")]).await;
        let report = runner(storage, Arc::new(Script::default()))
            .run(&job_id())
            .await
            .unwrap();

        assert!(report.stalled);
        assert_eq!(report.status, JobStatus::Fail);
        assert_eq!(status_of(&report, "a"), TaskStatus::Completed);
        assert_eq!(status_of(&report, "orphan"), TaskStatus::Created);
    }

    #[tokio::test]
    async fn test_empty_job_completes_immediately() {
        let storage = seed(Vec::new()).await;
        let report = runner(storage, Arc::new(Script::default()))
            .run(&job_id())
            .await
            .unwrap();
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.events, 0);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let storage = Arc::new(MemoryStorage::new());
        let err = runner(storage, Arc::new(Script::default()))
            .run(&JobId::from("missing"))
            .await;
        assert!(matches!(err, Err(ExecutionError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_token_failure_runs_with_empty_token() {
        let storage = seed(vec![task("a")]).await;
        let report = runner(storage, Arc::new(Script::default()))
            .with_token_issuer(Arc::new(FailingIssuer))
            .with_service_id(ServiceId::from("svc-1"))
            .run(&job_id())
            .await
            .unwrap();
        assert_eq!(report.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_api_transport_error_fails_task_and_job() {
        let storage = seed(vec![
            task("fetch").with_action(TaskAction::ApiGet).with_address("http://127.0.0.1:9/items"),
            child_of("after", "fetch").with_action(TaskAction::Delay),
        ])
        .await;
        let report = JobRunner::new(storage.clone(), SystemParams::new())
            .with_token_issuer(Arc::new(StaticTokenIssuer::default()))
            .run(&job_id())
            .await
            .unwrap();

        assert_eq!(report.status, JobStatus::Fail);
        assert_eq!(status_of(&report, "fetch"), TaskStatus::Fail);
        assert_eq!(report.tasks[0].response, "");
        assert_eq!(status_of(&report, "after"), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_outputs_flow_into_later_tasks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"data":{"id":77,"ref":"R-9"}}"#))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orders/77/R-9"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let create = Task::new(job_id(), "create")
            .with_id("create")
            .with_action(TaskAction::ApiPost)
            .with_address("{system.api_host}/orders")
            .with_param(Param::new("id", ParamType::Number).with_field("data.id"))
            .with_param(Param::new("ref", ParamType::String).with_field("data.ref"));
        let read = Task::new(job_id(), "read")
            .with_id("read")
            .with_parent(&TaskId::from("create"))
            .with_action(TaskAction::ApiGet)
            .with_address("{system.api_host}/orders/{task.create.id}/{task.create.ref}");
        let storage = seed(vec![create, read]).await;

        let system = SystemParams::new().with("api_host", server.uri());
        let report = JobRunner::new(storage, system)
            .with_token_issuer(Arc::new(StaticTokenIssuer::default()))
            .run(&job_id())
            .await
            .unwrap();

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.tasks[0].param_value("id"), "77");
        assert_eq!(report.tasks[1].address, format!("{}/orders/77/R-9", server.uri()));
    }

    #[tokio::test]
    async fn test_process_skips_missing_jobs() {
        let storage = seed(vec![task("a")]).await;
        let (queue, handle) = MemoryQueue::channel();
        handle.push("missing");
        handle.push(job_id());
        handle.close();

        let taken = runner(storage.clone(), Arc::new(Script::default()))
            .process(&queue)
            .await
            .unwrap();

        assert_eq!(taken, 2);
        assert_eq!(queue.pending_acks().await, 0);
        let job = storage.load_job(&job_id()).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_pool_drains_queue() {
        let storage = Arc::new(MemoryStorage::new());
        let (queue, handle) = MemoryQueue::channel();
        for n in 0..5 {
            let id = JobId::from(format!("job-{}", n));
            let tasks = vec![
                Task::new(id.clone(), "a").with_action(TaskAction::ApiPost).with_address("a"),
                Task::new(id.clone(), "b").with_action(TaskAction::ApiPost).with_address("b").with_sequence(1),
            ];
            storage.insert_job(&Job::new(id.clone()), &tasks).await.unwrap();
            handle.push(id);
        }
        handle.close();

        let config = WorkerConfig::new().with_job_workers(2).with_task_workers(2);
        let runner = runner(storage.clone(), Arc::new(Script::default())).with_config(config);
        let pool = WorkerPool::start(runner, Arc::new(queue));
        let counter = pool.active_counter();

        assert_eq!(pool.join().await, 5);
        assert_eq!(counter.get(), 0);
        for job in storage.list_jobs().await.unwrap() {
            assert_eq!(job.status, JobStatus::Completed);
        }
    }
}
