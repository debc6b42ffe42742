//! Workflow Execution Engine
//!
//! Orchestrates runs of ordered action lists:
//! - Sequential execution with first-failure-halts semantics
//! - Cooperative pause/resume/abort at action boundaries
//! - Lifecycle events for every transition
//! - Per-run statistics and bounded retention of finished runs
//!
//! Each run owns one lock guarding its status, its running/paused flags and
//! its cursor. The flag check and cursor read at the top of every iteration
//! happen atomically under that lock. Events are always published after the
//! lock is released.
//!
//! Context state transitions for a run happen while its lock is held, so
//! state listeners on an engine-driven context must not call back into the
//! engine for the same run.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde_json::json;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{ActionEvent, Event, EventDispatcher, EventType, WorkflowEvent};
use crate::listener::ListenerId;
use crate::monitoring::{StatisticsSnapshot, WorkflowStatistics};

use super::action::{invoke_action, Action, ActionResult, ContextSource};
use super::context::ExecutionContext;
use super::pool::WorkerPool;
use super::run::{RunRecord, RunResult, WorkflowStatus, WorkflowStatusSnapshot};
use super::state::ExecutionState;

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

fn next_run_id() -> String {
    format!(
        "run-{}-{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed)
    )
}

/// Runs `action` against `context`, writing outputs back on success.
fn execute_in_context(action: &dyn Action, context: &ExecutionContext) -> ActionResult {
    let variables = context.flatten();
    let result = invoke_action(action, &variables);

    if result.success {
        if let Some(outputs) = result.outputs() {
            context.absorb_outputs(outputs);
        }
    }

    result
}

/// Applies a transition the engine's own bookkeeping guarantees is legal.
fn advance(context: &ExecutionContext, to: ExecutionState) {
    if let Err(e) = context.transition_to(to) {
        panic!("Engine invariant violated on context '{}': {}", context.id(), e);
    }
}

/// State shared by the engine handle and every run loop on the pool.
struct EngineShared {
    config: EngineConfig,
    dispatcher: EventDispatcher,
    runs: RwLock<HashMap<String, Arc<RunRecord>>>,
}

impl EngineShared {
    fn record(&self, run_id: &str) -> Option<Arc<RunRecord>> {
        self.runs.read().get(run_id).cloned()
    }

    fn dispatch(&self, event: &dyn Event) {
        self.dispatcher.dispatch(event);
    }

    /// Creates and stores the run record. The new record is owned by a loop
    /// from the start; the caller must run or queue it.
    fn register(
        &self,
        run_id: String,
        actions: Vec<Arc<dyn Action>>,
        context: Option<ContextSource>,
    ) -> Result<Arc<RunRecord>, EngineError> {
        let context = match context {
            Some(source) => source.into_context(self.config.context),
            None => ExecutionContext::with_options(self.config.context),
        };

        let state = context.state();
        if state != ExecutionState::Pending {
            return Err(EngineError::ContextNotPending {
                context_id: context.id().to_string(),
                state,
            });
        }

        let (record, released) = {
            let mut runs = self.runs.write();

            if let Some(existing) = runs.get(&run_id) {
                if !existing.is_terminal() {
                    return Err(EngineError::RunActive(run_id));
                }
            }

            let statistics = Arc::new(Mutex::new(WorkflowStatistics::new(run_id.clone())));
            let sink = Arc::clone(&statistics);
            let listener = self
                .dispatcher
                .add_listener(None, move |event| sink.lock().record_event(event));

            let record = Arc::new(RunRecord::new(
                run_id.clone(),
                actions,
                context,
                statistics,
                listener,
            ));
            record.control.lock().loop_active = true;

            let mut released: Vec<Arc<RunRecord>> = runs
                .insert(run_id.clone(), Arc::clone(&record))
                .into_iter()
                .collect();
            released.extend(self.evict_finished(&mut runs));

            (record, released)
        };

        for old in released {
            self.release(&old);
        }

        debug!(
            "Registered workflow '{}' with {} action(s)",
            record.run_id,
            record.actions.len()
        );
        Ok(record)
    }

    /// Removes the oldest finished records above the retention limit.
    fn evict_finished(&self, runs: &mut HashMap<String, Arc<RunRecord>>) -> Vec<Arc<RunRecord>> {
        let mut finished: Vec<_> = runs
            .iter()
            .filter_map(|(id, record)| record.finished_at().map(|at| (at, id.clone())))
            .collect();

        let limit = self.config.max_retained_runs;
        if finished.len() <= limit {
            return Vec::new();
        }

        finished.sort();
        let excess = finished.len() - limit;
        finished
            .into_iter()
            .take(excess)
            .filter_map(|(_, id)| runs.remove(&id))
            .collect()
    }

    /// Frees what a removed record holds.
    fn release(&self, record: &RunRecord) {
        self.dispatcher.remove_listener(record.statistics_listener);
        record.context.dispose();
        debug!("Released workflow '{}'", record.run_id);
    }

    /// The run loop. Entered once per run and once per resume.
    fn run_loop(&self, record: &RunRecord) -> RunResult {
        let run_id = record.run_id.as_str();
        let total = record.actions.len();

        let first_entry = {
            let mut control = record.control.lock();

            // Aborted while queued
            if control.status.is_terminal() {
                control.loop_active = false;
                let results = control.results.clone();
                drop(control);
                record.notify_settled();
                return RunResult::aborted(run_id, results);
            }

            control.loop_active = true;
            control.status = WorkflowStatus::Running;
            if record.context.state() != ExecutionState::Running {
                advance(&record.context, ExecutionState::Running);
            }

            let first = !control.started;
            control.started = true;
            first
        };

        if first_entry {
            info!("Workflow '{}' started ({} action(s))", run_id, total);
            self.dispatch(
                &WorkflowEvent::new(EventType::WorkflowStarted, run_id)
                    .with_data("total_actions", json!(total)),
            );
        }

        let mut failed_at: Option<usize> = None;

        loop {
            let index = {
                let mut control = record.control.lock();

                // Flags are checked before an action, never after the last one
                if control.current_index >= total {
                    break;
                }

                if control.paused {
                    control.status = WorkflowStatus::Paused;
                    advance(&record.context, ExecutionState::Paused);
                    control.loop_active = false;

                    let index = control.current_index;
                    let results = control.results.clone();
                    drop(control);
                    record.notify_settled();

                    info!("Workflow '{}' paused before action {}", run_id, index);
                    return RunResult::paused(run_id, index, results);
                }

                if !control.running {
                    // abort_workflow already moved the context and published
                    control.loop_active = false;
                    let results = control.results.clone();
                    drop(control);
                    record.notify_settled();

                    info!("Workflow '{}' stopped after abort", run_id);
                    return RunResult::aborted(run_id, results);
                }

                control.current_index
            };

            let action = &record.actions[index];
            self.dispatch(&ActionEvent::new(
                EventType::ActionStarted,
                run_id,
                action.name(),
                index,
            ));

            let result = execute_in_context(action.as_ref(), &record.context);
            let succeeded = result.success;

            {
                let mut control = record.control.lock();
                control.results.push(result.clone());
                control.current_index = index + 1;
            }

            if succeeded {
                debug!("Action '{}' [{}] completed: {}", action.name(), index, result.message);
                self.dispatch(
                    &ActionEvent::new(EventType::ActionCompleted, run_id, action.name(), index)
                        .with_result(result),
                );
            } else {
                error!("Action '{}' [{}] failed: {}", action.name(), index, result.message);
                self.dispatch(
                    &ActionEvent::new(EventType::ActionFailed, run_id, action.name(), index)
                        .with_result(result),
                );
                failed_at = Some(index);
                break;
            }
        }

        self.finish(record, failed_at)
    }

    fn finish(&self, record: &RunRecord, failed_at: Option<usize>) -> RunResult {
        let run_id = record.run_id.as_str();

        let (result, event) = {
            let mut control = record.control.lock();

            if control.status == WorkflowStatus::Aborted {
                control.loop_active = false;
                let results = control.results.clone();
                drop(control);
                record.notify_settled();
                return RunResult::aborted(run_id, results);
            }

            let (status, state, event_type, message) = match failed_at {
                None => (
                    WorkflowStatus::Completed,
                    ExecutionState::Completed,
                    EventType::WorkflowCompleted,
                    format!("Workflow completed: {} action(s) succeeded", control.results.len()),
                ),
                Some(index) => {
                    let reason = control
                        .results
                        .last()
                        .map(|r| r.message.clone())
                        .unwrap_or_default();
                    (
                        WorkflowStatus::Failed,
                        ExecutionState::Failed,
                        EventType::WorkflowFailed,
                        format!(
                            "Workflow failed at action {} ('{}'): {}",
                            index,
                            record.actions[index].name(),
                            reason
                        ),
                    )
                }
            };

            control.status = status;
            control.running = false;
            control.paused = false;
            control.finished_at = Some(Utc::now());
            advance(&record.context, state);

            let result = RunResult::finished(
                run_id,
                failed_at.is_none(),
                message.clone(),
                control.results.clone(),
            );
            let event = WorkflowEvent::new(event_type, run_id).with_data("message", json!(message));
            (result, event)
        };

        if result.is_success() {
            info!("{}", result.message);
        } else {
            error!("{}", result.message);
        }
        self.dispatch(&event);

        record.control.lock().loop_active = false;
        record.notify_settled();
        result
    }
}

/// Supervised executor for ordered action lists.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use actionrunner::execution::{action_fn, Action, ActionResult, WorkflowEngine};
/// use actionrunner::config::EngineConfig;
/// use serde_json::json;
///
/// let engine = WorkflowEngine::new(EngineConfig::default().with_worker_threads(1));
/// let actions: Vec<Arc<dyn Action>> = vec![
///     action_fn("produce", |_| Ok(ActionResult::success("made x").with_output("x", json!(2)))),
///     action_fn("consume", |vars| {
///         let x = vars.get("x").and_then(|v| v.as_i64()).unwrap_or(0);
///         Ok(ActionResult::success(format!("x = {}", x)))
///     }),
/// ];
///
/// let result = engine.execute_workflow(actions, None, None);
/// assert!(result.is_success());
/// assert_eq!(result.results[1].message, "x = 2");
/// ```
pub struct WorkflowEngine {
    shared: Arc<EngineShared>,
    pool: WorkerPool,
}

impl WorkflowEngine {
    pub fn new(config: EngineConfig) -> Self {
        let pool = WorkerPool::new(config.worker_threads);
        info!(
            "Workflow engine ready ({} worker thread(s), retaining {} finished run(s))",
            pool.size(),
            config.max_retained_runs
        );

        Self {
            shared: Arc::new(EngineShared {
                config,
                dispatcher: EventDispatcher::new(),
                runs: RwLock::new(HashMap::new()),
            }),
            pool,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.shared.dispatcher
    }

    /// Subscribes to engine events. `None` subscribes to every type.
    pub fn add_listener<F>(&self, event_type: Option<EventType>, listener: F) -> ListenerId
    where
        F: Fn(&dyn Event) + Send + Sync + 'static,
    {
        self.shared.dispatcher.add_listener(event_type, listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.dispatcher.remove_listener(id)
    }

    /// Runs one action outside of any run.
    ///
    /// Plain variables are upgraded into a fresh context. Outputs of a
    /// successful action are written to the context's workflow scope.
    pub fn execute_action(&self, action: &dyn Action, context: impl Into<ContextSource>) -> ActionResult {
        let context = context.into().into_context(self.shared.config.context);
        execute_in_context(action, &context)
    }

    /// Runs a workflow on the calling thread.
    ///
    /// Returns early with a non-completed result if the run is paused or
    /// aborted, or if it cannot be admitted (run id still active, context
    /// not pending).
    pub fn execute_workflow(
        &self,
        actions: Vec<Arc<dyn Action>>,
        context: Option<ContextSource>,
        workflow_id: Option<&str>,
    ) -> RunResult {
        let run_id = workflow_id.map(str::to_string).unwrap_or_else(next_run_id);

        match self.shared.register(run_id.clone(), actions, context) {
            Ok(record) => self.shared.run_loop(&record),
            Err(e) => {
                warn!("Workflow '{}' rejected: {}", run_id, e);
                RunResult::rejected(&run_id, e.to_string())
            }
        }
    }

    /// Registers a workflow and runs it on the worker pool.
    pub fn submit_workflow(
        &self,
        actions: Vec<Arc<dyn Action>>,
        context: Option<ContextSource>,
        workflow_id: Option<&str>,
    ) -> Result<String, EngineError> {
        if self.pool.is_shut_down() {
            return Err(EngineError::PoolShutDown);
        }

        let run_id = workflow_id.map(str::to_string).unwrap_or_else(next_run_id);
        let record = self.shared.register(run_id.clone(), actions, context)?;

        let shared = Arc::clone(&self.shared);
        let job_record = Arc::clone(&record);
        if let Err(e) = self.pool.submit(move || {
            shared.run_loop(&job_record);
        }) {
            self.forget(&record);
            return Err(e);
        }

        Ok(run_id)
    }

    /// Drops a record that never got to run.
    fn forget(&self, record: &Arc<RunRecord>) {
        let removed = {
            let mut runs = self.shared.runs.write();
            match runs.get(&record.run_id) {
                Some(stored) if Arc::ptr_eq(stored, record) => runs.remove(&record.run_id),
                _ => None,
            }
        };
        if let Some(record) = removed {
            self.shared.release(&record);
        }
    }

    /// Asks a running workflow to pause at the next action boundary.
    ///
    /// `WorkflowPaused` is published after the run lock is released, so a
    /// listener racing a quick resume may see `WorkflowResumed` first.
    /// A pause requested during the last action has no boundary left to
    /// stop at and the run completes.
    pub fn pause_workflow(&self, run_id: &str) -> bool {
        let record = match self.shared.record(run_id) {
            Some(record) => record,
            None => {
                warn!("Cannot pause unknown workflow '{}'", run_id);
                return false;
            }
        };

        let index = {
            let mut control = record.control.lock();
            if !control.running || control.paused {
                debug!("Workflow '{}' is not running; pause ignored", run_id);
                return false;
            }
            control.paused = true;
            control.current_index
        };

        info!("Pausing workflow '{}'", run_id);
        self.shared.dispatch(
            &WorkflowEvent::new(EventType::WorkflowPaused, run_id)
                .with_data("current_index", json!(index)),
        );
        true
    }

    /// Resumes a paused workflow from its stored cursor.
    ///
    /// Fire-and-forget: the continuation runs on the worker pool. Use
    /// [`get_workflow_status`](Self::get_workflow_status) or
    /// [`wait_for_workflow`](Self::wait_for_workflow) to follow it.
    pub fn resume_workflow(&self, run_id: &str) -> bool {
        let record = match self.shared.record(run_id) {
            Some(record) => record,
            None => {
                warn!("Cannot resume unknown workflow '{}'", run_id);
                return false;
            }
        };

        let (index, needs_loop) = {
            let mut control = record.control.lock();
            if !control.paused {
                debug!("Workflow '{}' is not paused; resume ignored", run_id);
                return false;
            }

            // The loop may not have reached the boundary yet
            let needs_loop = !control.loop_active;
            if needs_loop && self.pool.is_shut_down() {
                warn!("Cannot resume workflow '{}': engine is shut down", run_id);
                return false;
            }

            control.paused = false;
            control.running = true;
            control.loop_active = true;
            (control.current_index, needs_loop)
        };

        info!("Resuming workflow '{}' at action {}", run_id, index);
        self.shared.dispatch(
            &WorkflowEvent::new(EventType::WorkflowResumed, run_id)
                .with_data("current_index", json!(index)),
        );

        if needs_loop {
            let shared = Arc::clone(&self.shared);
            let job_record = Arc::clone(&record);
            if let Err(e) = self.pool.submit(move || {
                shared.run_loop(&job_record);
            }) {
                error!("Failed to schedule continuation for '{}': {}", run_id, e);
                let mut control = record.control.lock();
                control.paused = true;
                control.loop_active = false;
                drop(control);
                record.notify_settled();
                return false;
            }
        }

        true
    }

    /// Aborts a running or paused workflow.
    ///
    /// Takes effect at the next action boundary; an action already executing
    /// runs to completion.
    pub fn abort_workflow(&self, run_id: &str) -> bool {
        let record = match self.shared.record(run_id) {
            Some(record) => record,
            None => {
                warn!("Cannot abort unknown workflow '{}'", run_id);
                return false;
            }
        };

        let (index, parked) = {
            let mut control = record.control.lock();
            if !control.running && !control.paused {
                debug!("Workflow '{}' already finished; abort ignored", run_id);
                return false;
            }

            control.running = false;
            control.paused = false;
            control.status = WorkflowStatus::Aborted;
            control.finished_at = Some(Utc::now());

            let context = &record.context;
            match context.state() {
                // Queued but never started
                ExecutionState::Pending => {
                    advance(context, ExecutionState::Running);
                    advance(context, ExecutionState::Aborted);
                }
                state if state.is_terminal() => {}
                _ => advance(context, ExecutionState::Aborted),
            }

            (control.current_index, !control.loop_active)
        };

        warn!("Workflow '{}' aborted at action {}", run_id, index);
        self.shared.dispatch(
            &WorkflowEvent::new(EventType::WorkflowAborted, run_id)
                .with_data("current_index", json!(index)),
        );

        if parked {
            record.notify_settled();
        }
        true
    }

    /// Status of a run, or `None` for an unknown id.
    pub fn get_workflow_status(&self, run_id: &str) -> Option<WorkflowStatusSnapshot> {
        self.shared.record(run_id).map(|record| record.status_snapshot())
    }

    /// Statistics of a run, or `None` for an unknown id.
    pub fn get_workflow_statistics(&self, run_id: &str) -> Option<StatisticsSnapshot> {
        self.shared
            .record(run_id)
            .map(|record| record.statistics.lock().snapshot())
    }

    /// Human readable statistics summary and timeline of a run.
    pub fn get_workflow_report(&self, run_id: &str) -> Option<String> {
        self.shared.record(run_id).map(|record| {
            let statistics = record.statistics.lock();
            format!("{}\n{}", statistics.summary(), statistics.timeline_chart())
        })
    }

    /// Context of a run, or `None` for an unknown id.
    pub fn get_workflow_context(&self, run_id: &str) -> Option<Arc<ExecutionContext>> {
        self.shared
            .record(run_id)
            .map(|record| Arc::clone(&record.context))
    }

    /// Blocks until the run is finished or parked, or `timeout` elapses, and
    /// returns its status at that point.
    pub fn wait_for_workflow(&self, run_id: &str, timeout: Duration) -> Option<WorkflowStatusSnapshot> {
        self.shared
            .record(run_id)
            .map(|record| record.wait_settled(timeout))
    }

    /// Ids of every retained run.
    pub fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.runs.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Removes a finished or paused run. A paused run is aborted first.
    ///
    /// Returns false for unknown ids and for runs a loop still owns.
    pub fn discard_workflow(&self, run_id: &str) -> bool {
        let record = match self.shared.record(run_id) {
            Some(record) => record,
            None => return false,
        };

        let parked_pause = {
            let control = record.control.lock();
            if control.loop_active {
                debug!("Workflow '{}' is still executing; discard refused", run_id);
                return false;
            }
            control.status == WorkflowStatus::Paused
        };

        if parked_pause {
            self.abort_workflow(run_id);
        }

        let removed = {
            let mut runs = self.shared.runs.write();
            let removable = match runs.get(run_id) {
                Some(stored) => {
                    let control = stored.control.lock();
                    Arc::ptr_eq(stored, &record)
                        && control.status.is_terminal()
                        && !control.loop_active
                }
                None => false,
            };
            if removable {
                runs.remove(run_id)
            } else {
                None
            }
        };

        match removed {
            Some(record) => {
                self.shared.release(&record);
                info!("Discarded workflow '{}'", run_id);
                true
            }
            None => false,
        }
    }

    /// Removes every finished run. Returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        let removed: Vec<Arc<RunRecord>> = {
            let mut runs = self.shared.runs.write();
            let ids: Vec<String> = runs
                .iter()
                .filter(|(_, record)| {
                    let control = record.control.lock();
                    control.status.is_terminal() && !control.loop_active
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| runs.remove(id)).collect()
        };

        for record in &removed {
            self.shared.release(record);
        }
        if !removed.is_empty() {
            info!("Pruned {} finished workflow(s)", removed.len());
        }
        removed.len()
    }

    /// Stops accepting work and waits for queued runs to drain.
    ///
    /// Paused runs stay paused and can no longer be resumed.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("config", &self.shared.config)
            .field("runs", &self.shared.runs.read().len())
            .field("dispatcher", &self.shared.dispatcher)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::action::action_fn;
    use crate::variables::VariableMap;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::{channel, Receiver, Sender};

    const WAIT: Duration = Duration::from_secs(5);

    fn engine() -> WorkflowEngine {
        WorkflowEngine::new(EngineConfig::default().with_worker_threads(2))
    }

    fn ok(name: &str) -> Arc<dyn Action> {
        let message = format!("{} done", name);
        action_fn(name, move |_| Ok(ActionResult::success(message.clone())))
    }

    fn failing(name: &str) -> Arc<dyn Action> {
        action_fn(name, |_| Ok(ActionResult::failure("expected failure")))
    }

    fn counting(name: &str, counter: &Arc<AtomicUsize>) -> Arc<dyn Action> {
        let counter = Arc::clone(counter);
        action_fn(name, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ActionResult::success("counted"))
        })
    }

    /// Action that reports entry and then blocks until opened.
    struct Gate {
        entered: Receiver<()>,
        release: Sender<()>,
    }

    impl Gate {
        fn wait_entered(&self) {
            self.entered.recv_timeout(WAIT).unwrap();
        }

        fn open(&self) {
            self.release.send(()).unwrap();
        }
    }

    fn gated(name: &str) -> (Arc<dyn Action>, Gate) {
        let (entered_tx, entered_rx) = channel();
        let (release_tx, release_rx) = channel();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);

        let action = action_fn(name, move |_| {
            let _ = entered_tx.lock().send(());
            let _ = release_rx.lock().recv_timeout(WAIT);
            Ok(ActionResult::success("gate passed"))
        });

        (
            action,
            Gate {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }

    fn record_events(engine: &WorkflowEngine) -> Arc<Mutex<Vec<EventType>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        engine.add_listener(None, move |event| sink.lock().push(event.event_type()));
        events
    }

    fn count(events: &[EventType], wanted: EventType) -> usize {
        events.iter().filter(|e| **e == wanted).count()
    }

    #[test]
    fn test_successful_run_event_order() {
        let engine = engine();
        let events = record_events(&engine);

        let result = engine.execute_workflow(vec![ok("a"), ok("b"), ok("c")], None, Some("happy"));

        assert!(result.is_success());
        assert_eq!(result.run_id, "happy");
        assert_eq!(result.results.len(), 3);
        assert_eq!(
            *events.lock(),
            vec![
                EventType::WorkflowStarted,
                EventType::ActionStarted,
                EventType::ActionCompleted,
                EventType::ActionStarted,
                EventType::ActionCompleted,
                EventType::ActionStarted,
                EventType::ActionCompleted,
                EventType::WorkflowCompleted,
            ]
        );

        let status = engine.get_workflow_status("happy").unwrap();
        assert_eq!(status.status, WorkflowStatus::Completed);
        assert_eq!(status.context_state, ExecutionState::Completed);
        assert_eq!(status.current_index, 3);
        assert_eq!(status.completed_actions, 3);
    }

    #[test]
    fn test_first_failure_halts() {
        let engine = engine();
        let events = record_events(&engine);
        let third = Arc::new(AtomicUsize::new(0));

        let result = engine.execute_workflow(
            vec![ok("a"), failing("b"), counting("c", &third)],
            None,
            Some("halting"),
        );

        assert!(result.completed);
        assert_eq!(result.success, Some(false));
        assert_eq!(result.results.len(), 2);
        assert!(result.results[0].success);
        assert!(!result.results[1].success);
        assert!(result.message.contains("'b'"));
        assert_eq!(third.load(Ordering::SeqCst), 0);

        let status = engine.get_workflow_status("halting").unwrap();
        assert_eq!(status.status, WorkflowStatus::Failed);
        assert_eq!(status.context_state, ExecutionState::Failed);

        let events = events.lock();
        assert_eq!(count(&events, EventType::ActionFailed), 1);
        assert_eq!(events.last(), Some(&EventType::WorkflowFailed));
    }

    #[test]
    fn test_errors_and_panics_fail_the_run() {
        let engine = engine();

        let erroring = action_fn("erroring", |_| Err("socket closed".into()));
        let result = engine.execute_workflow(vec![erroring, ok("after")], None, None);
        assert_eq!(result.results.len(), 1);
        assert!(result.results[0].message.contains("socket closed"));

        let panicking = action_fn("panicking", |_| panic!("unexpected state"));
        let result = engine.execute_workflow(vec![panicking, ok("after")], None, None);
        assert_eq!(result.success, Some(false));
        assert!(result.results[0].message.contains("unexpected state"));
    }

    #[test]
    fn test_outputs_flow_between_actions() {
        let engine = engine();
        let produce = action_fn("produce", |_| {
            Ok(ActionResult::success("produced").with_output("token", json!("abc")))
        });
        let consume = action_fn("consume", |vars| match vars.get("token") {
            Some(token) => Ok(ActionResult::success(format!("got {}", token))),
            None => Ok(ActionResult::failure("token missing")),
        });

        let result = engine.execute_workflow(vec![produce, consume], None, Some("flow"));
        assert!(result.is_success());

        let context = engine.get_workflow_context("flow").unwrap();
        assert_eq!(context.get("token", Value::Null), json!("abc"));
    }

    #[test]
    fn test_failed_action_outputs_are_discarded() {
        let engine = engine();
        let context = ExecutionContext::new();
        let action = action_fn("partial", |_| {
            Ok(ActionResult::failure("half done").with_output("leak", json!(true)))
        });

        let result = engine.execute_action(action.as_ref(), &context);
        assert!(!result.success);
        assert_eq!(context.get("leak", Value::Null), Value::Null);
    }

    #[test]
    fn test_execute_action_with_plain_variables() {
        let engine = engine();
        let mut vars = VariableMap::new();
        vars.insert("n".to_string(), json!(20));

        let double = action_fn("double", |vars| {
            let n = vars.get("n").and_then(Value::as_i64).unwrap_or(0);
            Ok(ActionResult::success("doubled").with_output("n", json!(n * 2)))
        });

        let result = engine.execute_action(double.as_ref(), vars);
        assert_eq!(result.outputs().unwrap()["n"], json!(40));
    }

    #[test]
    fn test_seed_variables_reach_actions() {
        let engine = engine();
        let mut vars = VariableMap::new();
        vars.insert("greeting".to_string(), json!("hello"));

        let check = action_fn("check", |vars| {
            if vars.get("greeting") == Some(&json!("hello")) {
                Ok(ActionResult::success("seen"))
            } else {
                Ok(ActionResult::failure("not seen"))
            }
        });

        let result = engine.execute_workflow(vec![check], Some(vars.into()), None);
        assert!(result.is_success());
    }

    #[test]
    fn test_pause_and_resume_preserve_position() {
        let engine = engine();
        let events = record_events(&engine);
        let first = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(AtomicUsize::new(0));
        let (gate_action, gate) = gated("gate");

        let run_id = engine
            .submit_workflow(
                vec![counting("first", &first), gate_action, counting("last", &last)],
                None,
                Some("pausable"),
            )
            .unwrap();

        gate.wait_entered();
        assert!(engine.pause_workflow(&run_id));
        assert!(!engine.pause_workflow(&run_id));
        gate.open();

        let status = engine.wait_for_workflow(&run_id, WAIT).unwrap();
        assert_eq!(status.status, WorkflowStatus::Paused);
        assert_eq!(status.context_state, ExecutionState::Paused);
        assert_eq!(status.current_index, 2);
        assert_eq!(last.load(Ordering::SeqCst), 0);

        assert!(engine.resume_workflow(&run_id));
        assert!(!engine.resume_workflow(&run_id));

        let status = engine.wait_for_workflow(&run_id, WAIT).unwrap();
        assert_eq!(status.status, WorkflowStatus::Completed);
        assert_eq!(status.current_index, 3);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 1);

        let events = events.lock();
        assert_eq!(count(&events, EventType::WorkflowStarted), 1);
        assert_eq!(count(&events, EventType::WorkflowPaused), 1);
        assert_eq!(count(&events, EventType::WorkflowResumed), 1);
        assert_eq!(count(&events, EventType::ActionStarted), 3);
        assert_eq!(events.last(), Some(&EventType::WorkflowCompleted));
    }

    #[test]
    fn test_resume_before_boundary_continues_same_loop() {
        let engine = engine();
        let (gate_action, gate) = gated("gate");

        let run_id = engine
            .submit_workflow(vec![gate_action, ok("next")], None, None)
            .unwrap();

        gate.wait_entered();
        assert!(engine.pause_workflow(&run_id));
        assert!(engine.resume_workflow(&run_id));
        gate.open();

        let status = engine.wait_for_workflow(&run_id, WAIT).unwrap();
        assert_eq!(status.status, WorkflowStatus::Completed);
        assert_eq!(status.completed_actions, 2);
    }

    #[test]
    fn test_pause_during_last_action_completes() {
        let engine = engine();
        let events = record_events(&engine);
        let (gate_action, gate) = gated("last");

        let run_id = engine
            .submit_workflow(vec![ok("a"), gate_action], None, Some("tail"))
            .unwrap();

        gate.wait_entered();
        assert!(engine.pause_workflow(&run_id));
        gate.open();

        let status = engine.wait_for_workflow(&run_id, WAIT).unwrap();
        assert_eq!(status.status, WorkflowStatus::Completed);
        assert_eq!(status.context_state, ExecutionState::Completed);
        assert_eq!(status.current_index, 2);
        assert!(!engine.resume_workflow(&run_id));

        let events = events.lock();
        assert_eq!(count(&events, EventType::WorkflowPaused), 1);
        assert_eq!(count(&events, EventType::WorkflowResumed), 0);
        assert_eq!(events.last(), Some(&EventType::WorkflowCompleted));
    }

    #[test]
    fn test_concurrent_runs_are_independent() {
        let engine = engine();
        let emit = |owner: &'static str| {
            action_fn("claim", move |_| {
                Ok(ActionResult::success("claimed").with_output("owner", json!(owner)))
            })
        };
        let (gate_a, a) = gated("gate-a");
        let (gate_b, b) = gated("gate-b");

        engine
            .submit_workflow(vec![emit("a"), gate_a, ok("a-rest")], None, Some("left"))
            .unwrap();
        engine
            .submit_workflow(vec![emit("b"), gate_b, ok("b-rest")], None, Some("right"))
            .unwrap();

        // Both runs are inside their gates at the same time
        a.wait_entered();
        b.wait_entered();

        assert!(engine.pause_workflow("left"));
        a.open();
        b.open();

        let right = engine.wait_for_workflow("right", WAIT).unwrap();
        assert_eq!(right.status, WorkflowStatus::Completed);
        assert_eq!(right.completed_actions, 3);

        let left = engine.wait_for_workflow("left", WAIT).unwrap();
        assert_eq!(left.status, WorkflowStatus::Paused);
        assert_eq!(left.current_index, 2);

        let left_context = engine.get_workflow_context("left").unwrap();
        let right_context = engine.get_workflow_context("right").unwrap();
        assert_eq!(left_context.get("owner", Value::Null), json!("a"));
        assert_eq!(right_context.get("owner", Value::Null), json!("b"));

        let left_stats = engine.get_workflow_statistics("left").unwrap();
        let right_stats = engine.get_workflow_statistics("right").unwrap();
        assert_eq!(left_stats.count(EventType::WorkflowPaused), 1);
        assert_eq!(left_stats.outcome, None);
        assert_eq!(left_stats.actions_completed, 2);
        assert_eq!(right_stats.count(EventType::WorkflowPaused), 0);
        assert_eq!(right_stats.outcome, Some(EventType::WorkflowCompleted));
        assert_eq!(right_stats.actions_completed, 3);

        assert!(engine.abort_workflow("left"));
        assert_eq!(
            engine.get_workflow_status("left").unwrap().status,
            WorkflowStatus::Aborted
        );
        assert_eq!(
            engine.get_workflow_status("right").unwrap().status,
            WorkflowStatus::Completed
        );
    }

    #[test]
    fn test_abort_is_terminal() {
        let engine = engine();
        let events = record_events(&engine);
        let never = Arc::new(AtomicUsize::new(0));
        let (gate_action, gate) = gated("gate");

        let run_id = engine
            .submit_workflow(vec![gate_action, counting("never", &never)], None, None)
            .unwrap();

        gate.wait_entered();
        assert!(engine.abort_workflow(&run_id));
        gate.open();

        let status = engine.wait_for_workflow(&run_id, WAIT).unwrap();
        assert_eq!(status.status, WorkflowStatus::Aborted);
        assert_eq!(status.context_state, ExecutionState::Aborted);
        assert_eq!(status.current_index, 1);
        assert_eq!(never.load(Ordering::SeqCst), 0);

        assert!(!engine.pause_workflow(&run_id));
        assert!(!engine.resume_workflow(&run_id));
        assert!(!engine.abort_workflow(&run_id));

        let events = events.lock();
        assert_eq!(count(&events, EventType::WorkflowAborted), 1);
        assert_eq!(count(&events, EventType::WorkflowCompleted), 0);
    }

    #[test]
    fn test_abort_paused_run() {
        let engine = engine();
        let (gate_action, gate) = gated("gate");

        let run_id = engine
            .submit_workflow(vec![gate_action, ok("rest")], None, None)
            .unwrap();
        gate.wait_entered();
        engine.pause_workflow(&run_id);
        gate.open();
        engine.wait_for_workflow(&run_id, WAIT).unwrap();

        assert!(engine.abort_workflow(&run_id));
        let status = engine.get_workflow_status(&run_id).unwrap();
        assert_eq!(status.status, WorkflowStatus::Aborted);
        assert_eq!(status.context_state, ExecutionState::Aborted);
        assert!(!engine.resume_workflow(&run_id));
    }

    #[test]
    fn test_unknown_run_id() {
        let engine = engine();

        assert!(!engine.pause_workflow("missing"));
        assert!(!engine.resume_workflow("missing"));
        assert!(!engine.abort_workflow("missing"));
        assert!(!engine.discard_workflow("missing"));
        assert!(engine.get_workflow_status("missing").is_none());
        assert!(engine.get_workflow_statistics("missing").is_none());
        assert!(engine.wait_for_workflow("missing", WAIT).is_none());
    }

    #[test]
    fn test_rejects_context_that_already_ran() {
        let engine = engine();
        let context = ExecutionContext::new();
        context.transition_to(ExecutionState::Running).unwrap();

        let result = engine.execute_workflow(vec![ok("a")], Some(context.into()), Some("late"));
        assert!(!result.completed);
        assert_eq!(result.success, Some(false));
        assert!(result.message.contains("pending"));
        assert!(engine.get_workflow_status("late").is_none());
    }

    #[test]
    fn test_rejects_active_run_id() {
        let engine = engine();
        let (gate_action, gate) = gated("gate");

        engine
            .submit_workflow(vec![gate_action], None, Some("busy"))
            .unwrap();
        gate.wait_entered();

        let err = engine
            .submit_workflow(vec![ok("other")], None, Some("busy"))
            .unwrap_err();
        assert_eq!(err, EngineError::RunActive("busy".to_string()));

        gate.open();
        engine.wait_for_workflow("busy", WAIT).unwrap();
    }

    #[test]
    fn test_finished_run_id_is_superseded() {
        let engine = engine();
        let first = ExecutionContext::new();

        engine.execute_workflow(vec![ok("a")], Some(first.clone().into()), Some("again"));
        let result = engine.execute_workflow(vec![ok("b"), ok("c")], None, Some("again"));

        assert!(result.is_success());
        assert!(first.is_disposed());
        assert_eq!(engine.get_workflow_status("again").unwrap().total_actions, 2);
    }

    #[test]
    fn test_retention_evicts_oldest_finished() {
        let engine = WorkflowEngine::new(
            EngineConfig::default()
                .with_worker_threads(1)
                .with_max_retained_runs(2),
        );

        for id in ["r0", "r1", "r2", "r3"] {
            engine.execute_workflow(vec![ok("a")], None, Some(id));
        }

        assert_eq!(engine.run_ids(), vec!["r1", "r2", "r3"]);
    }

    #[test]
    fn test_discard_and_prune() {
        let engine = engine();
        engine.execute_workflow(vec![ok("a")], None, Some("one"));
        engine.execute_workflow(vec![ok("a")], None, Some("two"));
        engine.execute_workflow(vec![failing("a")], None, Some("three"));

        let context = engine.get_workflow_context("one").unwrap();
        assert!(engine.discard_workflow("one"));
        assert!(context.is_disposed());
        assert!(engine.get_workflow_status("one").is_none());

        assert_eq!(engine.prune_finished(), 2);
        assert!(engine.run_ids().is_empty());
    }

    #[test]
    fn test_discard_paused_run_aborts_it() {
        let engine = engine();
        let events = record_events(&engine);
        let (gate_action, gate) = gated("gate");

        let run_id = engine
            .submit_workflow(vec![gate_action, ok("rest")], None, None)
            .unwrap();
        gate.wait_entered();

        // Still executing
        assert!(!engine.discard_workflow(&run_id));

        engine.pause_workflow(&run_id);
        gate.open();
        engine.wait_for_workflow(&run_id, WAIT).unwrap();

        assert!(engine.discard_workflow(&run_id));
        assert!(engine.get_workflow_status(&run_id).is_none());
        assert_eq!(count(&events.lock(), EventType::WorkflowAborted), 1);
    }

    #[test]
    fn test_statistics_follow_the_run() {
        let engine = engine();
        engine.execute_workflow(vec![ok("a"), ok("b")], None, Some("measured"));
        engine.execute_workflow(vec![ok("x")], None, Some("other"));

        let stats = engine.get_workflow_statistics("measured").unwrap();
        assert_eq!(stats.count(EventType::WorkflowStarted), 1);
        assert_eq!(stats.actions_started, 2);
        assert_eq!(stats.actions_completed, 2);
        assert_eq!(stats.outcome, Some(EventType::WorkflowCompleted));
        assert!(stats.elapsed_ms.is_some());

        let report = engine.get_workflow_report("measured").unwrap();
        assert!(report.contains("Run: measured"));
    }

    #[test]
    fn test_broken_listener_does_not_break_run() {
        let engine = engine();
        engine.add_listener(Some(EventType::ActionStarted), |_| panic!("observer bug"));

        let result = engine.execute_workflow(vec![ok("a"), ok("b")], None, None);
        assert!(result.is_success());
    }

    #[test]
    fn test_remove_listener() {
        let engine = engine();
        let events = record_events(&engine);
        let id = engine.add_listener(None, |_| {});

        assert!(engine.remove_listener(id));
        assert!(!engine.remove_listener(id));

        engine.execute_workflow(vec![ok("a")], None, None);
        assert_eq!(events.lock().len(), 4);
    }

    #[test]
    fn test_empty_workflow_completes() {
        let engine = engine();
        let result = engine.execute_workflow(Vec::new(), None, None);

        assert!(result.is_success());
        assert!(result.results.is_empty());
    }

    #[test]
    fn test_generated_run_ids_are_unique() {
        let engine = engine();
        let a = engine.execute_workflow(vec![ok("a")], None, None);
        let b = engine.execute_workflow(vec![ok("a")], None, None);

        assert_ne!(a.run_id, b.run_id);
        assert!(a.run_id.starts_with("run-"));
    }

    #[test]
    fn test_shutdown_refuses_new_work() {
        let engine = engine();
        let run_id = engine.submit_workflow(vec![ok("a")], None, None).unwrap();
        engine.shutdown();

        let status = engine.get_workflow_status(&run_id).unwrap();
        assert_eq!(status.status, WorkflowStatus::Completed);
        assert_eq!(
            engine.submit_workflow(vec![ok("b")], None, None),
            Err(EngineError::PoolShutDown)
        );
    }

    #[test]
    fn test_engine_history_tracking_from_config() {
        let engine = WorkflowEngine::new(
            EngineConfig::default()
                .with_worker_threads(1)
                .with_context(crate::execution::ContextOptions::with_history(10)),
        );
        engine.execute_workflow(vec![ok("a")], None, Some("tracked"));

        let context = engine.get_workflow_context("tracked").unwrap();
        let states: Vec<_> = context
            .state_history()
            .iter()
            .map(|change| change.new_state)
            .collect();
        assert_eq!(states, vec![ExecutionState::Running, ExecutionState::Completed]);
    }
}
