//! Workflow Statistics
//!
//! Passive event sink that aggregates counts and timings for one run.
//! It only ever reads events; nothing flows back into the engine.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::events::{Event, EventType};

/// Start/finish record for one action of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionTiming {
    pub index: usize,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub success: Option<bool>,
}

impl ActionTiming {
    /// Time between start and finish, if finished.
    pub fn duration(&self) -> Option<Duration> {
        self.finished_at.map(|end| to_std(end - self.started_at))
    }
}

/// Event aggregates for a single run id.
#[derive(Debug, Clone)]
pub struct WorkflowStatistics {
    run_id: String,
    counts: BTreeMap<EventType, usize>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    outcome: Option<EventType>,
    paused_since: Option<DateTime<Utc>>,
    /// Resume seen before its pause; listeners may observe the two reordered
    early_resume: Option<DateTime<Utc>>,
    paused_total: Duration,
    actions: BTreeMap<usize, ActionTiming>,
}

impl WorkflowStatistics {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            counts: BTreeMap::new(),
            started_at: None,
            finished_at: None,
            outcome: None,
            paused_since: None,
            early_resume: None,
            paused_total: Duration::ZERO,
            actions: BTreeMap::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Folds one event into the aggregates. Events of other runs are ignored.
    pub fn record_event(&mut self, event: &dyn Event) {
        if event.run_id() != self.run_id {
            return;
        }

        let event_type = event.event_type();
        let at = event.timestamp();
        *self.counts.entry(event_type).or_insert(0) += 1;

        match event_type {
            EventType::WorkflowStarted => {
                self.started_at.get_or_insert(at);
            }
            EventType::WorkflowPaused => {
                if let Some(resumed_at) = self.early_resume.take() {
                    self.paused_total += to_std(resumed_at - at);
                } else if self.outcome.is_none() {
                    self.paused_since.get_or_insert(at);
                }
            }
            EventType::WorkflowResumed => {
                if self.paused_since.is_some() {
                    self.close_pause(at);
                } else {
                    self.early_resume = Some(at);
                }
            }
            EventType::WorkflowCompleted | EventType::WorkflowFailed | EventType::WorkflowAborted => {
                self.close_pause(at);
                self.finished_at = Some(at);
                self.outcome = Some(event_type);
            }
            EventType::ActionStarted => {
                if let Some(action) = event.as_action_event() {
                    self.actions.insert(
                        action.action_index,
                        ActionTiming {
                            index: action.action_index,
                            name: action.action_name.clone(),
                            started_at: at,
                            finished_at: None,
                            success: None,
                        },
                    );
                }
            }
            EventType::ActionCompleted | EventType::ActionFailed => {
                if let Some(action) = event.as_action_event() {
                    if let Some(timing) = self.actions.get_mut(&action.action_index) {
                        timing.finished_at = Some(at);
                        timing.success = Some(event_type == EventType::ActionCompleted);
                    }
                }
            }
        }
    }

    fn close_pause(&mut self, at: DateTime<Utc>) {
        if let Some(since) = self.paused_since.take() {
            self.paused_total += to_std(at - since);
        }
    }

    /// Number of events of `event_type` seen so far.
    pub fn count(&self, event_type: EventType) -> usize {
        self.counts.get(&event_type).copied().unwrap_or(0)
    }

    pub fn event_counts(&self) -> &BTreeMap<EventType, usize> {
        &self.counts
    }

    pub fn total_events(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Terminal event type, once the run has ended.
    pub fn outcome(&self) -> Option<EventType> {
        self.outcome
    }

    /// Wall time between the start and terminal events.
    pub fn elapsed(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(to_std(end - start)),
            _ => None,
        }
    }

    /// Time spent paused, including an open pause up to now.
    pub fn paused_time(&self) -> Duration {
        match self.paused_since {
            Some(since) => self.paused_total + to_std(Utc::now() - since),
            None => self.paused_total,
        }
    }

    /// Action timings ordered by index.
    pub fn action_timings(&self) -> impl Iterator<Item = &ActionTiming> {
        self.actions.values()
    }

    /// Durations of finished actions in milliseconds, keyed by index.
    pub fn action_durations(&self) -> BTreeMap<usize, u64> {
        self.actions
            .iter()
            .filter_map(|(index, timing)| timing.duration().map(|d| (*index, millis(d))))
            .collect()
    }

    /// ASCII chart of when each action ran relative to the run.
    pub fn timeline_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let start = match self.started_at {
            Some(start) => start,
            None => return output,
        };
        let end = self.finished_at.unwrap_or_else(Utc::now);
        let total = (end - start).num_milliseconds();
        if total <= 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total as f64;

        for timing in self.actions.values() {
            let finished = match timing.finished_at {
                Some(finished) => finished,
                None => continue,
            };
            let offset = (timing.started_at - start).num_milliseconds().max(0);
            let duration = (finished - timing.started_at).num_milliseconds().max(0);

            let mut bar = " ".repeat((offset as f64 * scale) as usize);
            bar.push_str(&"#".repeat(((duration as f64 * scale).max(1.0)) as usize));

            output.push_str(&format!(
                "{:12} |{}| ({} ms)\n",
                truncate(&timing.name, 12),
                bar,
                duration
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total));
        output
    }

    /// Multi-line human readable summary.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("Run: {}", self.run_id)];

        lines.push(format!(
            "Actions: {} started, {} completed, {} failed",
            self.count(EventType::ActionStarted),
            self.count(EventType::ActionCompleted),
            self.count(EventType::ActionFailed)
        ));

        let pauses = self.count(EventType::WorkflowPaused);
        if pauses > 0 {
            lines.push(format!(
                "Paused: {} time(s), {:.2?} total",
                pauses,
                self.paused_time()
            ));
        }

        match (self.outcome, self.elapsed()) {
            (Some(outcome), Some(elapsed)) => {
                lines.push(format!("Outcome: {} after {:.2?}", outcome, elapsed))
            }
            (Some(outcome), None) => lines.push(format!("Outcome: {}", outcome)),
            _ => lines.push("Outcome: in progress".to_string()),
        }

        lines.join("\n")
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            run_id: self.run_id.clone(),
            event_counts: self.counts.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            outcome: self.outcome,
            elapsed_ms: self.elapsed().map(millis),
            paused_ms: millis(self.paused_time()),
            actions_started: self.count(EventType::ActionStarted),
            actions_completed: self.count(EventType::ActionCompleted),
            actions_failed: self.count(EventType::ActionFailed),
            action_durations_ms: self.action_durations(),
        }
    }
}

/// Point-in-time copy of a run's statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    pub run_id: String,
    pub event_counts: BTreeMap<EventType, usize>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<EventType>,
    pub elapsed_ms: Option<u64>,
    pub paused_ms: u64,
    pub actions_started: usize,
    pub actions_completed: usize,
    pub actions_failed: usize,
    pub action_durations_ms: BTreeMap<usize, u64>,
}

impl StatisticsSnapshot {
    pub fn count(&self, event_type: EventType) -> usize {
        self.event_counts.get(&event_type).copied().unwrap_or(0)
    }
}

fn to_std(delta: chrono::Duration) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Truncates a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
