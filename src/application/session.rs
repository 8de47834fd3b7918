use crate::domain::models::{
    parse_hhmm, CurrentRun, DayTask, Routine, RunEntry, Section,
};
use crate::domain::sections::assign_section;
use crate::domain::timeline::{
    project_pipeline, timeline_rows, ProjectedWindow, ProjectionInput, RunSpan, TimelineRow,
};
use crate::infrastructure::clock::Clock;
use crate::infrastructure::error::EngineError;
use crate::infrastructure::reminders::ReminderService;
use crate::infrastructure::repository::{ExportBundle, IntervalStore};
use crate::infrastructure::store::KeyValueStore;
use chrono::Utc;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

const BREAK_TITLE: &str = "Break";
const BREAK_COLOR: &str = "#9ca3af";
const DEFAULT_BREAK_MINUTES: i64 = 5;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

/// Execution state guarded by the session's mutex: the LIFO stack of tasks
/// interrupted by starting something else. Deliberately not persisted; it
/// belongs to one working session, like the source it models.
#[derive(Debug, Default)]
struct ExecState {
    paused: Vec<String>,
}

/// Fields for a new ad-hoc task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub planned_minutes: i64,
    pub color: Option<String>,
    pub project: Option<String>,
    pub scheduled_at: Option<String>,
    pub section_id: Option<String>,
    pub url: Option<String>,
    pub flagged: bool,
}

/// Partial update for a day task. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub planned_minutes: Option<i64>,
    pub color: Option<String>,
    pub project: Option<String>,
    pub scheduled_at: Option<String>,
    pub section_id: Option<String>,
    pub url: Option<String>,
    pub flagged: Option<bool>,
}

/// Manual start/end wall-clock times that replace a task's recorded runs.
#[derive(Debug, Clone, Default)]
pub struct ManualTimes {
    pub start_hhmm: Option<String>,
    pub end_hhmm: Option<String>,
}

/// One consistent read of everything the view layer renders.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub date: String,
    pub routines: Vec<Routine>,
    pub day_tasks: Vec<DayTask>,
    pub pipeline: Vec<String>,
    pub runs: Vec<RunEntry>,
    pub done: Vec<String>,
    pub current_run: Option<CurrentRun>,
    pub sections: Vec<Section>,
    pub projects: Vec<String>,
}

/// The single controller callers drive. Owns the execution state machine
/// (one current run, a paused stack), the pipeline, template expansion and
/// the read-side derivations. All primary writes go through the interval
/// store and are awaited before the operation returns; reminder calls are
/// fire-and-forget and never fail an operation.
pub struct Session {
    store: IntervalStore,
    reminders: Arc<dyn ReminderService>,
    clock: Arc<dyn Clock>,
    exec: Mutex<ExecState>,
    log_dir: Option<PathBuf>,
    log_guard: std::sync::Mutex<()>,
}

impl Session {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        reminders: Arc<dyn ReminderService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store: IntervalStore::new(store, Arc::clone(&clock)),
            reminders,
            clock,
            exec: Mutex::new(ExecState::default()),
            log_dir: None,
            log_guard: std::sync::Mutex::new(()),
        }
    }

    /// Enable JSON-line operation logging under the given directory.
    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    pub fn interval_store(&self) -> &IntervalStore {
        &self.store
    }

    fn today(&self) -> String {
        self.clock.today().format("%Y-%m-%d").to_string()
    }

    fn log_info(&self, op: &str, message: &str) {
        self.append_log("info", op, message);
    }

    fn log_error(&self, op: &str, message: &str) {
        self.append_log("error", op, message);
    }

    fn append_log(&self, level: &str, op: &str, message: &str) {
        let Some(log_dir) = &self.log_dir else {
            return;
        };
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = log_dir.join("engine.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "op": op,
            "message": message,
        });
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    /// Best-effort reminder call: failures are logged and discarded, never
    /// surfaced, so a broken notifier cannot block a state transition.
    fn swallow(&self, op: &str, result: Result<(), EngineError>) {
        if let Err(error) = result {
            self.log_error(op, &format!("reminder call failed: {error}"));
        }
    }

    // Execution state machine.

    /// Start running a task. An unknown id is a silent no-op; the already
    /// current id is a true no-op (the running timer is never reset). A
    /// different running task is implicitly stopped: its interval is closed
    /// into the ledger and its id pushed onto the paused stack.
    pub async fn start_task(&self, task_id: &str) -> Result<(), EngineError> {
        let date = self.today();
        let tasks = self.store.day_tasks(&date).await?;
        let Some(task) = tasks.iter().find(|task| task.id == task_id).cloned() else {
            return Ok(());
        };

        let now = self.clock.now_ms();
        {
            let mut exec = self.exec.lock().await;
            if let Some(current) = self.store.current_run().await? {
                if current.task_id == task_id {
                    return Ok(());
                }
                self.store
                    .append_run(&current.task_id, current.start_at, now, None)
                    .await?;
                exec.paused.push(current.task_id);
            }
            self.store
                .set_current_run(Some(&CurrentRun {
                    task_id: task_id.to_string(),
                    start_at: now,
                }))
                .await?;
        }

        self.swallow("start_task", self.reminders.cancel_start(task_id, &date).await);
        self.swallow("start_task", self.reminders.schedule_overdue(&task, now).await);
        self.log_info("start_task", &format!("started task_id={task_id}"));
        Ok(())
    }

    /// Close the current run, mark its task done and return to idle. A
    /// no-op when nothing is running.
    pub async fn stop_task(&self, notes: Option<String>) -> Result<(), EngineError> {
        let date = self.today();
        let stopped = {
            let _exec = self.exec.lock().await;
            let Some(current) = self.store.current_run().await? else {
                return Ok(());
            };
            let now = self.clock.now_ms();
            self.store
                .append_run(&current.task_id, current.start_at, now, notes)
                .await?;
            let mut done = self.store.done(&date).await?;
            if !done.iter().any(|id| id == &current.task_id) {
                done.push(current.task_id.clone());
                self.store.save_done(&date, &done).await?;
            }
            self.store.set_current_run(None).await?;
            current.task_id
        };

        self.swallow("stop_task", self.reminders.cancel_overdue(&stopped, &date).await);
        self.log_info("stop_task", &format!("stopped task_id={stopped}"));
        Ok(())
    }

    /// Pop the most recently interrupted task and start it again. Empty
    /// stack is a no-op; a popped id whose task was deleted in the meantime
    /// is dropped without starting anything.
    pub async fn resume_last_paused(&self) -> Result<(), EngineError> {
        let popped = {
            let mut exec = self.exec.lock().await;
            exec.paused.pop()
        };
        match popped {
            Some(task_id) => self.start_task(&task_id).await,
            None => Ok(()),
        }
    }

    pub async fn paused_stack(&self) -> Vec<String> {
        self.exec.lock().await.paused.clone()
    }

    /// Rotate the current task's id to the tail of the pipeline. Runs, the
    /// done set and the current run itself are untouched.
    pub async fn skip_current(&self) -> Result<(), EngineError> {
        let Some(current) = self.store.current_run().await? else {
            return Ok(());
        };
        let date = self.today();
        let mut pipeline = self.store.pipeline(&date).await?;
        let Some(index) = pipeline.iter().position(|id| id == &current.task_id) else {
            return Ok(());
        };
        let id = pipeline.remove(index);
        pipeline.push(id);
        self.store.save_pipeline(&date, &pipeline).await
    }

    /// Flip done-set membership. Independent of the run state: marking the
    /// running task done does not stop it.
    pub async fn toggle_done(&self, task_id: &str) -> Result<(), EngineError> {
        let date = self.today();
        let mut done = self.store.done(&date).await?;
        match done.iter().position(|id| id == task_id) {
            Some(index) => {
                done.remove(index);
            }
            None => done.push(task_id.to_string()),
        }
        self.store.save_done(&date, &done).await
    }

    /// Delete a day task and everything hanging off it: its runs for the
    /// date, its pipeline slot and its done mark. When the task is the
    /// current run the open interval is discarded without writing a run.
    /// The paused stack is not scrubbed; resume handles the dangle.
    pub async fn delete_action(&self, task_id: &str) -> Result<(), EngineError> {
        {
            let _exec = self.exec.lock().await;
            if let Some(current) = self.store.current_run().await? {
                if current.task_id == task_id {
                    self.store.set_current_run(None).await?;
                }
            }
        }

        let date = self.today();
        self.store.remove_runs_for_task(&date, task_id).await?;

        let tasks = self.store.day_tasks(&date).await?;
        let remaining: Vec<DayTask> = tasks.into_iter().filter(|task| task.id != task_id).collect();
        self.store.save_day_tasks(&date, &remaining).await?;

        let pipeline = self.store.pipeline(&date).await?;
        let pipeline: Vec<String> = pipeline.into_iter().filter(|id| id != task_id).collect();
        self.store.save_pipeline(&date, &pipeline).await?;

        let done = self.store.done(&date).await?;
        let done: Vec<String> = done.into_iter().filter(|id| id != task_id).collect();
        self.store.save_done(&date, &done).await?;

        self.swallow("delete_action", self.reminders.cancel_start(task_id, &date).await);
        self.swallow("delete_action", self.reminders.cancel_overdue(task_id, &date).await);
        self.log_info("delete_action", &format!("deleted task_id={task_id}"));
        Ok(())
    }

    // Pipeline.

    pub async fn set_pipeline(&self, ids: &[String]) -> Result<(), EngineError> {
        let date = self.today();
        self.store.save_pipeline(&date, ids).await
    }

    /// Move an id by a signed offset, bounded to the pipeline.
    pub async fn move_task(&self, task_id: &str, delta: i64) -> Result<(), EngineError> {
        let date = self.today();
        let pipeline = self.store.pipeline(&date).await?;
        let Some(index) = pipeline.iter().position(|id| id == task_id) else {
            return Ok(());
        };
        let target = index as i64 + delta;
        if target < 0 || target >= pipeline.len() as i64 {
            return Ok(());
        }
        self.reinsert(pipeline, index, target as usize, &date).await
    }

    /// Move an id to an absolute index, clamped to the pipeline bounds.
    pub async fn move_task_to(&self, task_id: &str, new_index: usize) -> Result<(), EngineError> {
        let date = self.today();
        let pipeline = self.store.pipeline(&date).await?;
        let Some(index) = pipeline.iter().position(|id| id == task_id) else {
            return Ok(());
        };
        let target = new_index.min(pipeline.len().saturating_sub(1));
        if target == index {
            return Ok(());
        }
        self.reinsert(pipeline, index, target, &date).await
    }

    async fn reinsert(
        &self,
        mut pipeline: Vec<String>,
        from: usize,
        to: usize,
        date: &str,
    ) -> Result<(), EngineError> {
        let id = pipeline.remove(from);
        pipeline.insert(to, id);
        self.store.save_pipeline(date, &pipeline).await
    }

    // Template expansion.

    /// Auto-expansion, gated to run at most once per calendar date: every
    /// routine that is a template or carries a planned start time, admits
    /// today's weekday and has no instance today yet is materialized and
    /// appended to the pipeline. Start/overdue reminders are re-requested
    /// for today regardless of the gate (best-effort). Returns how many
    /// instances the expansion created.
    pub async fn ensure_day_applied(&self) -> Result<usize, EngineError> {
        let date = self.today();
        let mut created_count = 0;

        if !self.store.applied_flag(&date).await? {
            let routines = self.store.routines().await?;
            let mut tasks = self.store.day_tasks(&date).await?;
            let sections = self.store.sections().await?;
            let weekday = self.clock.weekday_index();

            let picks: Vec<Routine> = routines
                .into_iter()
                .filter(|routine| {
                    (routine.is_template || routine.planned_start_at.is_some())
                        && routine.runs_on_weekday(weekday)
                        && !tasks
                            .iter()
                            .any(|task| task.routine_id.as_deref() == Some(routine.id.as_str()))
                })
                .collect();

            if !picks.is_empty() {
                let mut created = Vec::new();
                for (offset, routine) in picks.iter().enumerate() {
                    created.push(self.materialize(routine, &sections, &date, tasks.len() + offset));
                }
                created_count = created.len();
                let mut pipeline = self.store.pipeline(&date).await?;
                pipeline.extend(created.iter().map(|task| task.id.clone()));
                tasks.extend(created);
                self.store.save_day_tasks(&date, &tasks).await?;
                self.store.save_pipeline(&date, &pipeline).await?;
            }
            self.store.set_applied_flag(&date).await?;
            self.log_info(
                "ensure_day_applied",
                &format!("expanded {created_count} routine(s) for {date}"),
            );
        }

        // Reminder rescheduling runs on every call, not just the first.
        let tasks = self.store.day_tasks(&date).await?;
        for task in &tasks {
            if task.scheduled_at.is_some() {
                self.swallow("ensure_day_applied", self.reminders.schedule_start(task).await);
            }
        }
        if let Some(current) = self.store.current_run().await? {
            if let Some(task) = tasks.iter().find(|task| task.id == current.task_id) {
                self.swallow(
                    "ensure_day_applied",
                    self.reminders.schedule_overdue(task, current.start_at).await,
                );
            }
        }
        Ok(created_count)
    }

    /// Manual, repeatable expansion: every template routine is materialized
    /// (no weekday filter, no once-per-day gate, no duplicate check), and
    /// the picked routines' projects are unioned into the global list.
    pub async fn apply_template(&self) -> Result<usize, EngineError> {
        let date = self.today();
        let routines = self.store.routines().await?;
        let picks: Vec<&Routine> = routines.iter().filter(|routine| routine.is_template).collect();
        if picks.is_empty() {
            return Ok(0);
        }

        let mut tasks = self.store.day_tasks(&date).await?;
        let sections = self.store.sections().await?;
        let mut pipeline = self.store.pipeline(&date).await?;
        let mut created = Vec::new();
        for (offset, &routine) in picks.iter().enumerate() {
            created.push(self.materialize(routine, &sections, &date, tasks.len() + offset));
        }
        let created_count = created.len();
        pipeline.extend(created.iter().map(|task| task.id.clone()));
        tasks.extend(created);
        self.store.save_day_tasks(&date, &tasks).await?;
        self.store.save_pipeline(&date, &pipeline).await?;

        let mut projects = self.store.projects().await?;
        for routine in &picks {
            if let Some(project) = &routine.project {
                if !projects.iter().any(|existing| existing == project) {
                    projects.push(project.clone());
                }
            }
        }
        self.store.save_projects(&projects).await?;
        Ok(created_count)
    }

    fn materialize(
        &self,
        routine: &Routine,
        sections: &[Section],
        date: &str,
        order: usize,
    ) -> DayTask {
        DayTask {
            id: next_id("act"),
            routine_id: Some(routine.id.clone()),
            title: routine.title.clone(),
            planned_minutes: routine.planned_minutes,
            color: routine.color.clone(),
            order: order as i64,
            project: routine.project.clone(),
            scheduled_at: routine.planned_start_at.clone(),
            date: date.to_string(),
            section_id: assign_section(sections, routine.planned_start_at.as_deref()),
            url: routine.url.clone(),
            flagged: false,
        }
    }

    // Task and routine CRUD.

    /// Instantiate one routine into today's worklist. Unknown routine ids
    /// are a silent no-op.
    pub async fn add_from_routine(&self, routine_id: &str) -> Result<Option<DayTask>, EngineError> {
        let routines = self.store.routines().await?;
        let Some(routine) = routines.iter().find(|routine| routine.id == routine_id) else {
            return Ok(None);
        };

        let date = self.today();
        let mut tasks = self.store.day_tasks(&date).await?;
        let sections = self.store.sections().await?;
        let task = self.materialize(routine, &sections, &date, tasks.len());
        tasks.push(task.clone());
        self.store.save_day_tasks(&date, &tasks).await?;

        let mut pipeline = self.store.pipeline(&date).await?;
        pipeline.push(task.id.clone());
        self.store.save_pipeline(&date, &pipeline).await?;

        if task.scheduled_at.is_some() {
            self.swallow("add_from_routine", self.reminders.schedule_start(&task).await);
        }
        if let Some(project) = &routine.project {
            self.add_project_if_missing(project).await?;
        }
        Ok(Some(task))
    }

    pub async fn add_adhoc_task(&self, new_task: NewTask) -> Result<DayTask, EngineError> {
        let title = new_task.title.trim().to_string();
        if title.is_empty() {
            return Err(EngineError::Validation("task title must not be empty".to_string()));
        }
        if let Some(scheduled_at) = &new_task.scheduled_at {
            if parse_hhmm(scheduled_at).is_none() {
                return Err(EngineError::Validation("scheduled time must be HH:MM".to_string()));
            }
        }

        let date = self.today();
        let mut tasks = self.store.day_tasks(&date).await?;
        let sections = self.store.sections().await?;
        let section_id = new_task
            .section_id
            .clone()
            .or_else(|| assign_section(&sections, new_task.scheduled_at.as_deref()));
        let task = DayTask {
            id: next_id("act"),
            routine_id: None,
            title,
            planned_minutes: new_task.planned_minutes,
            color: new_task.color,
            order: tasks.len() as i64,
            project: new_task.project.clone(),
            scheduled_at: new_task.scheduled_at,
            date: date.clone(),
            section_id,
            url: new_task.url,
            flagged: new_task.flagged,
        };
        tasks.push(task.clone());
        self.store.save_day_tasks(&date, &tasks).await?;

        let mut pipeline = self.store.pipeline(&date).await?;
        pipeline.push(task.id.clone());
        self.store.save_pipeline(&date, &pipeline).await?;

        if task.scheduled_at.is_some() {
            self.swallow("add_adhoc_task", self.reminders.schedule_start(&task).await);
        }
        if let Some(project) = &new_task.project {
            self.add_project_if_missing(project).await?;
        }
        Ok(task)
    }

    /// Add a short break task and start it immediately.
    pub async fn start_break(&self, minutes: Option<i64>) -> Result<(), EngineError> {
        let minutes = minutes.unwrap_or(DEFAULT_BREAK_MINUTES);
        let task = self
            .add_adhoc_task(NewTask {
                title: BREAK_TITLE.to_string(),
                planned_minutes: minutes,
                color: Some(BREAK_COLOR.to_string()),
                ..NewTask::default()
            })
            .await?;
        self.start_task(&task.id).await?;
        self.swallow("start_break", self.reminders.schedule_break_end(minutes).await);
        Ok(())
    }

    /// Patch a day task. A changed scheduled time re-runs section
    /// auto-assignment (unless the patch pins a section) and re-requests the
    /// start reminder; `manual_times` replaces the task's recorded runs for
    /// its date with one synthetic entry.
    pub async fn update_action(
        &self,
        task_id: &str,
        patch: TaskPatch,
        manual_times: Option<ManualTimes>,
    ) -> Result<(), EngineError> {
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(EngineError::Validation("task title must not be empty".to_string()));
            }
        }
        if let Some(scheduled_at) = &patch.scheduled_at {
            if parse_hhmm(scheduled_at).is_none() {
                return Err(EngineError::Validation("scheduled time must be HH:MM".to_string()));
            }
        }
        // Parsed up front so a malformed manual time aborts before any write.
        let manual_minutes = match &manual_times {
            Some(manual) => Some(Self::parse_manual_minutes(manual)?),
            None => None,
        };

        let date = self.today();
        let mut tasks = self.store.day_tasks(&date).await?;
        let sections = self.store.sections().await?;
        let Some(task) = tasks.iter_mut().find(|task| task.id == task_id) else {
            return Ok(());
        };

        let schedule_changed = patch.scheduled_at.is_some()
            && patch.scheduled_at != task.scheduled_at;
        if let Some(title) = patch.title {
            task.title = title.trim().to_string();
        }
        if let Some(planned_minutes) = patch.planned_minutes {
            task.planned_minutes = planned_minutes;
        }
        if let Some(color) = patch.color {
            task.color = Some(color);
        }
        if let Some(project) = &patch.project {
            task.project = Some(project.clone());
        }
        if let Some(scheduled_at) = patch.scheduled_at {
            task.scheduled_at = Some(scheduled_at);
        }
        if let Some(section_id) = patch.section_id {
            task.section_id = Some(section_id);
        } else if schedule_changed {
            task.section_id = assign_section(&sections, task.scheduled_at.as_deref());
        }
        if let Some(url) = patch.url {
            task.url = Some(url);
        }
        if let Some(flagged) = patch.flagged {
            task.flagged = flagged;
        }
        let updated = task.clone();
        self.store.save_day_tasks(&date, &tasks).await?;

        if let Some(project) = &patch.project {
            self.add_project_if_missing(project).await?;
        }
        if schedule_changed {
            self.swallow("update_action", self.reminders.cancel_start(task_id, &date).await);
            if updated.scheduled_at.is_some() {
                self.swallow("update_action", self.reminders.schedule_start(&updated).await);
            }
        }

        if let Some((start_min, end_min)) = manual_minutes {
            if start_min.is_some() || end_min.is_some() {
                self.replace_manual_runs(&updated, start_min, end_min).await?;
            }
        }
        Ok(())
    }

    fn parse_manual_minutes(
        manual: &ManualTimes,
    ) -> Result<(Option<u32>, Option<u32>), EngineError> {
        let parse = |value: &Option<String>, label: &str| -> Result<Option<u32>, EngineError> {
            match value {
                Some(text) => parse_hhmm(text)
                    .map(Some)
                    .ok_or_else(|| EngineError::Validation(format!("{label} time must be HH:MM"))),
                None => Ok(None),
            }
        };
        Ok((
            parse(&manual.start_hhmm, "manual start")?,
            parse(&manual.end_hhmm, "manual end")?,
        ))
    }

    async fn replace_manual_runs(
        &self,
        task: &DayTask,
        start_min: Option<u32>,
        end_min: Option<u32>,
    ) -> Result<(), EngineError> {
        let date = &task.date;
        let runs = self.store.runs(date).await?;
        let mut filtered: Vec<RunEntry> =
            runs.into_iter().filter(|run| run.task_id != task.id).collect();

        if let (Some(start_min), Some(end_min)) = (start_min, end_min) {
            if end_min >= start_min {
                let day = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .map_err(|_| EngineError::Validation("task date must be YYYY-MM-DD".to_string()))?;
                let start_at = self.clock.date_time_ms(day, start_min);
                let end_at = self.clock.date_time_ms(day, end_min);
                filtered.push(RunEntry {
                    id: RunEntry::segment_id(&task.id, start_at),
                    task_id: task.id.clone(),
                    start_at,
                    end_at,
                    notes: None,
                });
            }
        }
        self.store.save_runs(date, &filtered).await
    }

    pub async fn save_routines(&self, list: Vec<Routine>) -> Result<(), EngineError> {
        for routine in &list {
            routine.validate().map_err(EngineError::Validation)?;
        }
        self.store.save_routines(&list).await
    }

    pub async fn set_routine_template(&self, routine_id: &str, on: bool) -> Result<(), EngineError> {
        let mut routines = self.store.routines().await?;
        for routine in &mut routines {
            if routine.id == routine_id {
                routine.is_template = on;
            }
        }
        self.store.save_routines(&routines).await
    }

    pub async fn save_sections(&self, list: Vec<Section>) -> Result<(), EngineError> {
        for section in &list {
            section.validate().map_err(EngineError::Validation)?;
        }
        self.store.save_sections(&list).await
    }

    pub async fn add_project_if_missing(&self, name: &str) -> Result<(), EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(());
        }
        let mut projects = self.store.projects().await?;
        if projects.iter().any(|existing| existing == name) {
            return Ok(());
        }
        projects.push(name.to_string());
        self.store.save_projects(&projects).await
    }

    // Read side.

    pub async fn snapshot(&self) -> Result<Snapshot, EngineError> {
        let date = self.today();
        Ok(Snapshot {
            routines: self.store.routines().await?,
            day_tasks: self.store.day_tasks(&date).await?,
            pipeline: self.store.pipeline(&date).await?,
            runs: self.store.runs(&date).await?,
            done: self.store.done(&date).await?,
            current_run: self.store.current_run().await?,
            sections: self.store.sections().await?,
            projects: self.store.projects().await?,
            date,
        })
    }

    /// Rounded minutes already recorded today, summed per task id.
    pub async fn actual_minutes_by_task(&self) -> Result<HashMap<String, i64>, EngineError> {
        let date = self.today();
        let mut minutes: HashMap<String, i64> = HashMap::new();
        for run in self.store.runs(&date).await? {
            *minutes.entry(run.task_id.clone()).or_insert(0) += run.minutes();
        }
        Ok(minutes)
    }

    fn run_spans(&self, runs: &[RunEntry]) -> Vec<RunSpan> {
        runs.iter()
            .map(|run| RunSpan {
                task_id: run.task_id.clone(),
                start_at: run.start_at,
                start_min: self.clock.minute_of_day(run.start_at),
                end_min: self.clock.minute_of_day(run.end_at),
                minutes: run.minutes(),
            })
            .collect()
    }

    /// Expected start/end windows for today's not-yet-finished pipeline.
    pub async fn projection(&self) -> Result<Vec<ProjectedWindow>, EngineError> {
        let date = self.today();
        let tasks = self.store.day_tasks(&date).await?;
        let pipeline = self.store.pipeline(&date).await?;
        let runs = self.store.runs(&date).await?;
        let done = self.store.done(&date).await?;
        let current = self.store.current_run().await?;
        let spans = self.run_spans(&runs);
        Ok(project_pipeline(ProjectionInput {
            pipeline: &pipeline,
            tasks: &tasks,
            runs: &spans,
            done: &done,
            current_task_id: current.as_ref().map(|run| run.task_id.as_str()),
            now_minute: self.clock.minute_of_day(self.clock.now_ms()),
        }))
    }

    /// Display timeline for today, grouped by section.
    pub async fn timeline(&self) -> Result<Vec<TimelineRow>, EngineError> {
        let date = self.today();
        let tasks = self.store.day_tasks(&date).await?;
        let pipeline = self.store.pipeline(&date).await?;
        let runs = self.store.runs(&date).await?;
        let done = self.store.done(&date).await?;
        let current = self.store.current_run().await?;
        let sections = self.store.sections().await?;
        let spans = self.run_spans(&runs);
        Ok(timeline_rows(
            ProjectionInput {
                pipeline: &pipeline,
                tasks: &tasks,
                runs: &spans,
                done: &done,
                current_task_id: current.as_ref().map(|run| run.task_id.as_str()),
                now_minute: self.clock.minute_of_day(self.clock.now_ms()),
            },
            &sections,
        ))
    }

    // Export / import.

    pub async fn export_all(&self) -> Result<ExportBundle, EngineError> {
        self.store.export_all().await
    }

    pub async fn import_all(&self, bundle: &ExportBundle) -> Result<(), EngineError> {
        self.store.import_all(bundle).await
    }
}
