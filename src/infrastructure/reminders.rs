use crate::domain::models::DayTask;
use crate::infrastructure::error::EngineError;
use async_trait::async_trait;
use std::sync::Mutex;

/// External notification collaborator. Every call is best-effort: the
/// session swallows errors so a failed reminder can never roll back or block
/// an execution-state transition.
#[async_trait]
pub trait ReminderService: Send + Sync {
    async fn schedule_start(&self, task: &DayTask) -> Result<(), EngineError>;
    async fn cancel_start(&self, task_id: &str, date: &str) -> Result<(), EngineError>;
    async fn schedule_overdue(&self, task: &DayTask, start_at_ms: i64) -> Result<(), EngineError>;
    async fn cancel_overdue(&self, task_id: &str, date: &str) -> Result<(), EngineError>;
    async fn schedule_break_end(&self, minutes: i64) -> Result<(), EngineError>;
}

/// Default collaborator for embedders without a notification surface.
#[derive(Debug, Default)]
pub struct NoopReminders;

#[async_trait]
impl ReminderService for NoopReminders {
    async fn schedule_start(&self, _task: &DayTask) -> Result<(), EngineError> {
        Ok(())
    }

    async fn cancel_start(&self, _task_id: &str, _date: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn schedule_overdue(&self, _task: &DayTask, _start_at_ms: i64) -> Result<(), EngineError> {
        Ok(())
    }

    async fn cancel_overdue(&self, _task_id: &str, _date: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn schedule_break_end(&self, _minutes: i64) -> Result<(), EngineError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderCall {
    ScheduleStart { task_id: String },
    CancelStart { task_id: String, date: String },
    ScheduleOverdue { task_id: String, start_at_ms: i64 },
    CancelOverdue { task_id: String, date: String },
    ScheduleBreakEnd { minutes: i64 },
}

/// Records every reminder request; embedders that drive their own
/// notification pipeline read the log, and the engine's tests assert on it.
#[derive(Debug, Default)]
pub struct RecordingReminders {
    calls: Mutex<Vec<ReminderCall>>,
}

impl RecordingReminders {
    pub fn calls(&self) -> Vec<ReminderCall> {
        self.calls.lock().expect("reminder log lock poisoned").clone()
    }

    pub fn clear(&self) {
        self.calls.lock().expect("reminder log lock poisoned").clear();
    }

    fn record(&self, call: ReminderCall) -> Result<(), EngineError> {
        self.calls
            .lock()
            .map_err(|error| EngineError::Storage(format!("reminder log lock poisoned: {error}")))?
            .push(call);
        Ok(())
    }
}

#[async_trait]
impl ReminderService for RecordingReminders {
    async fn schedule_start(&self, task: &DayTask) -> Result<(), EngineError> {
        self.record(ReminderCall::ScheduleStart {
            task_id: task.id.clone(),
        })
    }

    async fn cancel_start(&self, task_id: &str, date: &str) -> Result<(), EngineError> {
        self.record(ReminderCall::CancelStart {
            task_id: task_id.to_string(),
            date: date.to_string(),
        })
    }

    async fn schedule_overdue(&self, task: &DayTask, start_at_ms: i64) -> Result<(), EngineError> {
        self.record(ReminderCall::ScheduleOverdue {
            task_id: task.id.clone(),
            start_at_ms,
        })
    }

    async fn cancel_overdue(&self, task_id: &str, date: &str) -> Result<(), EngineError> {
        self.record(ReminderCall::CancelOverdue {
            task_id: task_id.to_string(),
            date: date.to_string(),
        })
    }

    async fn schedule_break_end(&self, minutes: i64) -> Result<(), EngineError> {
        self.record(ReminderCall::ScheduleBreakEnd { minutes })
    }
}
