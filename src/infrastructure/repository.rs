use crate::domain::models::{
    CurrentRun, DayAggregate, DayTask, ProjectMinutes, Routine, RunEntry, Section,
    DEFAULT_PROJECT_BUCKET,
};
use crate::infrastructure::clock::Clock;
use crate::infrastructure::error::EngineError;
use crate::infrastructure::store::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const ROUTINES_KEY: &str = "routines:v1";
const SECTIONS_KEY: &str = "sections:v1";
const PROJECTS_KEY: &str = "projects:v1";
const CURRENT_RUN_KEY: &str = "currentRun:v1";

/// Bundle version tag; import rejects anything else.
pub const BUNDLE_VERSION: &str = "dayflow:1";

/// Every key family the engine owns. Export collects these, import replaces
/// exactly these and nothing else.
const EXPORT_PREFIXES: [&str; 10] = [
    ROUTINES_KEY,
    SECTIONS_KEY,
    PROJECTS_KEY,
    CURRENT_RUN_KEY,
    "dayTasks:",
    "pipeline:",
    "runs:",
    "done:",
    "agg:",
    "applied:",
];

fn day_tasks_key(date: &str) -> String {
    format!("dayTasks:{date}")
}

fn pipeline_key(date: &str) -> String {
    format!("pipeline:{date}")
}

fn runs_key(date: &str) -> String {
    format!("runs:{date}")
}

fn done_key(date: &str) -> String {
    format!("done:{date}")
}

fn agg_key(date: &str) -> String {
    format!("agg:{date}")
}

fn applied_key(date: &str) -> String {
    format!("applied:{date}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportBundle {
    pub version: String,
    pub data: BTreeMap<String, serde_json::Value>,
}

/// Typed access to the per-day collections and global singletons the engine
/// persists. Pure data access; policy lives in the session. The run-ledger
/// append is the one exception: splitting on midnights is a storage-shape
/// concern, because a persisted entry must never span two calendar days.
#[derive(Clone)]
pub struct IntervalStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl IntervalStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    async fn get_json<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, EngineError> {
        match self.store.get(key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(T::default()),
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), EngineError> {
        self.store.set(key, serde_json::to_string(value)?).await
    }

    // Global singletons.

    pub async fn routines(&self) -> Result<Vec<Routine>, EngineError> {
        self.get_json(ROUTINES_KEY).await
    }

    pub async fn save_routines(&self, list: &[Routine]) -> Result<(), EngineError> {
        self.set_json(ROUTINES_KEY, &list).await
    }

    pub async fn sections(&self) -> Result<Vec<Section>, EngineError> {
        self.get_json(SECTIONS_KEY).await
    }

    pub async fn save_sections(&self, list: &[Section]) -> Result<(), EngineError> {
        self.set_json(SECTIONS_KEY, &list).await
    }

    pub async fn projects(&self) -> Result<Vec<String>, EngineError> {
        self.get_json(PROJECTS_KEY).await
    }

    pub async fn save_projects(&self, list: &[String]) -> Result<(), EngineError> {
        self.set_json(PROJECTS_KEY, &list).await
    }

    pub async fn current_run(&self) -> Result<Option<CurrentRun>, EngineError> {
        self.get_json(CURRENT_RUN_KEY).await
    }

    pub async fn set_current_run(&self, run: Option<&CurrentRun>) -> Result<(), EngineError> {
        match run {
            Some(run) => self.set_json(CURRENT_RUN_KEY, run).await,
            None => self.store.remove(CURRENT_RUN_KEY).await,
        }
    }

    // Per-day collections.

    pub async fn day_tasks(&self, date: &str) -> Result<Vec<DayTask>, EngineError> {
        self.get_json(&day_tasks_key(date)).await
    }

    /// Persist the day's task list and eagerly recompute its aggregate.
    pub async fn save_day_tasks(&self, date: &str, list: &[DayTask]) -> Result<(), EngineError> {
        self.set_json(&day_tasks_key(date), &list).await?;
        self.recompute_day_agg(date).await
    }

    pub async fn pipeline(&self, date: &str) -> Result<Vec<String>, EngineError> {
        self.get_json(&pipeline_key(date)).await
    }

    pub async fn save_pipeline(&self, date: &str, order: &[String]) -> Result<(), EngineError> {
        self.set_json(&pipeline_key(date), &order).await
    }

    pub async fn runs(&self, date: &str) -> Result<Vec<RunEntry>, EngineError> {
        self.get_json(&runs_key(date)).await
    }

    pub async fn save_runs(&self, date: &str, list: &[RunEntry]) -> Result<(), EngineError> {
        self.set_json(&runs_key(date), &list).await?;
        self.recompute_day_agg(date).await
    }

    pub async fn done(&self, date: &str) -> Result<Vec<String>, EngineError> {
        self.get_json(&done_key(date)).await
    }

    pub async fn save_done(&self, date: &str, ids: &[String]) -> Result<(), EngineError> {
        self.set_json(&done_key(date), &ids).await
    }

    pub async fn day_agg(&self, date: &str) -> Result<DayAggregate, EngineError> {
        self.get_json(&agg_key(date)).await
    }

    pub async fn applied_flag(&self, date: &str) -> Result<bool, EngineError> {
        self.get_json(&applied_key(date)).await
    }

    pub async fn set_applied_flag(&self, date: &str) -> Result<(), EngineError> {
        self.set_json(&applied_key(date), &true).await
    }

    // Run ledger.

    /// Append a closed interval, splitting on local midnights so each
    /// persisted segment belongs to exactly one calendar day. Notes attach
    /// to the final segment only. Inverted intervals are a defensive no-op.
    pub async fn append_run(
        &self,
        task_id: &str,
        start_at: i64,
        end_at: i64,
        notes: Option<String>,
    ) -> Result<(), EngineError> {
        if start_at >= end_at {
            return Ok(());
        }

        let mut segments = Vec::new();
        let mut seg_start = start_at;
        while seg_start < end_at {
            let next_midnight = self.clock.next_midnight(seg_start);
            let seg_end = end_at.min(next_midnight);
            if seg_end <= seg_start {
                break;
            }
            let date = self.clock.date_of(seg_start).format("%Y-%m-%d").to_string();
            segments.push((seg_start, seg_end, date));
            seg_start = seg_end;
        }

        let last_index = segments.len().saturating_sub(1);
        for (index, (seg_start, seg_end, date)) in segments.into_iter().enumerate() {
            let entry = RunEntry {
                id: RunEntry::segment_id(task_id, seg_start),
                task_id: task_id.to_string(),
                start_at: seg_start,
                end_at: seg_end,
                notes: if index == last_index { notes.clone() } else { None },
            };
            let mut list = self.runs(&date).await?;
            list.push(entry);
            self.save_runs(&date, &list).await?;
        }
        Ok(())
    }

    pub async fn remove_runs_for_task(&self, date: &str, task_id: &str) -> Result<(), EngineError> {
        let list = self.runs(date).await?;
        let filtered: Vec<RunEntry> = list
            .into_iter()
            .filter(|run| run.task_id != task_id)
            .collect();
        self.save_runs(date, &filtered).await
    }

    /// Rebuild the day's per-project aggregate: planned minutes from the
    /// task list, actual minutes from the run log resolved through that
    /// day's tasks. Dangling task references fall into the default bucket.
    pub async fn recompute_day_agg(&self, date: &str) -> Result<(), EngineError> {
        let tasks = self.day_tasks(date).await?;
        let runs = self.runs(date).await?;

        let project_of_task: HashMap<&str, &str> = tasks
            .iter()
            .map(|task| (task.id.as_str(), task.project_bucket()))
            .collect();

        let mut map: DayAggregate = BTreeMap::new();
        for task in &tasks {
            let bucket = map.entry(task.project_bucket().to_string()).or_insert_with(ProjectMinutes::default);
            bucket.planned += task.planned();
        }
        for run in &runs {
            let project = project_of_task
                .get(run.task_id.as_str())
                .copied()
                .unwrap_or(DEFAULT_PROJECT_BUCKET);
            let bucket = map.entry(project.to_string()).or_insert_with(ProjectMinutes::default);
            bucket.actual += run.minutes();
        }
        self.set_json(&agg_key(date), &map).await
    }

    // Export / import.

    fn is_engine_key(key: &str) -> bool {
        EXPORT_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
    }

    pub async fn export_all(&self) -> Result<ExportBundle, EngineError> {
        let mut data = BTreeMap::new();
        for key in self.store.keys().await? {
            if !Self::is_engine_key(&key) {
                continue;
            }
            if let Some(raw) = self.store.get(&key).await? {
                let value = serde_json::from_str(&raw)
                    .unwrap_or_else(|_| serde_json::Value::String(raw));
                data.insert(key, value);
            }
        }
        Ok(ExportBundle {
            version: BUNDLE_VERSION.to_string(),
            data,
        })
    }

    /// Full replace: every engine key is removed, then the bundle's entries
    /// are written. Rejecting a foreign version tag happens before any
    /// deletion, so a failed import leaves existing state untouched.
    pub async fn import_all(&self, bundle: &ExportBundle) -> Result<(), EngineError> {
        if bundle.version != BUNDLE_VERSION {
            return Err(EngineError::Validation("invalid bundle".to_string()));
        }
        for key in self.store.keys().await? {
            if Self::is_engine_key(&key) {
                self.store.remove(&key).await?;
            }
        }
        for (key, value) in &bundle.data {
            self.store.set(key, serde_json::to_string(value)?).await?;
        }
        Ok(())
    }
}
