use crate::domain::models::{parse_hhmm, DayTask, Section};
use crate::domain::sections::find_section_for_minute;
use std::collections::{HashMap, HashSet};

/// A closed run interval reduced to wall-clock minutes, as the projection
/// consumes it. Built by the caller from the stored entries and a clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpan {
    pub task_id: String,
    pub start_at: i64,
    pub start_min: u32,
    pub end_min: u32,
    pub minutes: i64,
}

/// Expected and shown window for one not-yet-finished pipeline task, in
/// minutes of day. Shown values echo actuals once any exist; expected values
/// are the pure planned chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedWindow {
    pub task_id: String,
    pub start_expected: u32,
    pub end_expected: u32,
    pub start_shown: u32,
    pub end_shown: u32,
}

/// Planned minutes as a minute-of-day operand; values beyond the `u32`
/// range clamp instead of truncating in the cast.
fn planned_minutes_u32(task: &DayTask) -> u32 {
    u32::try_from(task.planned()).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy)]
pub struct ProjectionInput<'a> {
    pub pipeline: &'a [String],
    pub tasks: &'a [DayTask],
    pub runs: &'a [RunSpan],
    pub done: &'a [String],
    pub current_task_id: Option<&'a str>,
    pub now_minute: u32,
}

/// Chain expected start/end windows over the pipeline, excluding done tasks
/// and the currently running one. Explicit scheduled times act as floors;
/// actual overruns push every later task out exactly once via the
/// `max(end_expected, end_shown)` cursor.
pub fn project_pipeline(input: ProjectionInput<'_>) -> Vec<ProjectedWindow> {
    let task_map: HashMap<&str, &DayTask> =
        input.tasks.iter().map(|task| (task.id.as_str(), task)).collect();
    let done: HashSet<&str> = input.done.iter().map(String::as_str).collect();

    let mut spans_by_task: HashMap<&str, Vec<&RunSpan>> = HashMap::new();
    for span in input.runs {
        spans_by_task.entry(span.task_id.as_str()).or_default().push(span);
    }
    for spans in spans_by_task.values_mut() {
        spans.sort_by_key(|span| span.start_at);
    }

    let mut windows = Vec::new();
    let mut prev_end: u32 = 0;
    for id in input.pipeline {
        let Some(task) = task_map.get(id.as_str()) else {
            continue;
        };
        if done.contains(id.as_str()) {
            continue;
        }
        if input.current_task_id == Some(id.as_str()) {
            continue;
        }

        let scheduled = task.scheduled_at.as_deref().and_then(parse_hhmm);
        let start_expected = prev_end.max(scheduled.unwrap_or(prev_end));
        let end_expected = start_expected.saturating_add(planned_minutes_u32(task));

        let spans = spans_by_task.get(id.as_str());
        let first = spans.and_then(|spans| spans.first());
        let last = spans.and_then(|spans| spans.last());
        let start_shown = first.map_or(start_expected, |span| span.start_min);
        let end_shown = last.map_or(end_expected, |span| span.end_min);

        windows.push(ProjectedWindow {
            task_id: id.clone(),
            start_expected,
            end_expected,
            start_shown,
            end_shown,
        });
        prev_end = end_expected.max(end_shown);
    }
    windows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Run,
    Expected,
}

/// One display timeline row: either an actual run or a synthetic expected
/// block for a task that has not started yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineRow {
    pub kind: RowKind,
    pub key: String,
    pub task_id: String,
    pub start_min: u32,
    pub end_min: u32,
    pub minutes: i64,
    pub section_id: Option<String>,
}

/// Build the display timeline: run rows in chronological order, then one
/// expected row per pipeline task with no run yet, chained from the end of
/// the last real run (or from now when no runs exist). Rows are grouped by
/// section display order and sorted by start minute within each group;
/// unassigned rows trail.
pub fn timeline_rows(input: ProjectionInput<'_>, sections: &[Section]) -> Vec<TimelineRow> {
    let task_map: HashMap<&str, &DayTask> =
        input.tasks.iter().map(|task| (task.id.as_str(), task)).collect();
    let done: HashSet<&str> = input.done.iter().map(String::as_str).collect();

    let mut spans: Vec<&RunSpan> = input.runs.iter().collect();
    spans.sort_by_key(|span| span.start_at);

    let mut rows = Vec::new();
    for span in &spans {
        if !task_map.contains_key(span.task_id.as_str()) {
            continue;
        }
        rows.push(TimelineRow {
            kind: RowKind::Run,
            key: format!("run:{}:{}", span.task_id, span.start_at),
            task_id: span.task_id.clone(),
            start_min: span.start_min,
            end_min: span.end_min,
            minutes: span.minutes,
            section_id: find_section_for_minute(sections, span.start_min),
        });
    }

    let has_run: HashSet<&str> = spans.iter().map(|span| span.task_id.as_str()).collect();
    let mut chain = rows.last().map_or(input.now_minute, |row| row.end_min);
    for id in input.pipeline {
        let Some(task) = task_map.get(id.as_str()) else {
            continue;
        };
        if done.contains(id.as_str())
            || input.current_task_id == Some(id.as_str())
            || has_run.contains(id.as_str())
        {
            continue;
        }
        let scheduled = task.scheduled_at.as_deref().and_then(parse_hhmm);
        let start_expected = chain.max(scheduled.unwrap_or(chain));
        let end_expected = start_expected.saturating_add(planned_minutes_u32(task));
        rows.push(TimelineRow {
            kind: RowKind::Expected,
            key: format!("exp:{id}:{start_expected}"),
            task_id: id.clone(),
            start_min: start_expected,
            end_min: end_expected,
            minutes: task.planned(),
            section_id: find_section_for_minute(sections, start_expected),
        });
        chain = end_expected;
    }

    let mut section_rank: HashMap<&str, usize> = HashMap::new();
    let mut ordered: Vec<&Section> = sections.iter().collect();
    ordered.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.start_at.cmp(&b.start_at)));
    for (rank, section) in ordered.iter().enumerate() {
        section_rank.insert(section.id.as_str(), rank);
    }
    let rank_of = |row: &TimelineRow| {
        row.section_id
            .as_deref()
            .and_then(|id| section_rank.get(id).copied())
            .unwrap_or(usize::MAX)
    };
    rows.sort_by(|a, b| rank_of(a).cmp(&rank_of(b)).then(a.start_min.cmp(&b.start_min)));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, planned: i64, scheduled_at: Option<&str>) -> DayTask {
        DayTask {
            id: id.to_string(),
            routine_id: None,
            title: id.to_string(),
            planned_minutes: planned,
            color: None,
            order: 0,
            project: None,
            scheduled_at: scheduled_at.map(str::to_string),
            date: "2026-03-02".to_string(),
            section_id: None,
            url: None,
            flagged: false,
        }
    }

    fn span(task_id: &str, start_min: u32, end_min: u32) -> RunSpan {
        RunSpan {
            task_id: task_id.to_string(),
            start_at: start_min as i64 * 60_000,
            start_min,
            end_min,
            minutes: (end_min - start_min) as i64,
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn scheduled_time_wins_only_when_later_than_the_chain() {
        // T1 planned 30 with no scheduled time, T2 planned 20 scheduled at
        // 09:00, processing from 08:00: T1 [480,510), T2 [540,560).
        let tasks = vec![task("t1", 30, None), task("t2", 20, Some("09:00"))];
        let pipeline = ids(&["t1", "t2"]);
        let windows = project_pipeline(ProjectionInput {
            pipeline: &pipeline,
            tasks: &tasks,
            runs: &[],
            done: &[],
            current_task_id: None,
            now_minute: 480,
        });
        assert_eq!(windows.len(), 2);
        assert_eq!(
            (windows[0].start_expected, windows[0].end_expected),
            (0, 30)
        );
        assert_eq!(
            (windows[1].start_expected, windows[1].end_expected),
            (540, 560)
        );
    }

    #[test]
    fn actual_overrun_pushes_later_tasks_exactly_once() {
        let tasks = vec![task("t1", 30, None), task("t2", 20, None), task("t3", 10, None)];
        let pipeline = ids(&["t1", "t2", "t3"]);
        // t1 actually ran 09:00-10:00, well past its planned 30 minutes.
        let runs = vec![span("t1", 540, 600)];
        let windows = project_pipeline(ProjectionInput {
            pipeline: &pipeline,
            tasks: &tasks,
            runs: &runs,
            done: &[],
            current_task_id: None,
            now_minute: 600,
        });
        assert_eq!(windows[0].start_shown, 540);
        assert_eq!(windows[0].end_shown, 600);
        assert_eq!(windows[1].start_expected, 600);
        assert_eq!(windows[1].end_expected, 620);
        assert_eq!(windows[2].start_expected, 620);
    }

    #[test]
    fn done_and_current_tasks_are_excluded() {
        let tasks = vec![task("t1", 30, None), task("t2", 20, None), task("t3", 10, None)];
        let pipeline = ids(&["t1", "t2", "t3"]);
        let done = ids(&["t1"]);
        let windows = project_pipeline(ProjectionInput {
            pipeline: &pipeline,
            tasks: &tasks,
            runs: &[],
            done: &done,
            current_task_id: Some("t2"),
            now_minute: 480,
        });
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].task_id, "t3");
    }

    #[test]
    fn absurd_planned_minutes_saturate_instead_of_overflowing() {
        let tasks = vec![task("t1", i64::MAX, None), task("t2", 20, None)];
        let pipeline = ids(&["t1", "t2"]);
        let windows = project_pipeline(ProjectionInput {
            pipeline: &pipeline,
            tasks: &tasks,
            runs: &[],
            done: &[],
            current_task_id: None,
            now_minute: 480,
        });
        assert_eq!(windows[0].end_expected, u32::MAX);
        assert_eq!(windows[1].end_expected, u32::MAX);

        let rows = timeline_rows(
            ProjectionInput {
                pipeline: &pipeline,
                tasks: &tasks,
                runs: &[],
                done: &[],
                current_task_id: None,
                now_minute: 480,
            },
            &[],
        );
        assert_eq!(rows[0].end_min, u32::MAX);
    }

    #[test]
    fn dangling_pipeline_ids_are_filtered() {
        let tasks = vec![task("t1", 30, None)];
        let pipeline = ids(&["ghost", "t1"]);
        let windows = project_pipeline(ProjectionInput {
            pipeline: &pipeline,
            tasks: &tasks,
            runs: &[],
            done: &[],
            current_task_id: None,
            now_minute: 0,
        });
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].task_id, "t1");
    }

    #[test]
    fn expected_rows_chain_from_last_run_row() {
        let tasks = vec![task("t1", 30, None), task("t2", 20, None)];
        let pipeline = ids(&["t1", "t2"]);
        let runs = vec![span("t1", 540, 570)];
        let rows = timeline_rows(
            ProjectionInput {
                pipeline: &pipeline,
                tasks: &tasks,
                runs: &runs,
                done: &[],
                current_task_id: None,
                now_minute: 575,
            },
            &[],
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].kind, RowKind::Run);
        assert_eq!(rows[1].kind, RowKind::Expected);
        assert_eq!(rows[1].start_min, 570);
        assert_eq!(rows[1].end_min, 590);
    }

    #[test]
    fn expected_rows_chain_from_now_when_no_runs_exist() {
        let tasks = vec![task("t1", 30, None)];
        let pipeline = ids(&["t1"]);
        let rows = timeline_rows(
            ProjectionInput {
                pipeline: &pipeline,
                tasks: &tasks,
                runs: &[],
                done: &[],
                current_task_id: None,
                now_minute: 480,
            },
            &[],
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].start_min, 480);
        assert_eq!(rows[0].end_min, 510);
    }

    #[test]
    fn rows_group_by_section_order_then_start_minute() {
        let sections = vec![
            Section {
                id: "afternoon".to_string(),
                name: "Afternoon".to_string(),
                start_at: "12:00".to_string(),
                end_at: "18:00".to_string(),
                order: 1,
            },
            Section {
                id: "morning".to_string(),
                name: "Morning".to_string(),
                start_at: "06:00".to_string(),
                end_at: "12:00".to_string(),
                order: 0,
            },
        ];
        let tasks = vec![task("t1", 30, None), task("t2", 20, None), task("t3", 15, None)];
        let pipeline = ids(&[]);
        // t1 at 13:00 (afternoon), t2 at 08:00 (morning), t3 at 03:00 (no section).
        let runs = vec![span("t1", 780, 810), span("t2", 480, 500), span("t3", 180, 195)];
        let rows = timeline_rows(
            ProjectionInput {
                pipeline: &pipeline,
                tasks: &tasks,
                runs: &runs,
                done: &[],
                current_task_id: None,
                now_minute: 820,
            },
            &sections,
        );
        let order: Vec<&str> = rows.iter().map(|row| row.task_id.as_str()).collect();
        assert_eq!(order, vec!["t2", "t1", "t3"]);
        assert_eq!(rows[2].section_id, None);
    }

    #[test]
    fn tasks_with_any_run_get_no_expected_row() {
        let tasks = vec![task("t1", 30, None)];
        let pipeline = ids(&["t1"]);
        let runs = vec![span("t1", 540, 550)];
        let rows = timeline_rows(
            ProjectionInput {
                pipeline: &pipeline,
                tasks: &tasks,
                runs: &runs,
                done: &[],
                current_task_id: None,
                now_minute: 560,
            },
            &[],
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, RowKind::Run);
    }
}
