//! Temporal placement of a lane's jobs within the working day.
//!
//! Walks the lane's ordered jobs with a time cursor: each job starts after the
//! drive leg preceding it, or exactly at its pinned appointment (the leg is
//! then ignored). Jobs starting at or after the closing boundary are reported
//! as overflow and left off the grid, but stay in the lane. Pure; never
//! mutates the schedule.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{DispatchError, DispatchResult};
use crate::types::{DriveTimeMap, Job, JobId, LaneId, Schedule};

/// Guards floor/ceil against binary fractions like 17.000000000000004
const GRID_EPSILON: f64 = 1e-9;

/// Opening/closing boundary (hours since midnight) and grid granularity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayWindow {
    pub open_hour: f64,
    pub close_hour: f64,
    pub slot_minutes: u32,
}

impl Default for DayWindow {
    fn default() -> Self {
        Self {
            open_hour: defaults::DEFAULT_DAY_START_HOUR,
            close_hour: defaults::DEFAULT_DAY_END_HOUR,
            slot_minutes: defaults::DEFAULT_SLOT_MINUTES,
        }
    }
}

impl DayWindow {
    pub fn validate(&self) -> DispatchResult<()> {
        if !(0.0..=24.0).contains(&self.open_hour) || !(0.0..=24.0).contains(&self.close_hour) {
            return Err(DispatchError::InvalidConfig(format!(
                "day window {}..{} must lie within 0..24",
                self.open_hour, self.close_hour
            )));
        }
        if self.open_hour >= self.close_hour {
            return Err(DispatchError::InvalidConfig(format!(
                "opening hour {} must be before closing hour {}",
                self.open_hour, self.close_hour
            )));
        }
        if self.slot_minutes == 0 {
            return Err(DispatchError::InvalidConfig("slot granularity must be positive".to_string()));
        }
        Ok(())
    }

    pub fn length_hours(&self) -> f64 {
        self.close_hour - self.open_hour
    }

    fn slot_hours(&self) -> f64 {
        self.slot_minutes as f64 / 60.0
    }

    /// Number of grid rows between opening and closing.
    pub fn slot_count(&self) -> usize {
        (self.length_hours() / self.slot_hours() - GRID_EPSILON).ceil().max(0.0) as usize
    }
}

/// Rows a placed job occupies in the rendered day grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSpan {
    pub row: usize,
    pub span: usize,
}

/// Computed start/end for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedJob {
    pub job_id: JobId,
    pub start_hour: f64,
    /// Clamped to the closing boundary
    pub end_hour: f64,
    pub overflow: bool,
    /// `None` for overflow jobs
    pub grid: Option<GridSpan>,
}

impl PlacedJob {
    pub fn start_time(&self) -> NaiveTime {
        hour_to_time(self.start_hour)
    }

    pub fn end_time(&self) -> NaiveTime {
        hour_to_time(self.end_hour)
    }
}

/// Place `jobs` in order. `legs_seconds[i]` is the drive leg preceding job i;
/// missing entries count as zero.
pub fn place_jobs(jobs: &[Job], legs_seconds: &[u64], window: &DayWindow) -> Vec<PlacedJob> {
    let mut cursor = window.open_hour;
    let mut placed = Vec::with_capacity(jobs.len());

    for (i, job) in jobs.iter().enumerate() {
        match job.pinned_start_hour() {
            // A confirmed appointment is authoritative over the drive estimate
            Some(pinned) => cursor = pinned,
            None => {
                let leg = legs_seconds.get(i).copied().unwrap_or(0);
                cursor += leg as f64 / 3600.0;
            }
        }

        let start_hour = cursor;
        let raw_end = start_hour + job.duration_hours();
        let overflow = start_hour >= window.close_hour;
        let end_hour = raw_end.min(window.close_hour);

        placed.push(PlacedJob {
            job_id: job.id,
            start_hour,
            end_hour,
            overflow,
            grid: (!overflow).then(|| grid_span(start_hour, end_hour, window)),
        });

        cursor = raw_end;
    }

    placed
}

/// Placement of one lane using its recorded drive legs (zero when stale).
pub fn place_lane(
    schedule: &Schedule,
    drive_times: &DriveTimeMap,
    lane_id: &LaneId,
    window: &DayWindow,
) -> Vec<PlacedJob> {
    let jobs = schedule.jobs(lane_id);
    let legs = drive_times
        .get(lane_id)
        .map(|drive| drive.preceding_legs(jobs.len()))
        .unwrap_or_default();
    place_jobs(jobs, &legs, window)
}

fn grid_span(start_hour: f64, end_hour: f64, window: &DayWindow) -> GridSpan {
    let slot = window.slot_hours();
    let first = ((start_hour.max(window.open_hour) - window.open_hour) / slot + GRID_EPSILON).floor();
    let last = ((end_hour - window.open_hour) / slot - GRID_EPSILON).ceil();
    let row = first.max(0.0) as usize;
    let span = (last - first).max(1.0) as usize;
    GridSpan { row, span }
}

/// Fractional hours since midnight to a wall-clock time, clamped to the day.
pub fn hour_to_time(hour: f64) -> NaiveTime {
    let seconds = (hour * 3600.0).round().clamp(0.0, (24 * 60 * 60 - 1) as f64) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0).unwrap_or(NaiveTime::MIN)
}
