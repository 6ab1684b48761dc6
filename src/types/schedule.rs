//! Schedule types (a day's lanes, job assignments and drive times)

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{Job, JobId, Lane, LaneId, LaneKind, Roster};

/// Travel seconds for one crew route.
///
/// `legs` runs depot -> first stop, stop -> stop, ..., last stop -> depot, so
/// a lane with N jobs has N + 1 legs (or none when the lane is empty).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveTime {
    pub total_seconds: u64,
    pub legs: Vec<u64>,
}

impl DriveTime {
    pub fn from_legs(legs: Vec<u64>) -> Self {
        let total_seconds = legs.iter().fold(0u64, |acc, leg| acc.saturating_add(*leg));
        Self { total_seconds, legs }
    }

    pub fn total_hours(&self) -> f64 {
        self.total_seconds as f64 / 3600.0
    }

    /// Legs preceding each job (the trailing return leg dropped).
    pub fn preceding_legs(&self, job_count: usize) -> Vec<u64> {
        (0..job_count)
            .map(|i| self.legs.get(i).copied().unwrap_or(0))
            .collect()
    }
}

/// Drive times keyed by crew lane. A missing entry means "stale, not yet recomputed".
pub type DriveTimeMap = BTreeMap<LaneId, DriveTime>;

/// Where a job currently lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobLocation {
    Lane { lane_id: LaneId, index: usize },
    Unassigned { index: usize },
}

/// The full day's assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub date: NaiveDate,
    pub lanes: Vec<Lane>,
    /// Roster the lanes were derived from
    pub roster: Roster,
    pub assignments: BTreeMap<LaneId, Vec<Job>>,
    #[serde(default)]
    pub unassigned: Vec<Job>,
    #[serde(default)]
    pub finalized: bool,
    #[serde(default)]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn new(date: NaiveDate, roster: Roster, lanes: Vec<Lane>) -> Self {
        let assignments = lanes
            .iter()
            .map(|lane| (lane.id.clone(), Vec::new()))
            .collect();
        Self {
            date,
            lanes,
            roster,
            assignments,
            unassigned: Vec::new(),
            finalized: false,
            finalized_at: None,
        }
    }

    pub fn lane(&self, lane_id: &LaneId) -> Option<&Lane> {
        self.lanes.iter().find(|lane| &lane.id == lane_id)
    }

    pub fn lane_by_name(&self, name: &str) -> Option<&Lane> {
        let wanted = name.trim().to_lowercase();
        self.lanes
            .iter()
            .find(|lane| lane.name.trim().to_lowercase() == wanted)
    }

    pub fn crew_lanes(&self) -> impl Iterator<Item = &Lane> {
        self.lanes.iter().filter(|lane| lane.kind == LaneKind::Crew)
    }

    /// Ordered jobs of a lane (empty for unknown lanes).
    pub fn jobs(&self, lane_id: &LaneId) -> &[Job] {
        self.assignments
            .get(lane_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn locate(&self, job_id: JobId) -> Option<JobLocation> {
        for (lane_id, jobs) in &self.assignments {
            if let Some(index) = jobs.iter().position(|job| job.id == job_id) {
                return Some(JobLocation::Lane { lane_id: lane_id.clone(), index });
            }
        }
        self.unassigned
            .iter()
            .position(|job| job.id == job_id)
            .map(|index| JobLocation::Unassigned { index })
    }

    pub fn find_job(&self, job_id: JobId) -> Option<&Job> {
        self.all_jobs().find(|job| job.id == job_id)
    }

    pub fn job_mut(&mut self, job_id: JobId) -> Option<&mut Job> {
        self.assignments
            .values_mut()
            .flat_map(|jobs| jobs.iter_mut())
            .chain(self.unassigned.iter_mut())
            .find(|job| job.id == job_id)
    }

    /// Detach a job from wherever it lives.
    pub fn take_job(&mut self, job_id: JobId) -> Option<(JobLocation, Job)> {
        let location = self.locate(job_id)?;
        let job = match &location {
            JobLocation::Lane { lane_id, index } => self.assignments.get_mut(lane_id)?.remove(*index),
            JobLocation::Unassigned { index } => self.unassigned.remove(*index),
        };
        Some((location, job))
    }

    pub fn all_jobs(&self) -> impl Iterator<Item = &Job> {
        self.assignments
            .values()
            .flat_map(|jobs| jobs.iter())
            .chain(self.unassigned.iter())
    }

    pub fn contains_external_record(&self, record_id: &str) -> bool {
        self.all_jobs()
            .any(|job| job.external_record_id() == Some(record_id))
    }

    pub fn job_count(&self) -> usize {
        self.all_jobs().count()
    }
}

/// Persisted schedule document, one per calendar date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDocument {
    pub date: NaiveDate,
    /// Incremented on every successful write
    pub revision: u64,
    pub schedule: Schedule,
    pub drive_times: DriveTimeMap,
    pub saved_at: DateTime<Utc>,
}
