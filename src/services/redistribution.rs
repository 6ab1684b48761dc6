//! Bulk reassignment of one crew's jobs across the other crews.
//!
//! Greedy bin-packing, largest job first. Each job goes to the eligible lane
//! with the lowest blended cost of distance-to-centroid and capacity
//! pressure; when nothing fits it goes to the lane with the most room left,
//! so every job is always placed.

use std::collections::BTreeMap;

use tracing::debug;

use crate::services::geo::{squared_distance, Centroid};
use crate::types::{DriveTimeMap, Job, JobId, LaneId, Schedule};

const GEOGRAPHY_WEIGHT: f64 = 0.6;
const CAPACITY_WEIGHT: f64 = 0.4;

/// Squared degrees -> cost units; 0.1 deg (~11 km) off-centroid costs 1.0
const DISTANCE_SCALE: f64 = 100.0;

/// Remaining capacity is floored here before inverting
const CAPACITY_FLOOR_HOURS: f64 = 0.25;

const FIT_EPSILON: f64 = 1e-9;

/// A crew lane that can receive jobs
#[derive(Debug, Clone)]
pub struct TargetLane<'a> {
    pub lane_id: LaneId,
    pub jobs: &'a [Job],
    /// Recorded drive total; zero when the lane's drive time is stale
    pub drive_hours: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Redistribution {
    /// One entry per source job, in placement order
    pub assignments: Vec<(JobId, LaneId)>,
    /// Remaining hours per target lane after placement (may be negative)
    pub residual_hours: BTreeMap<LaneId, f64>,
}

impl Redistribution {
    pub fn lane_for(&self, job_id: JobId) -> Option<&LaneId> {
        self.assignments
            .iter()
            .find(|(id, _)| *id == job_id)
            .map(|(_, lane)| lane)
    }
}

struct Candidate {
    lane_id: LaneId,
    remaining: f64,
    centroid: Centroid,
}

/// Every crew lane except `source`, with its current load.
pub fn target_lanes<'a>(schedule: &'a Schedule, drive_times: &DriveTimeMap, source: &LaneId) -> Vec<TargetLane<'a>> {
    schedule
        .crew_lanes()
        .filter(|lane| &lane.id != source)
        .map(|lane| TargetLane {
            lane_id: lane.id.clone(),
            jobs: schedule.jobs(&lane.id),
            drive_hours: drive_times.get(&lane.id).map_or(0.0, |d| d.total_hours()),
        })
        .collect()
}

/// Assign every job in `source_jobs` to one of `targets`.
///
/// Returns an empty assignment when there are no targets.
pub fn redistribute(source_jobs: &[Job], targets: &[TargetLane<'_>], day_length_hours: f64) -> Redistribution {
    let mut candidates: Vec<Candidate> = targets
        .iter()
        .map(|target| {
            let work: f64 = target.jobs.iter().map(Job::duration_hours).sum();
            Candidate {
                lane_id: target.lane_id.clone(),
                remaining: day_length_hours - work - target.drive_hours,
                centroid: Centroid::from_points(target.jobs.iter().filter_map(|job| job.coordinates.as_ref())),
            }
        })
        .collect();

    let mut assignments = Vec::with_capacity(source_jobs.len());
    if candidates.is_empty() {
        return Redistribution {
            assignments,
            residual_hours: BTreeMap::new(),
        };
    }

    let mut ordered: Vec<&Job> = source_jobs.iter().collect();
    // stable: equal durations keep source order
    ordered.sort_by(|a, b| b.duration_hours().total_cmp(&a.duration_hours()));

    for job in ordered {
        let duration = job.duration_hours();
        let chosen = best_fit(&candidates, job, day_length_hours).unwrap_or_else(|| most_room(&candidates));

        let candidate = &mut candidates[chosen];
        candidate.remaining -= duration;
        if let Some(point) = &job.coordinates {
            candidate.centroid.add(point);
        }

        debug!(
            "Redistributed job {} ({:.2} h) to {}, {:.2} h left",
            job.job_number, duration, candidate.lane_id, candidate.remaining
        );
        assignments.push((job.id, candidate.lane_id.clone()));
    }

    Redistribution {
        assignments,
        residual_hours: candidates
            .into_iter()
            .map(|candidate| (candidate.lane_id, candidate.remaining))
            .collect(),
    }
}

/// Lowest-cost lane that can fit the job; ties go to the earlier lane.
fn best_fit(candidates: &[Candidate], job: &Job, day_length_hours: f64) -> Option<usize> {
    let duration = job.duration_hours();
    let mut best: Option<(usize, f64)> = None;

    for (i, candidate) in candidates.iter().enumerate() {
        if candidate.remaining + FIT_EPSILON < duration {
            continue;
        }
        let score = score(candidate, job, day_length_hours);
        if best.map_or(true, |(_, best_score)| score < best_score) {
            best = Some((i, score));
        }
    }

    best.map(|(i, _)| i)
}

fn score(candidate: &Candidate, job: &Job, day_length_hours: f64) -> f64 {
    let pressure = day_length_hours / candidate.remaining.max(CAPACITY_FLOOR_HOURS);
    match (&job.coordinates, candidate.centroid.center()) {
        (Some(point), Some(center)) => {
            GEOGRAPHY_WEIGHT * DISTANCE_SCALE * squared_distance(point, &center) + CAPACITY_WEIGHT * pressure
        }
        _ => pressure,
    }
}

fn most_room(candidates: &[Candidate]) -> usize {
    let mut best = 0;
    for (i, candidate) in candidates.iter().enumerate().skip(1) {
        if candidate.remaining > candidates[best].remaining {
            best = i;
        }
    }
    best
}
