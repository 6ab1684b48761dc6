//! Conflict detection over a day's schedule.
//!
//! Pure and cheap: safe to run after every store change. Findings are
//! advisory and never block edits or finalize.

use std::collections::BTreeMap;

use crate::services::placement::DayWindow;
use crate::types::{normalize_job_number, ConflictWarning, DriveTimeMap, Schedule};

/// Overtime below this many hours is treated as rounding noise
const OVERTIME_TOLERANCE_HOURS: f64 = 1e-6;

pub fn detect_conflicts(schedule: &Schedule, drive_times: &DriveTimeMap, window: &DayWindow) -> Vec<ConflictWarning> {
    let mut warnings = overtime_warnings(schedule, drive_times, window);
    warnings.extend(duplicate_job_warnings(schedule));
    warnings
}

/// Crew lanes whose work plus drive time exceeds the day length.
fn overtime_warnings(schedule: &Schedule, drive_times: &DriveTimeMap, window: &DayWindow) -> Vec<ConflictWarning> {
    let day_length = window.length_hours();

    schedule
        .crew_lanes()
        .filter_map(|lane| {
            let work: f64 = schedule.jobs(&lane.id).iter().map(|job| job.duration_hours()).sum();
            let drive = drive_times.get(&lane.id).map_or(0.0, |d| d.total_hours());
            let overage = work + drive - day_length;
            (overage > OVERTIME_TOLERANCE_HOURS).then(|| ConflictWarning::Overtime {
                lane_id: lane.id.clone(),
                lane_name: lane.name.clone(),
                overage_hours: overage,
            })
        })
        .collect()
}

/// Non-empty job numbers appearing in more than one crew lane.
fn duplicate_job_warnings(schedule: &Schedule) -> Vec<ConflictWarning> {
    // normalized number -> (display number, lane names in lane order)
    let mut seen: BTreeMap<String, (String, Vec<String>)> = BTreeMap::new();

    for lane in schedule.crew_lanes() {
        for job in schedule.jobs(&lane.id) {
            let key = normalize_job_number(&job.job_number);
            if key.is_empty() {
                continue;
            }
            let entry = seen
                .entry(key)
                .or_insert_with(|| (job.job_number.trim().to_string(), Vec::new()));
            if !entry.1.contains(&lane.name) {
                entry.1.push(lane.name.clone());
            }
        }
    }

    seen.into_values()
        .filter(|(_, lanes)| lanes.len() > 1)
        .map(|(job_number, lane_names)| ConflictWarning::DuplicateJob { job_number, lane_names })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DriveTime, Job, JobType, Lane, LaneId, LaneKind, Roster};
    use chrono::NaiveDate;

    fn lane(name: &str, kind: LaneKind) -> Lane {
        Lane {
            id: LaneId::new(format!("{}:{}", kind.as_str(), name)),
            name: name.to_string(),
            color: "#000".to_string(),
            kind,
            manager: None,
        }
    }

    fn schedule() -> Schedule {
        Schedule::new(
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            Roster::default(),
            vec![
                lane("A", LaneKind::Crew),
                lane("B", LaneKind::Crew),
                lane("M", LaneKind::Manager),
            ],
        )
    }

    fn push(schedule: &mut Schedule, lane: &str, number: &str, hours: f64) {
        let job = Job::new(JobType::Inspection, number, "Customer", "1 Main St").with_duration(hours);
        schedule.assignments.get_mut(&LaneId::new(lane)).unwrap().push(job);
    }

    fn window() -> DayWindow {
        DayWindow { open_hour: 8.0, close_hour: 18.0, slot_minutes: 15 }
    }

    #[test]
    fn overtime_counts_drive_time() {
        let mut s = schedule();
        push(&mut s, "crew:A", "WF-1", 6.0);
        push(&mut s, "crew:A", "WF-2", 3.5);

        assert!(detect_conflicts(&s, &DriveTimeMap::new(), &window()).is_empty());

        let mut drive = DriveTimeMap::new();
        drive.insert(LaneId::new("crew:A"), DriveTime::from_legs(vec![1800, 1800, 1800]));
        let warnings = detect_conflicts(&s, &drive, &window());

        assert_eq!(warnings.len(), 1);
        match &warnings[0] {
            ConflictWarning::Overtime { lane_name, overage_hours, .. } => {
                assert_eq!(lane_name, "A");
                assert!((overage_hours - 1.0).abs() < 1e-9);
            }
            other => panic!("unexpected warning {:?}", other),
        }
    }

    #[test]
    fn exact_day_length_is_not_overtime() {
        let mut s = schedule();
        push(&mut s, "crew:A", "WF-1", 10.0);
        assert!(detect_conflicts(&s, &DriveTimeMap::new(), &window()).is_empty());
    }

    #[test]
    fn duplicate_job_number_ignores_case_and_whitespace() {
        let mut s = schedule();
        push(&mut s, "crew:A", "WF-100 ", 1.0);
        push(&mut s, "crew:B", "wf-100", 1.0);

        let warnings = detect_conflicts(&s, &DriveTimeMap::new(), &window());
        assert_eq!(
            warnings,
            vec![ConflictWarning::DuplicateJob {
                job_number: "WF-100".to_string(),
                lane_names: vec!["A".to_string(), "B".to_string()],
            }]
        );
    }

    #[test]
    fn same_lane_repeat_and_manager_copies_are_not_duplicates() {
        let mut s = schedule();
        push(&mut s, "crew:A", "WF-7", 1.0);
        push(&mut s, "crew:A", "WF-7", 1.0);
        push(&mut s, "manager:M", "WF-7", 1.0);
        push(&mut s, "crew:B", "  ", 1.0);
        push(&mut s, "crew:A", "", 1.0);

        assert!(detect_conflicts(&s, &DriveTimeMap::new(), &window()).is_empty());
    }

    #[test]
    fn detection_is_idempotent() {
        let mut s = schedule();
        push(&mut s, "crew:A", "WF-1", 9.0);
        push(&mut s, "crew:A", "WF-2", 3.0);
        push(&mut s, "crew:B", "wf-2", 1.0);
        let drive = DriveTimeMap::new();

        let first = detect_conflicts(&s, &drive, &window());
        let second = detect_conflicts(&s, &drive, &window());
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }
}
