//! Records produced for collaborators: finalized technician rows and the
//! per-technician notification payload. Both are derived from placement and
//! can be re-derived at any time from the same schedule.

use tracing::debug;

use crate::services::placement::{place_lane, DayWindow};
use crate::types::{DriveTimeMap, Job, JobStatus, NotificationPayload, NotifiedJob, Schedule, TechnicianRecord};

/// One record per placed job in every crew lane, in lane then route order.
/// Overflow jobs have no slot in the day and are left out.
pub fn technician_records(schedule: &Schedule, drive_times: &DriveTimeMap, window: &DayWindow) -> Vec<TechnicianRecord> {
    let mut records = Vec::new();

    for lane in schedule.crew_lanes() {
        let jobs = schedule.jobs(&lane.id);
        let placed = place_lane(schedule, drive_times, &lane.id, window);

        for (job, placement) in jobs.iter().zip(&placed) {
            if placement.overflow {
                debug!("Job {} in {} overflows the day, no record", job.job_number, lane.name);
                continue;
            }
            records.push(TechnicianRecord {
                technician: lane.name.clone(),
                date: schedule.date,
                job_id: job.id,
                job_number: job.job_number.clone(),
                start_time: placement.start_time(),
                duration_hours: job.duration_hours(),
                status: job.status,
                summary: summary(job),
            });
        }
    }

    records
}

/// Technician name -> ordered jobs for the day. Cancelled jobs are omitted;
/// overflow jobs are listed without a start time.
pub fn notification_payload(schedule: &Schedule, drive_times: &DriveTimeMap, window: &DayWindow) -> NotificationPayload {
    let mut payload = NotificationPayload::new();

    for lane in schedule.crew_lanes() {
        let jobs = schedule.jobs(&lane.id);
        let placed = place_lane(schedule, drive_times, &lane.id, window);

        let notified: Vec<NotifiedJob> = jobs
            .iter()
            .zip(&placed)
            .filter(|(job, _)| job.status != JobStatus::Cancelled)
            .enumerate()
            .map(|(i, (job, placement))| NotifiedJob {
                order: i + 1,
                job_number: job.job_number.clone(),
                customer_name: job.customer_name.clone(),
                address: job.address.clone(),
                start_time: (!placement.overflow).then(|| placement.start_time()),
                duration_hours: job.duration_hours(),
            })
            .collect();

        if !notified.is_empty() {
            payload.insert(lane.name.clone(), notified);
        }
    }

    payload
}

fn summary(job: &Job) -> String {
    let mut summary = format!("{} for {} at {}", job.job_type.as_str().replace('_', " "), job.customer_name, job.address);
    if let Some(notes) = job.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        summary.push_str(": ");
        summary.push_str(notes);
    }
    summary
}
