//! Job types

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Coordinates;

/// Stable job identifier, assigned once and kept across reorders and moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Kind of restoration work; each kind carries a default duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Inspection,
    Estimate,
    WaterMitigation,
    MoldRemediation,
    FireCleanup,
    Reconstruction,
    EquipmentPickup,
    Monitoring,
}

impl JobType {
    pub const ALL: [JobType; 8] = [
        JobType::Inspection,
        JobType::Estimate,
        JobType::WaterMitigation,
        JobType::MoldRemediation,
        JobType::FireCleanup,
        JobType::Reconstruction,
        JobType::EquipmentPickup,
        JobType::Monitoring,
    ];

    /// Default on-site duration in hours.
    pub const fn default_duration_hours(self) -> f64 {
        match self {
            JobType::Inspection => 1.0,
            JobType::Estimate => 1.5,
            JobType::WaterMitigation => 4.0,
            JobType::MoldRemediation => 6.0,
            JobType::FireCleanup => 8.0,
            JobType::Reconstruction => 8.0,
            JobType::EquipmentPickup => 0.5,
            JobType::Monitoring => 0.5,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            JobType::Inspection => "inspection",
            JobType::Estimate => "estimate",
            JobType::WaterMitigation => "water_mitigation",
            JobType::MoldRemediation => "mold_remediation",
            JobType::FireCleanup => "fire_cleanup",
            JobType::Reconstruction => "reconstruction",
            JobType::EquipmentPickup => "equipment_pickup",
            JobType::Monitoring => "monitoring",
        }
    }
}

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl JobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// Where a job came from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    /// Entered by a dispatcher
    #[default]
    Manual,
    /// Merged from the external booking feed; `record_id` keeps merges idempotent
    #[serde(rename_all = "camelCase")]
    ExternalBooking { record_id: String },
    /// Display copy in a manager lane. `source` is a relation, not ownership:
    /// edits to either side do not propagate.
    #[serde(rename_all = "camelCase")]
    LinkedCopy { source: JobId },
}

/// One dispatchable unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    /// Per-instance override of the job type's default duration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_hours: Option<f64>,
    pub job_number: String,
    pub customer_name: String,
    pub address: String,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    /// Confirmed appointment; overrides computed drive offsets
    #[serde(default)]
    pub pinned_start: Option<NaiveTime>,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub provenance: Provenance,
}

impl Job {
    pub fn new(
        job_type: JobType,
        job_number: impl Into<String>,
        customer_name: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: JobId::new(),
            job_type,
            duration_hours: None,
            job_number: job_number.into(),
            customer_name: customer_name.into(),
            address: address.into(),
            coordinates: None,
            pinned_start: None,
            status: JobStatus::Scheduled,
            notes: None,
            provenance: Provenance::Manual,
        }
    }

    pub fn with_duration(mut self, hours: f64) -> Self {
        self.duration_hours = Some(hours);
        self
    }

    pub fn with_coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    pub fn with_pinned_start(mut self, start: NaiveTime) -> Self {
        self.pinned_start = Some(start);
        self
    }

    /// Effective duration: the override if set, otherwise the job type default.
    pub fn duration_hours(&self) -> f64 {
        self.duration_hours
            .unwrap_or_else(|| self.job_type.default_duration_hours())
            .max(0.0)
    }

    /// Pinned start as fractional hours since midnight.
    pub fn pinned_start_hour(&self) -> Option<f64> {
        self.pinned_start
            .map(|t| t.num_seconds_from_midnight() as f64 / 3600.0)
    }

    pub fn is_linked_copy(&self) -> bool {
        matches!(self.provenance, Provenance::LinkedCopy { .. })
    }

    pub fn external_record_id(&self) -> Option<&str> {
        match &self.provenance {
            Provenance::ExternalBooking { record_id } => Some(record_id),
            _ => None,
        }
    }

    /// Display copy for a manager lane with a fresh identity.
    pub fn linked_copy(&self) -> Job {
        Job {
            id: JobId::new(),
            provenance: Provenance::LinkedCopy { source: self.id },
            ..self.clone()
        }
    }
}

/// Normalize a job number for comparisons: trimmed, lowercase, single spaces.
pub fn normalize_job_number(job_number: &str) -> String {
    job_number
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_duration_defaults_to_job_type() {
        let job = Job::new(JobType::WaterMitigation, "WF-1", "Alvarez", "1 Main St");
        assert_eq!(job.duration_hours(), 4.0);

        let job = job.with_duration(2.5);
        assert_eq!(job.duration_hours(), 2.5);
    }

    #[test]
    fn test_every_job_type_has_positive_default() {
        for job_type in JobType::ALL {
            assert!(job_type.default_duration_hours() > 0.0, "{}", job_type.as_str());
        }
    }

    #[test]
    fn test_pinned_start_hour() {
        let job = Job::new(JobType::Inspection, "WF-2", "Baker", "2 Main St")
            .with_pinned_start(NaiveTime::from_hms_opt(13, 30, 0).unwrap());
        assert_eq!(job.pinned_start_hour(), Some(13.5));
    }

    #[test]
    fn test_linked_copy_has_fresh_identity() {
        let job = Job::new(JobType::Estimate, "WF-3", "Chen", "3 Main St");
        let copy = job.linked_copy();

        assert_ne!(copy.id, job.id);
        assert_eq!(copy.provenance, Provenance::LinkedCopy { source: job.id });
        assert_eq!(copy.job_number, job.job_number);
        assert!(copy.is_linked_copy());
        assert!(!job.is_linked_copy());
    }

    #[test]
    fn test_normalize_job_number() {
        assert_eq!(normalize_job_number("WF-100 "), normalize_job_number("wf-100"));
        assert_eq!(normalize_job_number("  WF   100 "), "wf 100");
    }

    #[test]
    fn test_job_serializes_to_camel_case() {
        let job = Job::new(JobType::MoldRemediation, "WF-4", "Diaz", "4 Main St");
        let json = serde_json::to_string(&job).unwrap();

        assert!(json.contains("jobType"));
        assert!(json.contains("\"mold_remediation\""));
        assert!(json.contains("customerName"));
        assert!(!json.contains("job_number"));
    }

    #[test]
    fn test_provenance_round_trips_through_tag() {
        let json = r#"{"kind":"external_booking","recordId":"rec-9"}"#;
        let provenance: Provenance = serde_json::from_str(json).unwrap();
        assert_eq!(provenance, Provenance::ExternalBooking { record_id: "rec-9".to_string() });
    }

    #[test]
    fn test_job_deserializes_with_missing_optional_fields() {
        let json = r#"{
            "id": "00000000-0000-0000-0000-000000000001",
            "jobType": "inspection",
            "jobNumber": "WF-5",
            "customerName": "Evans",
            "address": "5 Main St"
        }"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.status, JobStatus::Scheduled);
        assert_eq!(job.provenance, Provenance::Manual);
        assert!(job.coordinates.is_none());
    }
}
