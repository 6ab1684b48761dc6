//! Types produced for collaborators: warnings, advisories, finalized records

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{JobId, JobStatus, LaneId};

/// Capacity/consistency finding; advisory only, never blocks an edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConflictWarning {
    #[serde(rename_all = "camelCase")]
    Overtime {
        lane_id: LaneId,
        lane_name: String,
        overage_hours: f64,
    },
    #[serde(rename_all = "camelCase")]
    DuplicateJob {
        job_number: String,
        lane_names: Vec<String>,
    },
}

impl ConflictWarning {
    pub fn message(&self) -> String {
        match self {
            ConflictWarning::Overtime { lane_name, overage_hours, .. } => {
                format!("{} is over the working day by {:.2} h", lane_name, overage_hours)
            }
            ConflictWarning::DuplicateJob { job_number, lane_names } => {
                format!("Job {} is assigned to {}", job_number, lane_names.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryKind {
    GeocodingUnavailable,
    RoutingUnavailable,
    AddressNotFound,
}

/// Dismissible notice about a degraded provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advisory {
    pub id: Uuid,
    pub kind: AdvisoryKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Advisory {
    pub fn new(kind: AdvisoryKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

/// Flattened per-technician record emitted on finalize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnicianRecord {
    pub technician: String,
    pub date: NaiveDate,
    pub job_id: JobId,
    pub job_number: String,
    pub start_time: NaiveTime,
    pub duration_hours: f64,
    pub status: JobStatus,
    pub summary: String,
}

/// A job as it appears in a technician's day notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifiedJob {
    pub order: usize,
    pub job_number: String,
    pub customer_name: String,
    pub address: String,
    pub start_time: Option<NaiveTime>,
    pub duration_hours: f64,
}

/// Technician name -> that day's ordered job list
pub type NotificationPayload = BTreeMap<String, Vec<NotifiedJob>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overtime_warning_serializes_with_tag() {
        let warning = ConflictWarning::Overtime {
            lane_id: LaneId::new("crew:a"),
            lane_name: "Crew A".to_string(),
            overage_hours: 1.5,
        };
        let json = serde_json::to_string(&warning).unwrap();
        assert!(json.contains("\"type\":\"overtime\""));
        assert!(json.contains("overageHours"));
        assert_eq!(warning.message(), "Crew A is over the working day by 1.50 h");
    }

    #[test]
    fn test_duplicate_warning_message_lists_lanes() {
        let warning = ConflictWarning::DuplicateJob {
            job_number: "WF-100".to_string(),
            lane_names: vec!["Crew A".to_string(), "Crew B".to_string()],
        };
        assert_eq!(warning.message(), "Job WF-100 is assigned to Crew A, Crew B");
    }

    #[test]
    fn test_advisories_get_distinct_ids() {
        let a = Advisory::new(AdvisoryKind::RoutingUnavailable, "Valhalla down");
        let b = Advisory::new(AdvisoryKind::RoutingUnavailable, "Valhalla down");
        assert_ne!(a.id, b.id);
    }
}
