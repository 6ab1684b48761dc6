//! Inbound booking feed types

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::JobType;

/// One booking from the external job source feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalBooking {
    /// External record identifier; repeated merges of the same record are no-ops
    pub record_id: String,
    pub job_number: String,
    pub customer_name: String,
    pub address: String,
    /// Pre-assigned crew, matched against lane names case-insensitively
    #[serde(default)]
    pub crew_name: Option<String>,
    /// Fixed appointment time; becomes the job's pinned start
    #[serde(default)]
    pub appointment: Option<NaiveTime>,
    #[serde(default)]
    pub job_type: Option<JobType>,
    #[serde(default)]
    pub duration_hours: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}
