//! Lane and roster types

use serde::{Deserialize, Serialize};

/// Synthetic lane identifier, derived from lane kind and crew/manager name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaneId(pub String);

impl LaneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LaneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneKind {
    /// Performs field work; owns jobs
    Crew,
    /// Supervisory view; holds linked display copies only
    Manager,
}

impl LaneKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            LaneKind::Crew => "crew",
            LaneKind::Manager => "manager",
        }
    }
}

/// A scheduling track in the day's board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lane {
    pub id: LaneId,
    pub name: String,
    pub color: String,
    pub kind: LaneKind,
    /// Supervising manager lane, for crew lanes
    #[serde(default)]
    pub manager: Option<LaneId>,
}

impl Lane {
    pub fn is_crew(&self) -> bool {
        self.kind == LaneKind::Crew
    }
}

/// One manager and the crews they supervise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerEntry {
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub crews: Vec<String>,
}

/// Manager -> crew hierarchy supplied by the roster feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roster {
    pub managers: Vec<ManagerEntry>,
}

impl Roster {
    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_deserialize() {
        let json = r##"{
            "managers": [
                {"name": "Dana", "color": "#1f77b4", "crews": ["Crew A", "Crew B"]},
                {"name": "Eli", "color": "#ff7f0e"}
            ]
        }"##;

        let roster: Roster = serde_json::from_str(json).unwrap();
        assert_eq!(roster.managers.len(), 2);
        assert_eq!(roster.managers[0].crews, vec!["Crew A", "Crew B"]);
        assert!(roster.managers[1].crews.is_empty());
        assert!(!roster.is_empty());
    }

    #[test]
    fn test_empty_roster() {
        assert!(Roster::default().is_empty());
    }

    #[test]
    fn test_lane_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&LaneId::new("crew:crew-a")).unwrap();
        assert_eq!(json, "\"crew:crew-a\"");
    }
}
