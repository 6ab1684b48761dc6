//! Lane derivation from the manager -> crew roster

use std::collections::HashSet;

use once_cell::sync::Lazy;
use tracing::warn;

use crate::types::{Lane, LaneId, LaneKind, ManagerEntry, Roster};

/// Built-in roster used when the roster feed has no data
static DEFAULT_ROSTER: Lazy<Roster> = Lazy::new(|| Roster {
    managers: vec![
        ManagerEntry {
            name: "North Ops".to_string(),
            color: "#1f77b4".to_string(),
            crews: vec!["Crew 1".to_string(), "Crew 2".to_string()],
        },
        ManagerEntry {
            name: "South Ops".to_string(),
            color: "#d62728".to_string(),
            crews: vec!["Crew 3".to_string(), "Crew 4".to_string()],
        },
    ],
});

pub fn default_roster() -> Roster {
    DEFAULT_ROSTER.clone()
}

/// The feed's roster, or the built-in one when the feed is empty.
pub fn effective_roster(feed: Option<Roster>) -> Roster {
    match feed {
        Some(roster) if !roster.is_empty() => roster,
        _ => default_roster(),
    }
}

/// Stable id for a lane: same kind and name always give the same id.
pub fn lane_id_for(kind: LaneKind, name: &str) -> LaneId {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    LaneId(format!("{}:{}", kind.as_str(), slug.trim_matches('-')))
}

/// Manager lane followed by its crew lanes, for each manager in roster order.
///
/// Blank names are skipped; a crew listed twice keeps its first placement.
pub fn build_lanes(roster: &Roster) -> Vec<Lane> {
    let mut lanes = Vec::new();
    let mut seen: HashSet<LaneId> = HashSet::new();

    for manager in &roster.managers {
        if manager.name.trim().is_empty() {
            warn!("Skipping roster manager with a blank name");
            continue;
        }
        let manager_id = lane_id_for(LaneKind::Manager, &manager.name);
        if !seen.insert(manager_id.clone()) {
            warn!("Duplicate manager '{}' in roster", manager.name);
            continue;
        }
        lanes.push(Lane {
            id: manager_id.clone(),
            name: manager.name.trim().to_string(),
            color: manager.color.clone(),
            kind: LaneKind::Manager,
            manager: None,
        });

        for crew in &manager.crews {
            if crew.trim().is_empty() {
                continue;
            }
            let crew_id = lane_id_for(LaneKind::Crew, crew);
            if !seen.insert(crew_id.clone()) {
                warn!("Crew '{}' listed more than once in roster", crew);
                continue;
            }
            lanes.push(Lane {
                id: crew_id,
                name: crew.trim().to_string(),
                color: manager.color.clone(),
                kind: LaneKind::Crew,
                manager: Some(manager_id.clone()),
            });
        }
    }

    lanes
}
