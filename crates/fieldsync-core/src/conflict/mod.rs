//! Conflict resolution between a local record and an incoming copy of it
//!
//! Order of precedence:
//! 1. domain override (high-priority remark, completed event) when exactly one side has it
//! 2. strictly greater `lastModified`
//! 3. higher completeness score; a tie keeps the local value
//!
//! Resolution is pure and deterministic for identical inputs.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::models::{EntityType, SyncEntity};

/// Side chosen by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Local,
    Incoming,
}

impl Winner {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Incoming => "incoming",
        }
    }
}

/// Rule that decided a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionReason {
    DomainOverride,
    NewerTimestamp,
    Completeness,
    TieKeepsLocal,
}

impl ResolutionReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DomainOverride => "domain_override",
            Self::NewerTimestamp => "newer_timestamp",
            Self::Completeness => "completeness",
            Self::TieKeepsLocal => "tie_keeps_local",
        }
    }
}

/// Outcome of [`resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub winner: Winner,
    pub reason: ResolutionReason,
}

impl Resolution {
    const fn new(winner: Winner, reason: ResolutionReason) -> Self {
        Self { winner, reason }
    }

    pub fn incoming_wins(self) -> bool {
        self.winner == Winner::Incoming
    }
}

/// Recorded conflict between a local and an incoming record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Type of the record involved
    pub entity_type: EntityType,
    /// Shared device-local id
    pub entity_id: i64,
    /// Local record's timestamp when the conflict occurred
    pub local_last_modified: i64,
    /// Incoming record's timestamp
    pub incoming_last_modified: i64,
    /// Side kept
    pub winner: Winner,
    /// Rule that decided it
    pub reason: ResolutionReason,
}

/// Decide which of two versions of the same record survives.
pub fn resolve<T: SyncEntity>(
    local: &T,
    incoming: &T,
    local_last_modified: i64,
    incoming_last_modified: i64,
) -> Resolution {
    if let (Some(local_flag), Some(incoming_flag)) = (local.override_flag(), incoming.override_flag())
    {
        if local_flag != incoming_flag {
            let winner = if incoming_flag {
                Winner::Incoming
            } else {
                Winner::Local
            };
            return Resolution::new(winner, ResolutionReason::DomainOverride);
        }
    }

    match incoming_last_modified.cmp(&local_last_modified) {
        Ordering::Greater => Resolution::new(Winner::Incoming, ResolutionReason::NewerTimestamp),
        Ordering::Less => Resolution::new(Winner::Local, ResolutionReason::NewerTimestamp),
        Ordering::Equal => {
            match incoming
                .completeness_score()
                .cmp(&local.completeness_score())
            {
                Ordering::Greater => {
                    Resolution::new(Winner::Incoming, ResolutionReason::Completeness)
                }
                Ordering::Less => Resolution::new(Winner::Local, ResolutionReason::Completeness),
                Ordering::Equal => Resolution::new(Winner::Local, ResolutionReason::TieKeepsLocal),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ControlPoint, Equipment, Event, Remark};

    fn equipment(model: Option<&str>) -> Equipment {
        Equipment {
            id: 9,
            node_id: Some(1),
            name: "Valve".to_string(),
            model: model.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn newer_incoming_timestamp_wins() {
        let resolution = resolve(&equipment(Some("A")), &equipment(None), 100, 200);
        assert_eq!(resolution.winner, Winner::Incoming);
        assert_eq!(resolution.reason, ResolutionReason::NewerTimestamp);
    }

    #[test]
    fn older_incoming_timestamp_loses_even_when_more_complete() {
        let resolution = resolve(&equipment(None), &equipment(Some("A")), 200, 100);
        assert_eq!(resolution.winner, Winner::Local);
    }

    #[test]
    fn equal_timestamps_prefer_more_complete_incoming() {
        let resolution = resolve(&equipment(None), &equipment(Some("A")), 100, 100);
        assert_eq!(resolution.winner, Winner::Incoming);
        assert_eq!(resolution.reason, ResolutionReason::Completeness);
    }

    #[test]
    fn equal_timestamps_and_scores_keep_local() {
        let local = ControlPoint {
            id: 1,
            name: "KP1".to_string(),
            ..Default::default()
        };
        let incoming = ControlPoint {
            id: 1,
            name: "KP-1".to_string(),
            ..Default::default()
        };
        let resolution = resolve(&local, &incoming, 100, 100);
        assert_eq!(resolution.winner, Winner::Local);
        assert_eq!(resolution.reason, ResolutionReason::TieKeepsLocal);
    }

    #[test]
    fn high_priority_local_remark_beats_newer_incoming() {
        let local = Remark {
            id: 4,
            control_point_id: 1,
            text: "Leak".to_string(),
            priority: "Высокий".to_string(),
            ..Default::default()
        };
        let incoming = Remark {
            priority: "Средний".to_string(),
            ..local.clone()
        };
        for incoming_ts in [50, 100] {
            let resolution = resolve(&local, &incoming, 100, incoming_ts);
            assert_eq!(resolution.winner, Winner::Local);
            assert_eq!(resolution.reason, ResolutionReason::DomainOverride);
        }
        assert_eq!(resolve(&local, &incoming, 100, 500).winner, Winner::Local);
    }

    #[test]
    fn completed_incoming_event_beats_newer_local() {
        let local = Event {
            id: 2,
            control_point_id: 1,
            title: "Inspection".to_string(),
            ..Default::default()
        };
        let incoming = Event {
            is_completed: true,
            ..local.clone()
        };
        let resolution = resolve(&local, &incoming, 900, 100);
        assert_eq!(resolution.winner, Winner::Incoming);
        assert_eq!(resolution.reason, ResolutionReason::DomainOverride);
    }

    #[test]
    fn matching_override_flags_fall_back_to_timestamps() {
        let local = Event {
            id: 2,
            control_point_id: 1,
            is_completed: true,
            ..Default::default()
        };
        let incoming = local.clone();
        assert_eq!(resolve(&local, &incoming, 100, 200).winner, Winner::Incoming);
        assert_eq!(
            resolve(&local, &incoming, 100, 200).reason,
            ResolutionReason::NewerTimestamp
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        let first = resolve(&equipment(None), &equipment(Some("B")), 10, 10);
        let second = resolve(&equipment(None), &equipment(Some("B")), 10, 10);
        assert_eq!(first, second);
    }
}
