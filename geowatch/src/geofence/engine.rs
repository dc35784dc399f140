//! Edge-triggered geofence evaluation.
//!
//! The engine holds the current geofence set and, per subject, the last
//! applied position and the containment state for each active geofence. A
//! position update emits an event only when a subject crosses a boundary.
//!
//! # Replacement
//!
//! [`GeofenceEngine::replace_geofences`] swaps the whole set, keyed by id:
//!
//! | Geofence id | State afterwards |
//! |-------------|------------------|
//! | kept and active | retained, no event |
//! | removed or now inactive | discarded, no event |
//! | new | `Outside`, evaluated on the next position |

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::model::{
    ContainmentState, Geofence, GeofenceEvent, Subject, TransitionKind,
};
use crate::location::Position;

/// Result of applying one position.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    /// The position was applied; `events` holds any boundary crossings.
    Applied { events: Vec<GeofenceEvent> },
    /// The timestamp was not newer than the subject's last applied position.
    Stale { last_applied_millis: i64 },
    /// The coordinates were out of range.
    Rejected,
}

impl EvaluationOutcome {
    /// Events from an applied update, empty otherwise.
    pub fn events(&self) -> &[GeofenceEvent] {
        match self {
            Self::Applied { events } => events,
            _ => &[],
        }
    }

    pub fn into_events(self) -> Vec<GeofenceEvent> {
        match self {
            Self::Applied { events } => events,
            _ => Vec::new(),
        }
    }
}

/// What a replacement changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceSummary {
    pub added: usize,
    pub retained: usize,
    pub removed: usize,
    /// Geofences supplied but inactive (not evaluated).
    pub inactive: usize,
    /// Later records dropped because their id was already present.
    pub duplicates: usize,
}

/// Point-in-time copy of all containment state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainmentSnapshot {
    pub subjects: BTreeMap<Subject, SubjectSnapshot>,
}

/// Containment state of one subject.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectSnapshot {
    pub last_position: Position,
    pub containment: BTreeMap<String, ContainmentState>,
}

impl ContainmentSnapshot {
    pub fn state(&self, subject: &Subject, geofence_id: &str) -> Option<ContainmentState> {
        self.subjects
            .get(subject)?
            .containment
            .get(geofence_id)
            .copied()
    }
}

#[derive(Debug)]
struct SubjectState {
    last_position: Position,
    containment: HashMap<String, ContainmentState>,
}

#[derive(Debug)]
struct EngineState {
    /// Active geofences in supplied order.
    geofences: Arc<[Geofence]>,
    subjects: HashMap<Subject, SubjectState>,
}

/// Geofence evaluation engine.
///
/// Thread-safe: updates take a short write lock, readers get snapshots.
#[derive(Debug)]
pub struct GeofenceEngine {
    state: RwLock<EngineState>,
}

impl Default for GeofenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GeofenceEngine {
    /// Empty engine with no geofences.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(EngineState {
                geofences: Arc::from(Vec::new()),
                subjects: HashMap::new(),
            }),
        }
    }

    /// Replace the geofence set. Emits no events.
    pub fn replace_geofences(&self, geofences: Vec<Geofence>) -> ReplaceSummary {
        let mut summary = ReplaceSummary::default();
        let mut seen = HashSet::new();
        let mut active = Vec::with_capacity(geofences.len());

        for geofence in geofences {
            if !seen.insert(geofence.id.clone()) {
                warn!(geofence = %geofence.id, "Duplicate geofence id, keeping first");
                summary.duplicates += 1;
                continue;
            }
            if geofence.is_active {
                active.push(geofence);
            } else {
                summary.inactive += 1;
            }
        }

        let mut state = self.state.write();
        let previous: HashSet<&str> = state.geofences.iter().map(|g| g.id.as_str()).collect();
        let next: HashSet<String> = active.iter().map(|g| g.id.clone()).collect();

        for geofence in &active {
            if previous.contains(geofence.id.as_str()) {
                summary.retained += 1;
            } else {
                summary.added += 1;
            }
        }
        summary.removed = previous.iter().filter(|id| !next.contains(**id)).count();

        for subject in state.subjects.values_mut() {
            subject.containment.retain(|id, _| next.contains(id));
        }
        state.geofences = Arc::from(active);
        drop(state);

        info!(
            added = summary.added,
            retained = summary.retained,
            removed = summary.removed,
            inactive = summary.inactive,
            "Geofences replaced"
        );
        summary
    }

    /// Apply a position for `subject` and return any boundary crossings.
    pub fn update_position(&self, subject: &Subject, position: Position) -> EvaluationOutcome {
        let point = position.lat_lng();
        if !point.is_valid() {
            debug!(subject = %subject, "Rejecting position with invalid coordinates");
            return EvaluationOutcome::Rejected;
        }

        let mut state = self.state.write();
        let geofences = Arc::clone(&state.geofences);

        if let Some(existing) = state.subjects.get(subject) {
            if !position.is_newer_than(&existing.last_position) {
                debug!(
                    subject = %subject,
                    ts = position.captured_at_millis,
                    last_ts = existing.last_position.captured_at_millis,
                    "Discarding stale position"
                );
                return EvaluationOutcome::Stale {
                    last_applied_millis: existing.last_position.captured_at_millis,
                };
            }
        }

        let entry = state
            .subjects
            .entry(subject.clone())
            .or_insert_with(|| SubjectState {
                last_position: position,
                containment: HashMap::new(),
            });
        entry.last_position = position;

        let mut events = Vec::new();
        for geofence in geofences.iter() {
            let now = ContainmentState::from_inside(geofence.contains(point));
            let before = entry
                .containment
                .insert(geofence.id.clone(), now)
                .unwrap_or_default();
            let kind = match (before, now) {
                (ContainmentState::Outside, ContainmentState::Inside) => TransitionKind::Entered,
                (ContainmentState::Inside, ContainmentState::Outside) => TransitionKind::Exited,
                _ => continue,
            };
            debug!(
                subject = %subject,
                geofence = %geofence.id,
                transition = %kind,
                "Geofence transition"
            );
            events.push(GeofenceEvent {
                kind,
                subject: subject.clone(),
                geofence_id: geofence.id.clone(),
                geofence_name: geofence.name.clone(),
                position,
            });
        }

        EvaluationOutcome::Applied { events }
    }

    /// Forget a subject entirely. Returns false if it was unknown.
    pub fn remove_subject(&self, subject: &Subject) -> bool {
        self.state.write().subjects.remove(subject).is_some()
    }

    /// Active geofences in supplied order.
    pub fn geofences(&self) -> Arc<[Geofence]> {
        Arc::clone(&self.state.read().geofences)
    }

    pub fn containment(&self, subject: &Subject, geofence_id: &str) -> Option<ContainmentState> {
        self.state
            .read()
            .subjects
            .get(subject)?
            .containment
            .get(geofence_id)
            .copied()
    }

    /// Ids of the geofences `subject` is currently inside, in geofence order.
    pub fn inside_of(&self, subject: &Subject) -> Vec<String> {
        let state = self.state.read();
        let Some(entry) = state.subjects.get(subject) else {
            return Vec::new();
        };
        state
            .geofences
            .iter()
            .filter(|g| entry.containment.get(&g.id) == Some(&ContainmentState::Inside))
            .map(|g| g.id.clone())
            .collect()
    }

    /// Copy of all per-subject state.
    pub fn snapshot(&self) -> ContainmentSnapshot {
        let state = self.state.read();
        let subjects = state
            .subjects
            .iter()
            .map(|(subject, entry)| {
                (
                    subject.clone(),
                    SubjectSnapshot {
                        last_position: entry.last_position,
                        containment: entry
                            .containment
                            .iter()
                            .map(|(id, s)| (id.clone(), *s))
                            .collect(),
                    },
                )
            })
            .collect();
        ContainmentSnapshot { subjects }
    }
}
