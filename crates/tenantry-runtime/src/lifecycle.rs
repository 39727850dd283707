//! Entity Lifecycle State Machine
//!
//! Tracks the operational state of every entity instance, keyed by
//! `(type, id)`. Unknown keys are `UNLOADED`.
//!
//! Transitions (allowed from → intermediate → final):
//! - load: UNLOADED | ERROR → LOADING → ACTIVE
//! - suspend: ACTIVE → SUSPENDED
//! - resume: SUSPENDED → ACTIVE
//! - reload: ACTIVE → ACTIVE
//! - unload: ACTIVE | SUSPENDED | ERROR → UNLOADED
//!
//! A transition that is not allowed from the current state returns
//! `Err(Error::Entity)` before any handler runs. A handler failure moves the
//! entity to ERROR and is reported as a failed [`TransitionOutcome`], so a
//! failed load can simply be retried.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use tenantry_core::{Error, Result};
use tenantry_observability::Metrics;

/// Capacity of the lifecycle event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Unloaded,
    Loading,
    Active,
    Suspended,
    Error,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Unloaded => "UNLOADED",
            LifecycleState::Loading => "LOADING",
            LifecycleState::Active => "ACTIVE",
            LifecycleState::Suspended => "SUSPENDED",
            LifecycleState::Error => "ERROR",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Load,
    Suspend,
    Resume,
    Reload,
    Unload,
}

/// One row of the transition table
#[derive(Debug, Clone, Copy)]
pub struct TransitionRule {
    pub from: &'static [LifecycleState],
    pub intermediate: Option<LifecycleState>,
    pub to: LifecycleState,
}

impl Transition {
    pub const ALL: [Transition; 5] = [
        Transition::Load,
        Transition::Suspend,
        Transition::Resume,
        Transition::Reload,
        Transition::Unload,
    ];

    pub fn rule(&self) -> TransitionRule {
        use LifecycleState::*;
        match self {
            Transition::Load => TransitionRule {
                from: &[Unloaded, Error],
                intermediate: Some(Loading),
                to: Active,
            },
            Transition::Suspend => TransitionRule {
                from: &[Active],
                intermediate: None,
                to: Suspended,
            },
            Transition::Resume => TransitionRule {
                from: &[Suspended],
                intermediate: None,
                to: Active,
            },
            Transition::Reload => TransitionRule {
                from: &[Active],
                intermediate: None,
                to: Active,
            },
            Transition::Unload => TransitionRule {
                from: &[Active, Suspended, Error],
                intermediate: None,
                to: Unloaded,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Load => "load",
            Transition::Suspend => "suspend",
            Transition::Resume => "resume",
            Transition::Reload => "reload",
            Transition::Unload => "unload",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Transition::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("Unknown lifecycle transition '{}'", s)))
    }
}

/// Result of an allowed transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    pub success: bool,
    pub state: LifecycleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Broadcast after every applied transition
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    pub entity_type: String,
    pub entity_id: String,
    pub transition: Transition,
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub timestamp: DateTime<Utc>,
}

type StateKey = (String, String);

/// Per-entity lifecycle state machine
#[derive(Debug)]
pub struct EntityLifecycleManager {
    states: DashMap<StateKey, LifecycleState>,
    events: broadcast::Sender<LifecycleEvent>,
    metrics: Option<Arc<Metrics>>,
}

impl Default for EntityLifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityLifecycleManager {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            states: DashMap::new(),
            events,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Current state, `UNLOADED` for unknown keys
    pub fn get_state(&self, entity_type: &str, entity_id: &str) -> LifecycleState {
        self.states
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .map(|s| *s)
            .unwrap_or(LifecycleState::Unloaded)
    }

    /// Whether `transition` is allowed from the current state
    pub fn can_transition(&self, entity_type: &str, entity_id: &str, transition: Transition) -> bool {
        transition
            .rule()
            .from
            .contains(&self.get_state(entity_type, entity_id))
    }

    /// Apply a transition with no handler
    pub async fn transition(
        &self,
        entity_type: &str,
        entity_id: &str,
        transition: Transition,
    ) -> Result<TransitionOutcome> {
        self.transition_with(entity_type, entity_id, transition, || async { Ok(()) })
            .await
    }

    /// Apply a transition, running `handler` between the intermediate and final state
    ///
    /// # Errors
    /// `Error::Entity` if the transition is not allowed from the current
    /// state. Handler failures are not errors; they yield an unsuccessful
    /// outcome with the entity left in `ERROR`.
    pub async fn transition_with<F, Fut>(
        &self,
        entity_type: &str,
        entity_id: &str,
        transition: Transition,
        handler: F,
    ) -> Result<TransitionOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let rule = transition.rule();
        let key = (entity_type.to_string(), entity_id.to_string());
        let from = self.begin(&key, transition, &rule)?;

        debug!(
            entity_type,
            entity_id,
            transition = %transition,
            from = %from,
            "Lifecycle transition started"
        );

        let outcome = match handler().await {
            Ok(()) => {
                self.states.insert(key, rule.to);
                info!(
                    entity_type,
                    entity_id,
                    transition = %transition,
                    "Entity {} → {}",
                    from,
                    rule.to
                );
                TransitionOutcome {
                    success: true,
                    state: rule.to,
                    error: None,
                }
            }
            Err(e) => {
                self.states.insert(key, LifecycleState::Error);
                warn!(
                    entity_type,
                    entity_id,
                    transition = %transition,
                    "Entity {} → ERROR: {}",
                    from,
                    e
                );
                TransitionOutcome {
                    success: false,
                    state: LifecycleState::Error,
                    error: Some(e.to_string()),
                }
            }
        };

        self.record(transition, if outcome.success { "success" } else { "failure" });
        // No subscribers is fine
        let _ = self.events.send(LifecycleEvent {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            transition,
            from,
            to: outcome.state,
            timestamp: Utc::now(),
        });

        Ok(outcome)
    }

    /// Check the current state and move to the intermediate state in one step
    fn begin(
        &self,
        key: &StateKey,
        transition: Transition,
        rule: &TransitionRule,
    ) -> Result<LifecycleState> {
        let current = match self.states.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let current = *entry.get();
                if rule.from.contains(&current) {
                    if let Some(intermediate) = rule.intermediate {
                        entry.insert(intermediate);
                    }
                    return Ok(current);
                }
                current
            }
            Entry::Vacant(entry) => {
                let current = LifecycleState::Unloaded;
                if rule.from.contains(&current) {
                    if let Some(intermediate) = rule.intermediate {
                        entry.insert(intermediate);
                    }
                    return Ok(current);
                }
                current
            }
        };

        self.record(transition, "rejected");
        Err(Error::entity(
            &key.0,
            &key.1,
            format!("Cannot {} entity in state {}", transition, current),
        ))
    }

    fn record(&self, transition: Transition, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(transition.as_str(), outcome);
        }
    }

    /// Snapshot of every tracked state as `{type: {id: state}}`
    pub fn get_all_entity_states(&self) -> BTreeMap<String, BTreeMap<String, LifecycleState>> {
        let mut all: BTreeMap<String, BTreeMap<String, LifecycleState>> = BTreeMap::new();
        for entry in self.states.iter() {
            let (entity_type, entity_id) = entry.key();
            all.entry(entity_type.clone())
                .or_default()
                .insert(entity_id.clone(), *entry.value());
        }
        all
    }

    /// Number of tracked entities per state
    pub fn state_counts(&self) -> HashMap<LifecycleState, usize> {
        let mut counts = HashMap::new();
        for entry in self.states.iter() {
            *counts.entry(*entry.value()).or_insert(0) += 1;
        }
        counts
    }

    /// Forget an entity's state; it reads as `UNLOADED` afterwards
    pub fn clear_state(&self, entity_type: &str, entity_id: &str) -> bool {
        self.states
            .remove(&(entity_type.to_string(), entity_id.to_string()))
            .is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }
}
