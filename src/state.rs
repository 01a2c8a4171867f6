use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::models::{EndpointState, ProbeOutcome, TransitionEvent};

/// Tracks the availability status of every configured target.
///
/// Each target gets one slot behind its own mutex; the slot map itself never
/// changes after construction, so commits for different targets never contend
/// with each other.
pub struct StateStore {
    slots: HashMap<String, Mutex<EndpointState>>,
}

impl StateStore {
    pub fn new(targets: impl IntoIterator<Item = String>) -> Self {
        let slots = targets
            .into_iter()
            .map(|label| (label, Mutex::new(EndpointState::default())))
            .collect();
        Self { slots }
    }

    /// Commits one probe outcome. Mutates the slot only when the observed
    /// status differs from the stored one, so `since` keeps pointing at the
    /// start of the current continuous run.
    pub async fn apply(
        &self,
        target: &str,
        outcome: ProbeOutcome,
        now: DateTime<Utc>,
    ) -> Option<TransitionEvent> {
        let slot = self
            .slots
            .get(target)
            .expect("target not registered in state store");
        let mut state = slot.lock().await;

        let new_status = outcome.status();
        if state.status == new_status {
            return None;
        }

        let old_status = state.status;
        *state = EndpointState {
            status: new_status,
            since: Some(now),
        };
        Some(TransitionEvent {
            target: target.to_string(),
            old_status,
            new_status,
            at: now,
        })
    }

    /// Point-in-time copy of every slot, sorted by target label.
    pub async fn snapshot(&self) -> Vec<(String, EndpointState)> {
        let mut entries = Vec::with_capacity(self.slots.len());
        for (label, slot) in &self.slots {
            entries.push((label.clone(), *slot.lock().await));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    #[cfg(test)]
    pub async fn get(&self, target: &str) -> EndpointState {
        *self.slots.get(target).expect("unknown target").lock().await
    }
}
