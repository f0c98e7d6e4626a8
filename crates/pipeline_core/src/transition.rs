//! Stage transitions with optimistic local application.
//!
//! A transition moves the deal in the local store first, commits the whole
//! record to the remote and rolls the stage back if the commit fails or is
//! abandoned. At most one transition per deal is in flight; a second request
//! for the same deal is rejected until the first settles.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};

use shared::{
    domain::{Deal, DealId, DealInput},
    stages::{StageKey, UnknownStage},
};
use thiserror::Error;
use tokio::{
    runtime::Handle,
    sync::{broadcast, Mutex},
};
use tracing::{debug, info, warn};

use crate::{store::DealStore, Pipeline, PipelineEvent, PipelineState};

const ABANDONED_REASON: &str = "transition abandoned before the remote answered";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("deal {0} not found")]
    NotFound(DealId),
    #[error("invalid target stage {0:?}")]
    InvalidStage(String),
    #[error("deal {0} already has a stage change in flight")]
    TransitionInProgress(DealId),
    #[error(
        "failed to commit deal {deal_id} to {attempted_stage}, restored {original_stage}: {reason}"
    )]
    RemoteCommitFailed {
        deal_id: DealId,
        original_stage: StageKey,
        attempted_stage: StageKey,
        reason: String,
    },
}

impl TransitionError {
    /// Stage the view should show again after a failed commit.
    pub fn original_stage(&self) -> Option<StageKey> {
        match self {
            TransitionError::RemoteCommitFailed { original_stage, .. } => Some(*original_stage),
            _ => None,
        }
    }
}

/// Deal ids with a remote commit outstanding, mapped to the stage they were
/// optimistically moved to.
///
/// Has its own lock next to the async store lock so the marker can be
/// released from `Drop`. When both are needed the store lock is taken first.
#[derive(Debug, Clone, Default)]
pub(crate) struct InflightSet {
    targets: Arc<StdMutex<HashMap<DealId, StageKey>>>,
}

impl InflightSet {
    pub(crate) fn try_claim(&self, deal_id: &DealId, target: StageKey) -> Option<InflightClaim> {
        let mut targets = self
            .targets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if targets.contains_key(deal_id) {
            return None;
        }
        targets.insert(deal_id.clone(), target);
        Some(InflightClaim {
            targets: Arc::clone(&self.targets),
            deal_id: deal_id.clone(),
        })
    }

    pub(crate) fn contains(&self, deal_id: &DealId) -> bool {
        self.targets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(deal_id)
    }

    /// Optimistic stages still waiting on the remote.
    pub(crate) fn targets(&self) -> Vec<(DealId, StageKey)> {
        self.targets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(deal_id, target)| (deal_id.clone(), *target))
            .collect()
    }
}

pub(crate) struct InflightClaim {
    targets: Arc<StdMutex<HashMap<DealId, StageKey>>>,
    deal_id: DealId,
}

impl Drop for InflightClaim {
    fn drop(&mut self) {
        self.targets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.deal_id);
    }
}

/// An optimistic move whose commit has not settled.
///
/// Dropped while still armed (the transition future was cancelled), it
/// restores the origin stage and only then releases the in-flight marker.
struct PendingMove {
    claim: Option<InflightClaim>,
    state: Arc<Mutex<PipelineState>>,
    events: broadcast::Sender<PipelineEvent>,
    deal_id: DealId,
    origin: StageKey,
    target: StageKey,
}

impl PendingMove {
    /// Hands back the in-flight claim; dropping the move is then a no-op.
    fn disarm(mut self) -> Option<InflightClaim> {
        self.claim.take()
    }
}

impl Drop for PendingMove {
    fn drop(&mut self) {
        let Some(claim) = self.claim.take() else {
            return;
        };
        warn!(
            deal = %self.deal_id,
            from = %self.origin,
            to = %self.target,
            "pipeline: stage change abandoned, rolling back"
        );

        let rollback = AbandonedRollback {
            events: self.events.clone(),
            deal_id: self.deal_id.clone(),
            origin: self.origin,
            target: self.target,
        };
        if let Ok(mut state) = self.state.try_lock() {
            let metrics = rollback.apply(&mut state.store);
            drop(state);
            drop(claim);
            rollback.announce(metrics);
            return;
        }

        // Store is busy; finish on the runtime while the deal stays claimed.
        match Handle::try_current() {
            Ok(handle) => {
                let state = Arc::clone(&self.state);
                handle.spawn(async move {
                    let mut state = state.lock().await;
                    let metrics = rollback.apply(&mut state.store);
                    drop(state);
                    drop(claim);
                    rollback.announce(metrics);
                });
            }
            Err(_) => warn!(
                deal = %self.deal_id,
                "pipeline: no runtime to roll back abandoned stage change"
            ),
        }
    }
}

struct AbandonedRollback {
    events: broadcast::Sender<PipelineEvent>,
    deal_id: DealId,
    origin: StageKey,
    target: StageKey,
}

impl AbandonedRollback {
    fn apply(&self, store: &mut DealStore) -> crate::PipelineMetrics {
        restore_if_unchanged(store, &self.deal_id, self.origin, self.target);
        store.metrics().clone()
    }

    fn announce(&self, metrics: crate::PipelineMetrics) {
        let _ = self.events.send(PipelineEvent::TransitionRolledBack {
            deal_id: self.deal_id.clone(),
            restored: self.origin,
            attempted: self.target,
            reason: ABANDONED_REASON.to_string(),
        });
        let _ = self.events.send(PipelineEvent::BoardChanged(metrics));
    }
}

/// Puts the deal back on `origin` unless something else moved it since.
fn restore_if_unchanged(
    store: &mut DealStore,
    deal_id: &DealId,
    origin: StageKey,
    target: StageKey,
) -> bool {
    let still_moved = store
        .get(deal_id)
        .map(|deal| deal.stage == target)
        .unwrap_or(false);
    if still_moved {
        let _ = store.set_stage(deal_id, origin);
    }
    still_moved
}

impl Pipeline {
    /// Moves `deal_id` to the stage named `target`.
    pub async fn transition(&self, deal_id: &DealId, target: &str) -> Result<Deal, TransitionError> {
        self.run_transition(deal_id, target.parse()).await
    }

    pub async fn transition_to(
        &self,
        deal_id: &DealId,
        target: StageKey,
    ) -> Result<Deal, TransitionError> {
        self.run_transition(deal_id, Ok(target)).await
    }

    pub fn is_in_flight(&self, deal_id: &DealId) -> bool {
        self.inflight.contains(deal_id)
    }

    async fn run_transition(
        &self,
        deal_id: &DealId,
        target: Result<StageKey, UnknownStage>,
    ) -> Result<Deal, TransitionError> {
        let (pending, moved, metrics) = {
            let mut state = self.inner.lock().await;
            let current = state
                .store
                .get(deal_id)
                .map_err(|_| TransitionError::NotFound(deal_id.clone()))?;
            let target = target.map_err(|UnknownStage(raw)| TransitionError::InvalidStage(raw))?;

            if current.stage == target {
                debug!(deal = %deal_id, stage = %target, "pipeline: transition is a no-op");
                return Ok(current.clone());
            }

            let claim = self
                .inflight
                .try_claim(deal_id, target)
                .ok_or_else(|| TransitionError::TransitionInProgress(deal_id.clone()))?;

            if current.stage.is_terminal() {
                debug!(
                    deal = %deal_id,
                    from = %current.stage,
                    to = %target,
                    "pipeline: moving deal out of a terminal stage"
                );
            }

            let mut moved = current.clone();
            moved.stage = target;
            let origin = state
                .store
                .set_stage(deal_id, target)
                .map_err(|_| TransitionError::NotFound(deal_id.clone()))?;
            let pending = PendingMove {
                claim: Some(claim),
                state: Arc::clone(&self.inner),
                events: self.events.clone(),
                deal_id: deal_id.clone(),
                origin,
                target,
            };
            (pending, moved, state.store.metrics().clone())
        };
        let (origin, target) = (pending.origin, pending.target);

        let _ = self.events.send(PipelineEvent::BoardChanged(metrics));

        let commit = self
            .remote
            .update_deal(deal_id, &DealInput::from(&moved))
            .await;

        match commit {
            Ok(echo) => {
                // Committed remotely; cancellation past this point must not roll back.
                let claim = pending.disarm();
                let (settled, metrics) = {
                    let mut state = self.inner.lock().await;
                    let still_moved = state
                        .store
                        .get(deal_id)
                        .map(|deal| deal.stage == target)
                        .unwrap_or(false);
                    if still_moved && echo.id == *deal_id && state.store.upsert(echo.clone()) {
                        (echo, Some(state.store.metrics().clone()))
                    } else {
                        (moved, None)
                    }
                };
                drop(claim);

                info!(deal = %deal_id, from = %origin, to = %target, "pipeline: stage change committed");
                let _ = self.events.send(PipelineEvent::TransitionCommitted {
                    deal_id: deal_id.clone(),
                    from: origin,
                    to: target,
                });
                if let Some(metrics) = metrics {
                    let _ = self.events.send(PipelineEvent::BoardChanged(metrics));
                }
                Ok(settled)
            }
            Err(err) => {
                let reason = format!("{err:#}");
                let metrics = {
                    let mut state = self.inner.lock().await;
                    restore_if_unchanged(&mut state.store, deal_id, origin, target);
                    state.store.metrics().clone()
                };
                drop(pending.disarm());

                warn!(
                    deal = %deal_id,
                    from = %origin,
                    to = %target,
                    error = %reason,
                    "pipeline: stage change rejected, rolled back"
                );
                let _ = self.events.send(PipelineEvent::TransitionRolledBack {
                    deal_id: deal_id.clone(),
                    restored: origin,
                    attempted: target,
                    reason: reason.clone(),
                });
                let _ = self.events.send(PipelineEvent::BoardChanged(metrics));

                Err(TransitionError::RemoteCommitFailed {
                    deal_id: deal_id.clone(),
                    original_stage: origin,
                    attempted_stage: target,
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/transition_tests.rs"]
mod tests;
