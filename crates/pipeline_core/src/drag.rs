//! Drag-and-drop gesture tracking for the deal board.

use shared::{
    domain::{Deal, DealId},
    stages::StageKey,
};
use thiserror::Error;
use tracing::debug;

use crate::{transition::TransitionError, Pipeline};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDrag {
    pub deal_id: DealId,
    pub origin_stage: StageKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DragError {
    #[error("a drag is already active for deal {0}")]
    AlreadyActive(DealId),
    #[error("no drag in progress")]
    NoActiveDrag,
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// At most one picked-up deal at a time.
#[derive(Debug, Default)]
pub struct DragSession {
    active: Option<ActiveDrag>,
}

impl DragSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, deal: &Deal) -> Result<(), DragError> {
        if let Some(active) = &self.active {
            return Err(DragError::AlreadyActive(active.deal_id.clone()));
        }
        debug!(deal = %deal.id, stage = %deal.stage, "drag: picked up");
        self.active = Some(ActiveDrag {
            deal_id: deal.id.clone(),
            origin_stage: deal.stage,
        });
        Ok(())
    }

    /// Drops the held deal on `target`. The session is cleared before the
    /// transition runs, so it ends empty whatever the outcome.
    pub async fn drop_on(&mut self, pipeline: &Pipeline, target: &str) -> Result<Deal, DragError> {
        let active = self.active.take().ok_or(DragError::NoActiveDrag)?;
        debug!(deal = %active.deal_id, from = %active.origin_stage, to = target, "drag: dropped");
        Ok(pipeline.transition(&active.deal_id, target).await?)
    }

    pub fn cancel(&mut self) -> Option<ActiveDrag> {
        let cancelled = self.active.take();
        if let Some(active) = &cancelled {
            debug!(deal = %active.deal_id, "drag: cancelled");
        }
        cancelled
    }

    pub fn active(&self) -> Option<&ActiveDrag> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

#[cfg(test)]
#[path = "tests/drag_tests.rs"]
mod tests;
