use std::sync::Arc;

use futures::future::try_join;
use shared::{
    domain::{Contact, ContactId, Deal, DealId, DealInput, DealInputError},
    protocol::DashboardSummary,
    stages::{stages, Stage, StageKey},
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

pub mod drag;
pub mod http;
pub mod metrics;
pub mod remote;
pub mod store;
pub mod transition;

pub use drag::{ActiveDrag, DragError, DragSession};
pub use http::{HttpCrmRemote, HttpRemoteOptions};
pub use metrics::{compute_metrics, PipelineMetrics, StageMetrics};
pub use remote::{CrmRemote, MissingCrmRemote};
pub use store::{DealStore, StoreError};
pub use transition::TransitionError;

use transition::InflightSet;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid deal input: {0}")]
    InvalidInput(#[from] DealInputError),
    #[error("{operation} failed: {source:#}")]
    Remote {
        operation: &'static str,
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Metrics after any store mutation, including optimistic moves.
    BoardChanged(PipelineMetrics),
    TransitionCommitted {
        deal_id: DealId,
        from: StageKey,
        to: StageKey,
    },
    TransitionRolledBack {
        deal_id: DealId,
        restored: StageKey,
        attempted: StageKey,
        reason: String,
    },
    DealCreated(Deal),
    DealRemoved(DealId),
}

#[derive(Debug, Clone)]
pub struct DealCard {
    pub deal: Deal,
    pub contact_name: String,
}

#[derive(Debug, Clone)]
pub struct BoardColumn {
    pub stage: &'static Stage,
    pub metrics: StageMetrics,
    pub cards: Vec<DealCard>,
}

#[derive(Debug, Clone)]
pub struct BoardSnapshot {
    pub metrics: PipelineMetrics,
    pub columns: Vec<BoardColumn>,
}

struct PipelineState {
    store: DealStore,
}

/// Deal board bound to one remote CRM.
///
/// Owns the board's [`DealStore`]; every component that needs deal data goes
/// through the same `Arc<Pipeline>`.
pub struct Pipeline {
    remote: Arc<dyn CrmRemote>,
    inner: Arc<Mutex<PipelineState>>,
    inflight: InflightSet,
    events: broadcast::Sender<PipelineEvent>,
}

impl Pipeline {
    pub fn new(remote: Arc<dyn CrmRemote>) -> Arc<Self> {
        Self::with_store(remote, DealStore::new())
    }

    pub fn with_store(remote: Arc<dyn CrmRemote>, store: DealStore) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            remote,
            inner: Arc::new(Mutex::new(PipelineState { store })),
            inflight: InflightSet::default(),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Reloads deals and contacts from the remote. The store is untouched if
    /// either request fails. Deals with a commit in flight keep their
    /// optimistic stage until that commit settles.
    pub async fn refresh(&self) -> Result<PipelineMetrics, PipelineError> {
        let (deals, contacts) =
            try_join(self.remote.fetch_deals(), self.remote.fetch_contacts())
                .await
                .map_err(|source| PipelineError::Remote {
                    operation: "refresh",
                    source,
                })?;

        let (deal_count, contact_count) = (deals.len(), contacts.len());
        let metrics = {
            let mut state = self.inner.lock().await;
            state.store.load(deals, contacts);
            for (deal_id, target) in self.inflight.targets() {
                if state.store.set_stage(&deal_id, target).is_ok() {
                    debug!(
                        deal = %deal_id,
                        stage = %target,
                        "pipeline: kept in-flight stage over reload"
                    );
                }
            }
            state.store.metrics().clone()
        };
        info!(
            deals = deal_count,
            contacts = contact_count,
            "pipeline: board loaded"
        );
        let _ = self.events.send(PipelineEvent::BoardChanged(metrics.clone()));
        Ok(metrics)
    }

    pub async fn create_deal(&self, input: DealInput) -> Result<Deal, PipelineError> {
        input.validate()?;
        let deal = self
            .remote
            .create_deal(&input)
            .await
            .map_err(|source| PipelineError::Remote {
                operation: "create deal",
                source,
            })?;

        let metrics = {
            let mut state = self.inner.lock().await;
            state.store.upsert(deal.clone());
            state.store.metrics().clone()
        };
        info!(deal = %deal.id, stage = %deal.stage, "pipeline: deal created");
        let _ = self.events.send(PipelineEvent::DealCreated(deal.clone()));
        let _ = self.events.send(PipelineEvent::BoardChanged(metrics));
        Ok(deal)
    }

    /// Applies a record produced by an external edit. Returns `false` when
    /// the store refused it.
    pub async fn upsert_deal(&self, deal: Deal) -> bool {
        let (stored, metrics) = {
            let mut state = self.inner.lock().await;
            let stored = state.store.upsert(deal);
            (stored, state.store.metrics().clone())
        };
        if stored {
            let _ = self.events.send(PipelineEvent::BoardChanged(metrics));
        }
        stored
    }

    pub async fn remove_deal(&self, deal_id: &DealId) -> Option<Deal> {
        let (removed, metrics) = {
            let mut state = self.inner.lock().await;
            let removed = state.store.remove(deal_id);
            (removed, state.store.metrics().clone())
        };
        if removed.is_some() {
            let _ = self.events.send(PipelineEvent::DealRemoved(deal_id.clone()));
            let _ = self.events.send(PipelineEvent::BoardChanged(metrics));
        }
        removed
    }

    pub async fn upsert_contact(&self, contact: Contact) {
        self.inner.lock().await.store.upsert_contact(contact);
    }

    pub async fn deal(&self, deal_id: &DealId) -> Result<Deal, StoreError> {
        self.inner.lock().await.store.get(deal_id).cloned()
    }

    pub async fn contact_name(&self, contact_id: &ContactId) -> String {
        self.inner
            .lock()
            .await
            .store
            .contact_name(contact_id)
            .to_string()
    }

    pub async fn metrics(&self) -> PipelineMetrics {
        self.inner.lock().await.store.metrics().clone()
    }

    pub async fn snapshot(&self) -> BoardSnapshot {
        let state = self.inner.lock().await;
        let store = &state.store;
        let columns = stages()
            .iter()
            .map(|stage| BoardColumn {
                stage,
                metrics: *store.metrics().stage(stage.key),
                cards: store
                    .deals_in_stage(stage.key)
                    .into_iter()
                    .map(|deal| DealCard {
                        contact_name: store.contact_name(&deal.contact_id).to_string(),
                        deal: deal.clone(),
                    })
                    .collect(),
            })
            .collect();
        BoardSnapshot {
            metrics: store.metrics().clone(),
            columns,
        }
    }

    pub async fn dashboard_summary(&self) -> Result<DashboardSummary, PipelineError> {
        self.remote
            .fetch_dashboard_summary()
            .await
            .map_err(|source| PipelineError::Remote {
                operation: "dashboard summary",
                source,
            })
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
