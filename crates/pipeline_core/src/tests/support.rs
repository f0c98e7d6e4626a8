use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use shared::{
    domain::{Contact, ContactId, Deal, DealId, DealInput},
    protocol::DashboardSummary,
    stages::StageKey,
};
use tokio::sync::{Mutex, Notify};

use crate::remote::CrmRemote;

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).single().expect("epoch")
}

pub(crate) fn deal(id: &str, stage: StageKey, value: Decimal) -> Deal {
    deal_created(id, stage, value, 0)
}

pub(crate) fn deal_created(id: &str, stage: StageKey, value: Decimal, minutes: i64) -> Deal {
    Deal {
        id: DealId::new(id),
        title: format!("Deal {id}"),
        value,
        expected_close_date: epoch() + Duration::days(30),
        contact_id: ContactId::new("c-1"),
        stage,
        description: None,
        created_by: Some("u-1".into()),
        created_at: epoch() + Duration::minutes(minutes),
        updated_at: None,
    }
}

pub(crate) fn contact(id: &str, name: &str) -> Contact {
    Contact {
        id: ContactId::new(id),
        name: name.into(),
        email: format!("{id}@example.com"),
        phone: None,
        company: None,
        position: None,
        created_at: None,
    }
}

/// In-memory remote that records every commit.
///
/// With a gate installed, `update_deal` parks after recording the request
/// until the test releases it, which keeps a transition in flight.
pub(crate) struct ScriptedRemote {
    pub(crate) deals: Vec<Deal>,
    pub(crate) contacts: Vec<Contact>,
    pub(crate) fail_updates_with: Option<String>,
    pub(crate) fail_fetch_with: Option<String>,
    pub(crate) updates: Arc<Mutex<Vec<(DealId, DealInput)>>>,
    pub(crate) created: Arc<Mutex<Vec<DealInput>>>,
    pub(crate) update_started: Arc<Notify>,
    pub(crate) update_gate: Option<Arc<Notify>>,
}

impl ScriptedRemote {
    pub(crate) fn ok() -> Self {
        Self {
            deals: Vec::new(),
            contacts: Vec::new(),
            fail_updates_with: None,
            fail_fetch_with: None,
            updates: Arc::new(Mutex::new(Vec::new())),
            created: Arc::new(Mutex::new(Vec::new())),
            update_started: Arc::new(Notify::new()),
            update_gate: None,
        }
    }

    pub(crate) fn rejecting_updates(err: impl Into<String>) -> Self {
        let mut remote = Self::ok();
        remote.fail_updates_with = Some(err.into());
        remote
    }

    pub(crate) fn with_board(mut self, deals: Vec<Deal>, contacts: Vec<Contact>) -> Self {
        self.deals = deals;
        self.contacts = contacts;
        self
    }

    pub(crate) fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.update_gate = Some(Arc::clone(&gate));
        (self, gate)
    }
}

#[async_trait]
impl CrmRemote for ScriptedRemote {
    async fn fetch_deals(&self) -> Result<Vec<Deal>> {
        if let Some(err) = &self.fail_fetch_with {
            return Err(anyhow!(err.clone()));
        }
        Ok(self.deals.clone())
    }

    async fn fetch_contacts(&self) -> Result<Vec<Contact>> {
        if let Some(err) = &self.fail_fetch_with {
            return Err(anyhow!(err.clone()));
        }
        Ok(self.contacts.clone())
    }

    async fn create_deal(&self, input: &DealInput) -> Result<Deal> {
        self.created.lock().await.push(input.clone());
        Ok(Deal {
            id: DealId::new(uuid::Uuid::new_v4().to_string()),
            title: input.title.clone(),
            value: input.value,
            expected_close_date: input.expected_close_date,
            contact_id: input.contact_id.clone(),
            stage: input.stage,
            description: input.description.clone(),
            created_by: Some("u-1".into()),
            created_at: Utc::now(),
            updated_at: None,
        })
    }

    async fn update_deal(&self, deal_id: &DealId, input: &DealInput) -> Result<Deal> {
        self.updates
            .lock()
            .await
            .push((deal_id.clone(), input.clone()));
        self.update_started.notify_one();

        if let Some(gate) = &self.update_gate {
            gate.notified().await;
        }

        if let Some(err) = &self.fail_updates_with {
            return Err(anyhow!(err.clone()));
        }

        let mut updated = deal(deal_id.as_str(), input.stage, input.value);
        updated.title = input.title.clone();
        updated.contact_id = input.contact_id.clone();
        updated.description = input.description.clone();
        updated.updated_at = Some(Utc::now());
        Ok(updated)
    }

    async fn fetch_dashboard_summary(&self) -> Result<DashboardSummary> {
        if let Some(err) = &self.fail_fetch_with {
            return Err(anyhow!(err.clone()));
        }
        Ok(DashboardSummary {
            total_leads: 3,
            total_contacts: self.contacts.len() as u64,
            total_deals: self.deals.len() as u64,
            won_deals: self
                .deals
                .iter()
                .filter(|deal| deal.stage == StageKey::Won)
                .count() as u64,
            pipeline_value: self
                .deals
                .iter()
                .filter(|deal| !deal.stage.is_terminal())
                .map(|deal| deal.value)
                .sum(),
            conversion_rate: 0.0,
            lead_stages_breakdown: Default::default(),
        })
    }
}
