//! In-memory cache of deals and the contacts they reference.
//!
//! The store keeps a stage partition of deal ids next to the deal map and
//! refreshes its cached [`PipelineMetrics`] after every mutation, so readers
//! never see metrics older than the last write. Records with a negative
//! value are refused so stage totals never go below zero.

use std::collections::{BTreeSet, HashMap};

use rust_decimal::Decimal;
use shared::{
    domain::{Contact, ContactId, Deal, DealId, UNKNOWN_CONTACT},
    stages::{StageKey, STAGE_COUNT},
};
use thiserror::Error;
use tracing::warn;

use crate::metrics::{compute_metrics, PipelineMetrics};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("deal {0} not found")]
    NotFound(DealId),
}

#[derive(Debug, Clone)]
pub struct DealStore {
    deals: HashMap<DealId, Deal>,
    by_stage: [BTreeSet<DealId>; STAGE_COUNT],
    contacts: HashMap<ContactId, Contact>,
    metrics: PipelineMetrics,
}

impl Default for DealStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DealStore {
    pub fn new() -> Self {
        Self {
            deals: HashMap::new(),
            by_stage: Default::default(),
            contacts: HashMap::new(),
            metrics: PipelineMetrics::default(),
        }
    }

    /// Replaces the whole cache. Later duplicates of an id win; refused
    /// records are skipped.
    pub fn load(
        &mut self,
        deals: impl IntoIterator<Item = Deal>,
        contacts: impl IntoIterator<Item = Contact>,
    ) {
        self.deals.clear();
        self.by_stage.iter_mut().for_each(BTreeSet::clear);
        for deal in deals.into_iter().filter(admissible) {
            self.insert_partitioned(deal);
        }
        self.contacts = contacts
            .into_iter()
            .map(|contact| (contact.id.clone(), contact))
            .collect();
        self.recompute();
    }

    pub fn get(&self, deal_id: &DealId) -> Result<&Deal, StoreError> {
        self.deals
            .get(deal_id)
            .ok_or_else(|| StoreError::NotFound(deal_id.clone()))
    }

    pub fn contains(&self, deal_id: &DealId) -> bool {
        self.deals.contains_key(deal_id)
    }

    /// Inserts or replaces a deal. Returns `false`, leaving the store as it
    /// was, when the record is refused.
    pub fn upsert(&mut self, deal: Deal) -> bool {
        if !admissible(&deal) {
            return false;
        }
        self.insert_partitioned(deal);
        self.recompute();
        true
    }

    /// Evicts a deal. Absent ids are ignored.
    pub fn remove(&mut self, deal_id: &DealId) -> Option<Deal> {
        let removed = self.deals.remove(deal_id)?;
        self.by_stage[removed.stage.index()].remove(deal_id);
        self.recompute();
        Some(removed)
    }

    /// Moves a deal to `stage` and returns the stage it held before.
    pub fn set_stage(&mut self, deal_id: &DealId, stage: StageKey) -> Result<StageKey, StoreError> {
        let deal = self
            .deals
            .get_mut(deal_id)
            .ok_or_else(|| StoreError::NotFound(deal_id.clone()))?;
        let previous = deal.stage;
        if previous != stage {
            deal.stage = stage;
            self.by_stage[previous.index()].remove(deal_id);
            self.by_stage[stage.index()].insert(deal_id.clone());
            self.recompute();
        }
        Ok(previous)
    }

    pub fn upsert_contact(&mut self, contact: Contact) {
        self.contacts.insert(contact.id.clone(), contact);
    }

    pub fn contact(&self, contact_id: &ContactId) -> Option<&Contact> {
        self.contacts.get(contact_id)
    }

    pub fn contact_name(&self, contact_id: &ContactId) -> &str {
        self.contacts
            .get(contact_id)
            .map(|contact| contact.name.as_str())
            .unwrap_or(UNKNOWN_CONTACT)
    }

    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.values()
    }

    pub fn deals(&self) -> impl Iterator<Item = &Deal> {
        self.deals.values()
    }

    /// Deals currently in `stage`, oldest first.
    pub fn deals_in_stage(&self, stage: StageKey) -> Vec<&Deal> {
        let mut deals: Vec<&Deal> = self.by_stage[stage.index()]
            .iter()
            .filter_map(|deal_id| self.deals.get(deal_id))
            .collect();
        deals.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        deals
    }

    pub fn stage_ids(&self, stage: StageKey) -> &BTreeSet<DealId> {
        &self.by_stage[stage.index()]
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn len(&self) -> usize {
        self.deals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deals.is_empty()
    }

    fn insert_partitioned(&mut self, deal: Deal) {
        let stage = deal.stage;
        let deal_id = deal.id.clone();
        if let Some(previous) = self.deals.insert(deal_id.clone(), deal) {
            self.by_stage[previous.stage.index()].remove(&deal_id);
        }
        self.by_stage[stage.index()].insert(deal_id);
    }

    fn recompute(&mut self) {
        self.metrics = compute_metrics(self.deals.values());
    }
}

fn admissible(deal: &Deal) -> bool {
    if deal.value < Decimal::ZERO {
        warn!(deal = %deal.id, value = %deal.value, "store: refusing deal with negative value");
        return false;
    }
    true
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
