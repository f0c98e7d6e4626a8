use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{Contact, Deal, DealId, DealInput},
    protocol::DashboardSummary,
};

/// Authoritative CRM store the pipeline synchronises with.
///
/// `update_deal` always receives the complete record; implementations must
/// not treat it as a patch.
#[async_trait]
pub trait CrmRemote: Send + Sync {
    async fn fetch_deals(&self) -> Result<Vec<Deal>>;
    async fn fetch_contacts(&self) -> Result<Vec<Contact>>;
    async fn create_deal(&self, input: &DealInput) -> Result<Deal>;
    async fn update_deal(&self, deal_id: &DealId, input: &DealInput) -> Result<Deal>;
    async fn fetch_dashboard_summary(&self) -> Result<DashboardSummary>;
}

pub struct MissingCrmRemote;

#[async_trait]
impl CrmRemote for MissingCrmRemote {
    async fn fetch_deals(&self) -> Result<Vec<Deal>> {
        Err(anyhow!("crm backend unavailable"))
    }

    async fn fetch_contacts(&self) -> Result<Vec<Contact>> {
        Err(anyhow!("crm backend unavailable"))
    }

    async fn create_deal(&self, _input: &DealInput) -> Result<Deal> {
        Err(anyhow!("crm backend unavailable"))
    }

    async fn update_deal(&self, deal_id: &DealId, _input: &DealInput) -> Result<Deal> {
        Err(anyhow!("crm backend unavailable for deal {deal_id}"))
    }

    async fn fetch_dashboard_summary(&self) -> Result<DashboardSummary> {
        Err(anyhow!("analytics backend unavailable"))
    }
}
