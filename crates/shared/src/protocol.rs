use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Server-side dashboard rollup from `/api/analytics/dashboard`.
///
/// Lead counters come from the lead collection, not from deals.
/// `conversion_rate` is a percentage computed by the server as
/// `won_deals / total_deals * 100`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub total_leads: u64,
    pub total_contacts: u64,
    pub total_deals: u64,
    pub won_deals: u64,
    pub pipeline_value: Decimal,
    pub conversion_rate: f64,
    #[serde(default, rename = "lead_stages")]
    pub lead_stages_breakdown: BTreeMap<String, u64>,
}
