//! Per-stage and global deal metrics.
//!
//! [`compute_metrics`] is a pure function of its input: a single pass that
//! fills one bucket per registry stage and derives every rollup from the
//! same traversal.

use rust_decimal::Decimal;
use serde::Serialize;
use shared::{
    domain::Deal,
    stages::{StageKey, STAGE_COUNT},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageMetrics {
    pub stage: StageKey,
    pub deal_count: usize,
    pub total_value: Decimal,
}

impl StageMetrics {
    fn empty(stage: StageKey) -> Self {
        Self {
            stage,
            deal_count: 0,
            total_value: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineMetrics {
    by_stage: [StageMetrics; STAGE_COUNT],
    pub total_deals: usize,
    pub open_count: usize,
    pub won_count: usize,
    pub lost_count: usize,
    /// Value of deals still in an open (non-terminal) stage.
    pub pipeline_value: Decimal,
    pub won_value: Decimal,
    /// `won / (total - lost)`, in `[0, 1]`; zero when nothing is countable.
    pub conversion_rate: f64,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        compute_metrics(std::iter::empty())
    }
}

impl PipelineMetrics {
    pub fn stage(&self, stage: StageKey) -> &StageMetrics {
        &self.by_stage[stage.index()]
    }

    /// Buckets in registry display order.
    pub fn stages(&self) -> &[StageMetrics] {
        &self.by_stage
    }

    pub fn conversion_rate_percent(&self) -> f64 {
        self.conversion_rate * 100.0
    }
}

pub fn compute_metrics<'a, I>(deals: I) -> PipelineMetrics
where
    I: IntoIterator<Item = &'a Deal>,
{
    let mut by_stage = StageKey::ALL.map(StageMetrics::empty);
    let mut total_deals = 0usize;

    for deal in deals {
        let bucket = &mut by_stage[deal.stage.index()];
        bucket.deal_count += 1;
        bucket.total_value += deal.value;
        total_deals += 1;
    }

    let won = by_stage[StageKey::Won.index()];
    let lost = by_stage[StageKey::Lost.index()];
    let pipeline_value = by_stage
        .iter()
        .filter(|bucket| !bucket.stage.is_terminal())
        .map(|bucket| bucket.total_value)
        .sum();

    let countable = total_deals - lost.deal_count;
    let conversion_rate = if countable == 0 {
        0.0
    } else {
        won.deal_count as f64 / countable as f64
    };

    PipelineMetrics {
        by_stage,
        total_deals,
        open_count: total_deals - won.deal_count - lost.deal_count,
        won_count: won.deal_count,
        lost_count: lost.deal_count,
        pipeline_value,
        won_value: won.total_value,
        conversion_rate,
    }
}

#[cfg(test)]
#[path = "tests/metrics_tests.rs"]
mod tests;
