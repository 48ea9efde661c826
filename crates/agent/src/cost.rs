//! Per-turn and per-session cost accounting.

use crucible_core::usage::{ModelPricing, UsageInfo};
use tracing::debug;

/// Folds backend usage into turn and session totals.
///
/// Without pricing every cost is zero, but token totals are still kept.
#[derive(Debug, Default)]
pub struct CostTracker {
    pricing: Option<ModelPricing>,
    turn_usage: UsageInfo,
    turn_cost: f64,
    session_usage: UsageInfo,
    session_cost: f64,
}

impl CostTracker {
    pub fn new(pricing: Option<ModelPricing>) -> Self {
        Self {
            pricing,
            ..Self::default()
        }
    }

    /// Start a new turn. Session totals are kept.
    pub fn begin_turn(&mut self) {
        self.turn_usage = UsageInfo::default();
        self.turn_cost = 0.0;
    }

    /// Record the usage of one backend call and return its cost.
    pub fn record(&mut self, usage: &UsageInfo) -> f64 {
        let cost = self.pricing.as_ref().map_or(0.0, |p| p.cost(usage));
        self.turn_usage += *usage;
        self.turn_cost += cost;
        self.session_usage += *usage;
        self.session_cost += cost;
        debug!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost,
            session_cost = self.session_cost,
            "Recorded usage"
        );
        cost
    }

    pub fn turn_usage(&self) -> UsageInfo {
        self.turn_usage
    }

    pub fn turn_cost(&self) -> f64 {
        self.turn_cost
    }

    pub fn session_usage(&self) -> UsageInfo {
        self.session_usage
    }

    pub fn session_cost(&self) -> f64 {
        self.session_cost
    }

    /// Seed session totals from a persisted session.
    pub fn resume(&mut self, usage: UsageInfo, cost: f64) {
        self.reset();
        self.session_usage = usage;
        self.session_cost = cost;
    }

    /// Zero every total. Pricing stays.
    pub fn reset(&mut self) {
        self.turn_usage = UsageInfo::default();
        self.turn_cost = 0.0;
        self.session_usage = UsageInfo::default();
        self.session_cost = 0.0;
    }
}
