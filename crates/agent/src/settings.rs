//! Agent settings, derived from configuration.

use crucible_config::AppConfig;
use crucible_core::usage::ModelPricing;

use crate::doom_loop::DOOM_LOOP_THRESHOLD;

/// Everything one agent session needs to know about its limits.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Backend calls allowed per turn
    pub max_iterations: u32,
    pub auto_approve: bool,
    pub parallel_tool_calls: bool,
    pub system_prompt: String,
    /// Results longer than this (characters) go to the result store
    pub threshold_chars: usize,
    pub preview_chars: usize,
    pub default_peek_limit: usize,
    /// Result store capacity (0 = unbounded)
    pub max_stored_results: usize,
    pub doom_loop_threshold: u32,
    pub pricing: Option<ModelPricing>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            auto_approve: false,
            parallel_tool_calls: true,
            system_prompt: String::new(),
            threshold_chars: 32_000,
            preview_chars: 2_000,
            default_peek_limit: 4_000,
            max_stored_results: 64,
            doom_loop_threshold: DOOM_LOOP_THRESHOLD,
            pricing: None,
        }
    }
}

impl AgentSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_iterations: config.agent.max_iterations,
            auto_approve: config.agent.auto_approve,
            parallel_tool_calls: config.agent.parallel_tool_calls,
            system_prompt: config.agent.system_prompt.clone(),
            threshold_chars: config.result_store.threshold_chars,
            preview_chars: config.result_store.preview_chars,
            default_peek_limit: config.result_store.default_peek_limit,
            max_stored_results: config.result_store.max_entries,
            doom_loop_threshold: config.doom_loop.threshold,
            pricing: config.model_pricing().cloned(),
        }
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_auto_approve(mut self, enabled: bool) -> Self {
        self.auto_approve = enabled;
        self
    }

    pub fn with_parallel_tool_calls(mut self, enabled: bool) -> Self {
        self.parallel_tool_calls = enabled;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_threshold_chars(mut self, threshold: usize) -> Self {
        self.threshold_chars = threshold;
        self
    }

    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing = Some(pricing);
        self
    }
}
