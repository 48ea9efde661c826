//! Token usage and per-model pricing.
//!
//! `UsageInfo` is additive: component-wise addition with the zero value as
//! identity, so per-call usage folds into per-turn and per-session totals.

use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Token counts reported by a backend for one response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageInfo {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
}

impl UsageInfo {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Self::default()
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl Add for UsageInfo {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            cache_read_tokens: self.cache_read_tokens + rhs.cache_read_tokens,
            cache_creation_tokens: self.cache_creation_tokens + rhs.cache_creation_tokens,
        }
    }
}

impl AddAssign for UsageInfo {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for UsageInfo {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Per-million-token pricing for a model, in USD.
///
/// Cache prices are optional; when absent those tokens are billed at the
/// input price.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens.
    pub input_per_m: f64,
    /// Price per 1M output tokens.
    pub output_per_m: f64,
    /// Price per 1M cache-read tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_per_m: Option<f64>,
    /// Price per 1M cache-creation tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_per_m: Option<f64>,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
            cache_read_per_m: None,
            cache_write_per_m: None,
        }
    }

    pub fn with_cache_read(mut self, per_m: f64) -> Self {
        self.cache_read_per_m = Some(per_m);
        self
    }

    pub fn with_cache_write(mut self, per_m: f64) -> Self {
        self.cache_write_per_m = Some(per_m);
        self
    }

    /// Cost in USD of one usage record.
    pub fn cost(&self, usage: &UsageInfo) -> f64 {
        let cache_read = self.cache_read_per_m.unwrap_or(self.input_per_m);
        let cache_write = self.cache_write_per_m.unwrap_or(self.input_per_m);
        (usage.input_tokens as f64 * self.input_per_m
            + usage.output_tokens as f64 * self.output_per_m
            + usage.cache_read_tokens as f64 * cache_read
            + usage.cache_creation_tokens as f64 * cache_write)
            / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_identity() {
        let u = UsageInfo {
            input_tokens: 3,
            output_tokens: 4,
            cache_read_tokens: 5,
            cache_creation_tokens: 6,
        };
        assert_eq!(u + UsageInfo::default(), u);
        assert_eq!(UsageInfo::default() + u, u);
        assert!(UsageInfo::default().is_zero());
    }

    #[test]
    fn sum_is_componentwise() {
        let total: UsageInfo = [UsageInfo::new(10, 1), UsageInfo::new(5, 2)]
            .into_iter()
            .sum();
        assert_eq!(total, UsageInfo::new(15, 3));
    }

    #[test]
    fn cost_uses_per_million_prices() {
        // $3/M input, $15/M output
        let pricing = ModelPricing::new(3.0, 15.0);
        let cost = pricing.cost(&UsageInfo::new(1000, 500));
        // (1000 * 3.0 + 500 * 15.0) / 1M = 0.0105
        assert!((cost - 0.0105).abs() < 1e-12);
    }

    #[test]
    fn cache_reads_are_discounted_when_configured() {
        let usage = UsageInfo {
            cache_read_tokens: 1_000_000,
            ..UsageInfo::default()
        };
        let full = ModelPricing::new(3.0, 15.0);
        assert!((full.cost(&usage) - 3.0).abs() < 1e-12);

        let discounted = ModelPricing::new(3.0, 15.0).with_cache_read(0.3);
        assert!((discounted.cost(&usage) - 0.3).abs() < 1e-12);
    }
}
