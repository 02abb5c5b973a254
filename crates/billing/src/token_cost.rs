//! Wholesale AI provider cost of a question run
//!
//! The extraction pipeline records this as the run's `total_cost`, which the
//! cost aggregator later combines with evaluation cost.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

/// Model used for pricing when a model id is not in the table
const FALLBACK_MODEL: &str = "gpt-4.1";

/// Per-model token rates, in currency units per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelRate {
    pub input_per_million: Decimal,
    pub output_per_million: Decimal,
}

impl ModelRate {
    pub const fn new(input_per_million: Decimal, output_per_million: Decimal) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }
}

/// Provider families with distinct web search pricing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderFamily {
    OpenAi,
    Anthropic,
    Perplexity,
}

impl ProviderFamily {
    /// Classify a provider or model name; OpenAI names match first and
    /// unknown names count as OpenAI
    pub fn classify(provider: &str) -> Self {
        let provider = provider.to_lowercase();
        if provider.contains("openai") || provider.contains("gpt") {
            Self::OpenAi
        } else if provider.contains("anthropic") || provider.contains("claude") {
            Self::Anthropic
        } else if provider.contains("perplexity") || provider.contains("sonar") {
            Self::Perplexity
        } else {
            Self::OpenAi
        }
    }
}

/// Token and web search price table
#[derive(Debug, Clone)]
pub struct ProviderCostTable {
    models: HashMap<String, ModelRate>,
    /// Price per 1,000 web searches
    web_search_per_thousand: HashMap<ProviderFamily, Decimal>,
}

impl Default for ProviderCostTable {
    fn default() -> Self {
        let models = [
            ("gpt-5", ModelRate::new(dec!(1.25), dec!(10.00))),
            ("gpt-5-mini", ModelRate::new(dec!(0.25), dec!(2.00))),
            ("gpt-4.1", ModelRate::new(dec!(3.00), dec!(12.00))),
            ("gpt-4.1-mini", ModelRate::new(dec!(0.80), dec!(3.20))),
            ("gpt-4o-2024-08-06", ModelRate::new(dec!(2.50), dec!(10.00))),
            ("claude-sonnet-4-20250514", ModelRate::new(dec!(3.00), dec!(15.00))),
            ("sonar", ModelRate::new(dec!(1.00), dec!(1.00))),
        ]
        .into_iter()
        .map(|(model, rate)| (model.to_string(), rate))
        .collect();

        let web_search_per_thousand = [
            (ProviderFamily::OpenAi, dec!(35.00)),
            (ProviderFamily::Anthropic, dec!(10.00)),
            (ProviderFamily::Perplexity, dec!(8.00)),
        ]
        .into_iter()
        .collect();

        Self {
            models,
            web_search_per_thousand,
        }
    }
}

impl ProviderCostTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a model's token rates
    pub fn with_model_rate(mut self, model: impl Into<String>, rate: ModelRate) -> Self {
        self.models.insert(model.into(), rate);
        self
    }

    pub fn with_web_search_rate(mut self, family: ProviderFamily, per_thousand: Decimal) -> Self {
        self.web_search_per_thousand.insert(family, per_thousand);
        self
    }

    /// Rates for a model, falling back to the default model's rates
    pub fn rate_for(&self, model: &str) -> Option<ModelRate> {
        self.models
            .get(model)
            .or_else(|| self.models.get(FALLBACK_MODEL))
            .copied()
    }

    /// Cost of one provider call
    pub fn calculate_cost(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        web_search: bool,
    ) -> Decimal {
        let million = Decimal::from(1_000_000u64);

        let token_cost = match self.rate_for(model) {
            Some(rate) => {
                Decimal::from(input_tokens) / million * rate.input_per_million
                    + Decimal::from(output_tokens) / million * rate.output_per_million
            }
            None => {
                tracing::warn!(
                    model = %model,
                    "No token rate for model or fallback, pricing tokens at zero"
                );
                Decimal::ZERO
            }
        };

        let search_cost = if web_search {
            self.web_search_per_thousand
                .get(&ProviderFamily::classify(provider))
                .map(|per_thousand| per_thousand / Decimal::from(1_000u64))
                .unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        token_cost + search_cost
    }
}
