use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;

/// Wire-shaped market record as returned by the Gamma feed. Numeric fields
/// arrive as text and the outcome lists arrive as JSON-encoded strings, so
/// nothing here is trusted until it passes through [`Market::decode`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawMarket {
    pub id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub volume: String,
    #[serde(default)]
    pub events: Vec<MarketEvent>,
    #[serde(default)]
    pub outcomes: String,
    #[serde(default, rename = "outcomePrices")]
    pub outcome_prices: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketEvent {
    pub id: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("market has an empty id")]
    EmptyId,
    #[error("outcomes is not a JSON string array: {0}")]
    Outcomes(String),
    #[error("outcomePrices is not a JSON string array: {0}")]
    Prices(String),
    #[error("price `{0}` is not a number")]
    PriceValue(String),
    #[error("{outcomes} outcomes but {prices} prices")]
    LengthMismatch { outcomes: usize, prices: usize },
    #[error("market has no outcomes")]
    NoOutcomes,
    #[error("volume `{0}` is not a non-negative number")]
    Volume(String),
}

/// Validated market. `outcomes` and `outcome_prices` are parallel lists:
/// `outcome_prices[i]` is the price of `outcomes[i]`.
#[derive(Debug, Clone)]
pub struct Market {
    pub id: String,
    pub question: String,
    pub description: String,
    pub volume: f64,
    #[allow(dead_code)]
    pub events: Vec<MarketEvent>,
    #[allow(dead_code)]
    pub outcomes: Vec<String>,
    pub outcome_prices: Vec<f64>,
}

impl Market {
    pub fn decode(raw: RawMarket) -> Result<Self, DecodeError> {
        if raw.id.trim().is_empty() {
            return Err(DecodeError::EmptyId);
        }
        let outcomes: Vec<String> = serde_json::from_str(&raw.outcomes)
            .map_err(|err| DecodeError::Outcomes(err.to_string()))?;
        let price_strings: Vec<String> = serde_json::from_str(&raw.outcome_prices)
            .map_err(|err| DecodeError::Prices(err.to_string()))?;
        let mut outcome_prices = Vec::with_capacity(price_strings.len());
        for price in &price_strings {
            let parsed = price
                .trim()
                .parse::<f64>()
                .map_err(|_| DecodeError::PriceValue(price.clone()))?;
            outcome_prices.push(parsed);
        }
        if outcomes.len() != outcome_prices.len() {
            return Err(DecodeError::LengthMismatch {
                outcomes: outcomes.len(),
                prices: outcome_prices.len(),
            });
        }
        if outcomes.is_empty() {
            return Err(DecodeError::NoOutcomes);
        }
        let volume = raw
            .volume
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|volume| *volume >= 0.0)
            .ok_or_else(|| DecodeError::Volume(raw.volume.clone()))?;
        Ok(Self {
            id: raw.id,
            question: raw.question,
            description: raw.description,
            volume,
            events: raw.events,
            outcomes,
            outcome_prices,
        })
    }

    /// Price of the first (affirmative) outcome. Decode guarantees at least
    /// one outcome exists.
    pub fn yes_price(&self) -> f64 {
        self.outcome_prices[0]
    }
}

/// A market after enrichment: the generated blurb replaces the raw feed
/// description in the persisted row; the image URL is best-effort.
#[derive(Debug, Clone)]
pub struct EnrichedMarket {
    pub market: Market,
    pub description: String,
    pub image_url: Option<String>,
}

impl EnrichedMarket {
    pub fn to_row(&self) -> QuestionRow {
        QuestionRow {
            marketid: self.market.id.clone(),
            question: self.market.question.clone(),
            description: self.description.clone(),
            volume: self.market.volume,
            yes_price: self.market.yes_price(),
            image_url: self.image_url.clone(),
        }
    }
}

/// Row shape of the `questions` table.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct QuestionRow {
    pub marketid: String,
    pub question: String,
    pub description: String,
    pub volume: f64,
    pub yes_price: f64,
    pub image_url: Option<String>,
}

/// Minimal projection used by the video backfill.
#[derive(Debug, Clone, Deserialize)]
pub struct QuestionRef {
    pub marketid: String,
    pub question: String,
}
