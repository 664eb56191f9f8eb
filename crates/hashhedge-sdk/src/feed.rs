use serde::{Deserialize, Serialize};

/// Source of the difficulty figure settlement compares against.
pub trait DifficultyFeed: Send + Sync {
    fn current_difficulty(&self) -> f64;

    /// Hash price in sats per unit of hash rate per day.
    fn hashprice_sats(&self) -> f64;
}

/// A feed that always reports the same values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StaticFeed {
    pub difficulty: f64,
    pub hashprice_sats: f64,
}

impl StaticFeed {
    pub fn new(difficulty: f64, hashprice_sats: f64) -> Self {
        Self {
            difficulty,
            hashprice_sats,
        }
    }
}

impl Default for StaticFeed {
    fn default() -> Self {
        Self::new(0.047, 220_000.0)
    }
}

impl DifficultyFeed for StaticFeed {
    fn current_difficulty(&self) -> f64 {
        self.difficulty
    }

    fn hashprice_sats(&self) -> f64 {
        self.hashprice_sats
    }
}

/// Snapshot returned by the engine's `stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketStats {
    pub difficulty: f64,
    pub hashprice_sats: f64,
    pub threshold: f64,
    pub house_address: String,
}
