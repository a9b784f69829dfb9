use crate::data::{MarketContext, PositionSnapshot};
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One position plus the market context it should be judged against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionInput {
    pub snapshot: PositionSnapshot,
    #[serde(default)]
    pub market: Option<MarketContext>,
    /// Premium paid at entry. Long-premium positions carrying one get a
    /// trailing stop the first time they are seen.
    #[serde(default)]
    pub entry_premium: Option<Decimal>,
}

impl PositionInput {
    pub fn new(snapshot: PositionSnapshot) -> Self {
        Self {
            snapshot,
            market: None,
            entry_premium: None,
        }
    }

    pub fn with_market(mut self, market: MarketContext) -> Self {
        self.market = Some(market);
        self
    }

    pub fn with_entry_premium(mut self, entry_premium: Decimal) -> Self {
        self.entry_premium = Some(entry_premium);
        self
    }
}

/// Supplies the open-position set at the start of each cycle
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<PositionInput>>;
}

/// Fixed, replaceable position set
#[derive(Debug, Default)]
pub struct StaticPositionSource {
    inputs: RwLock<Vec<PositionInput>>,
}

impl StaticPositionSource {
    pub fn new(inputs: Vec<PositionInput>) -> Self {
        Self {
            inputs: RwLock::new(inputs),
        }
    }

    pub fn replace(&self, inputs: Vec<PositionInput>) {
        *self.inputs.write() = inputs;
    }
}

#[async_trait]
impl PositionSource for StaticPositionSource {
    async fn fetch(&self) -> Result<Vec<PositionInput>> {
        Ok(self.inputs.read().clone())
    }
}

/// JSON array of `PositionInput`, re-read every cycle so edits are picked up
#[derive(Debug, Clone)]
pub struct FilePositionSource {
    path: PathBuf,
}

impl FilePositionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PositionSource for FilePositionSource {
    async fn fetch(&self) -> Result<Vec<PositionInput>> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse positions in {}", self.path.display()))
    }
}
