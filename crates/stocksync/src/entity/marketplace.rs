//! Marketplace enum for type-safe source handling.

use std::str::FromStr;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Supported marketplace sources.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, DeriveActiveEnum,
    Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum Marketplace {
    #[sea_orm(string_value = "ozon")]
    Ozon,
    #[sea_orm(string_value = "wildberries")]
    Wildberries,
}

impl Marketplace {
    /// All supported marketplaces, in a stable order.
    pub const ALL: [Marketplace; 2] = [Marketplace::Ozon, Marketplace::Wildberries];

    /// Lowercase identifier used in storage and cache keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Marketplace::Ozon => "ozon",
            Marketplace::Wildberries => "wildberries",
        }
    }
}

impl std::fmt::Display for Marketplace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Marketplace::Ozon => write!(f, "Ozon"),
            Marketplace::Wildberries => write!(f, "Wildberries"),
        }
    }
}

/// Error returned when a marketplace name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown marketplace: {0}")]
pub struct UnknownMarketplace(pub String);

impl FromStr for Marketplace {
    type Err = UnknownMarketplace;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ozon" => Ok(Marketplace::Ozon),
            "wildberries" | "wb" => Ok(Marketplace::Wildberries),
            other => Err(UnknownMarketplace(other.to_string())),
        }
    }
}
