//! Sync module identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// One independently-synced content domain.
///
/// The set is closed: each variant owns exactly one table in the local store
/// and one row in the sync ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncModule {
    ReferenceData,
    WeatherCache,
    MarketplaceCache,
    FarmRecords,
    Consultations,
    Notifications,
    FinancialProducts,
    FinancialInstitutions,
    FinancingApplications,
}

impl SyncModule {
    /// Every module, in default sync order.
    pub const ALL: [Self; 9] = [
        Self::ReferenceData,
        Self::WeatherCache,
        Self::MarketplaceCache,
        Self::FarmRecords,
        Self::Consultations,
        Self::Notifications,
        Self::FinancialProducts,
        Self::FinancialInstitutions,
        Self::FinancingApplications,
    ];

    /// Stable name used as the ledger key and in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReferenceData => "reference_data",
            Self::WeatherCache => "weather_cache",
            Self::MarketplaceCache => "marketplace_cache",
            Self::FarmRecords => "farm_records",
            Self::Consultations => "consultations",
            Self::Notifications => "notifications",
            Self::FinancialProducts => "financial_products",
            Self::FinancialInstitutions => "financial_institutions",
            Self::FinancingApplications => "financing_applications",
        }
    }

    /// Table holding this module's cached rows.
    pub const fn table(self) -> &'static str {
        self.as_str()
    }

    /// Module-specific indexed column (added in schema v2).
    pub const fn facet_column(self) -> &'static str {
        match self {
            Self::ReferenceData => "kind",
            Self::WeatherCache => "location",
            Self::MarketplaceCache | Self::Notifications => "category",
            Self::FarmRecords => "record_type",
            Self::Consultations | Self::FinancingApplications => "status",
            Self::FinancialProducts => "institution_id",
            Self::FinancialInstitutions => "institution_type",
        }
    }
}

impl fmt::Display for SyncModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncModule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|module| module.as_str() == trimmed)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown sync module: {trimmed}")))
    }
}
