//! Typed per-module payload records
//!
//! Every module has one record shape. Fields the app does not interpret are
//! kept in `extra` so a cached row round-trips what the origin sent.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::{ContentRecord, SyncModule};
use crate::util::normalize_text_option;

/// Origin ids arrive as strings or integers; both normalize to a string.
fn origin_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    let id = match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text.trim().to_string(),
        RawId::Number(number) => number.to_string(),
    };
    if id.is_empty() {
        return Err(D::Error::custom("record id must not be empty"));
    }
    Ok(id)
}

/// Crop, region, unit and other lookup tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceItem {
    #[serde(deserialize_with = "origin_id")]
    pub id: String,
    pub kind: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherForecast {
    #[serde(deserialize_with = "origin_id")]
    pub id: String,
    pub location: String,
    #[serde(default)]
    pub forecast_date: Option<String>,
    #[serde(default)]
    pub temperature_c: Option<f64>,
    #[serde(default)]
    pub rainfall_mm: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketListing {
    #[serde(deserialize_with = "origin_id")]
    pub id: String,
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub seller_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmRecord {
    #[serde(deserialize_with = "origin_id")]
    pub id: String,
    #[serde(alias = "type")]
    pub record_type: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consultation {
    #[serde(deserialize_with = "origin_id")]
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub expert_id: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(deserialize_with = "origin_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub read: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialProduct {
    #[serde(deserialize_with = "origin_id")]
    pub id: String,
    pub institution_id: String,
    pub name: String,
    #[serde(default)]
    pub interest_rate: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialInstitution {
    #[serde(deserialize_with = "origin_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub institution_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancingApplication {
    #[serde(deserialize_with = "origin_id")]
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A parsed record, tagged by the module it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleRecord {
    ReferenceData(ReferenceItem),
    Weather(WeatherForecast),
    Marketplace(MarketListing),
    FarmRecord(FarmRecord),
    Consultation(Consultation),
    Notification(Notification),
    FinancialProduct(FinancialProduct),
    FinancialInstitution(FinancialInstitution),
    FinancingApplication(FinancingApplication),
}

impl ModuleRecord {
    /// Parse one raw record into `module`'s shape.
    pub fn parse(module: SyncModule, raw: &Value) -> serde_json::Result<Self> {
        Ok(match module {
            SyncModule::ReferenceData => Self::ReferenceData(ReferenceItem::deserialize(raw)?),
            SyncModule::WeatherCache => Self::Weather(WeatherForecast::deserialize(raw)?),
            SyncModule::MarketplaceCache => Self::Marketplace(MarketListing::deserialize(raw)?),
            SyncModule::FarmRecords => Self::FarmRecord(FarmRecord::deserialize(raw)?),
            SyncModule::Consultations => Self::Consultation(Consultation::deserialize(raw)?),
            SyncModule::Notifications => Self::Notification(Notification::deserialize(raw)?),
            SyncModule::FinancialProducts => {
                Self::FinancialProduct(FinancialProduct::deserialize(raw)?)
            }
            SyncModule::FinancialInstitutions => {
                Self::FinancialInstitution(FinancialInstitution::deserialize(raw)?)
            }
            SyncModule::FinancingApplications => {
                Self::FinancingApplication(FinancingApplication::deserialize(raw)?)
            }
        })
    }

    pub const fn module(&self) -> SyncModule {
        match self {
            Self::ReferenceData(_) => SyncModule::ReferenceData,
            Self::Weather(_) => SyncModule::WeatherCache,
            Self::Marketplace(_) => SyncModule::MarketplaceCache,
            Self::FarmRecord(_) => SyncModule::FarmRecords,
            Self::Consultation(_) => SyncModule::Consultations,
            Self::Notification(_) => SyncModule::Notifications,
            Self::FinancialProduct(_) => SyncModule::FinancialProducts,
            Self::FinancialInstitution(_) => SyncModule::FinancialInstitutions,
            Self::FinancingApplication(_) => SyncModule::FinancingApplications,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::ReferenceData(item) => &item.id,
            Self::Weather(item) => &item.id,
            Self::Marketplace(item) => &item.id,
            Self::FarmRecord(item) => &item.id,
            Self::Consultation(item) => &item.id,
            Self::Notification(item) => &item.id,
            Self::FinancialProduct(item) => &item.id,
            Self::FinancialInstitution(item) => &item.id,
            Self::FinancingApplication(item) => &item.id,
        }
    }

    /// Value stored in the module's facet column.
    pub fn facet(&self) -> Option<&str> {
        match self {
            Self::ReferenceData(item) => Some(&item.kind),
            Self::Weather(item) => Some(&item.location),
            Self::Marketplace(item) => Some(&item.category),
            Self::FarmRecord(item) => Some(&item.record_type),
            Self::Consultation(item) => Some(&item.status),
            Self::Notification(item) => item.category.as_deref(),
            Self::FinancialProduct(item) => Some(&item.institution_id),
            Self::FinancialInstitution(item) => item.institution_type.as_deref(),
            Self::FinancingApplication(item) => Some(&item.status),
        }
    }

    fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            Self::ReferenceData(item) => serde_json::to_value(item),
            Self::Weather(item) => serde_json::to_value(item),
            Self::Marketplace(item) => serde_json::to_value(item),
            Self::FarmRecord(item) => serde_json::to_value(item),
            Self::Consultation(item) => serde_json::to_value(item),
            Self::Notification(item) => serde_json::to_value(item),
            Self::FinancialProduct(item) => serde_json::to_value(item),
            Self::FinancialInstitution(item) => serde_json::to_value(item),
            Self::FinancingApplication(item) => serde_json::to_value(item),
        }
    }

    /// Row to upsert for this record, stamped with `now`.
    pub fn to_content_record(&self, now: i64) -> serde_json::Result<ContentRecord> {
        Ok(ContentRecord {
            module: self.module(),
            id: self.id().to_string(),
            facet: normalize_text_option(self.facet().map(str::to_string)),
            data: self.to_value()?,
            last_updated: now,
        })
    }
}
