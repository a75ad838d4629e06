//! Remote fetch collaborator
//!
//! The network layer lives outside this crate. The orchestrator only needs
//! "changes since T" for one module at a time.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::SyncModule;

/// Request hints forwarded to the origin. The core never compresses anything
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOptions {
    pub compressed: bool,
    pub low_bandwidth: bool,
}

/// One module's delta since the requested cursor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleChanges {
    /// Raw records; each is parsed independently
    #[serde(default)]
    pub records: Vec<Value>,
    /// Origin ids removed since the cursor
    #[serde(default)]
    pub deleted_ids: Vec<String>,
}

impl ModuleChanges {
    pub const fn new(records: Vec<Value>) -> Self {
        Self {
            records,
            deleted_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_deleted(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.deleted_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.deleted_ids.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// No route, DNS, connection reset
    Network,
    Timeout,
    /// 5xx or an unreadable response
    Server,
    /// 4xx; retrying the same request will not help
    Rejected,
}

impl FetchErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Server => "server",
            Self::Rejected => "rejected",
        }
    }
}

/// Failure reported by a [`RemoteFetch`] implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
    /// Part of a response arrived before the failure
    pub bytes_received: bool,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            bytes_received: false,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, message)
    }

    #[must_use]
    pub const fn with_bytes_received(mut self) -> Self {
        self.bytes_received = true;
        self
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for FetchError {}

/// Source of module deltas, injected by the host app.
#[async_trait]
pub trait RemoteFetch: Send + Sync {
    async fn fetch_module_changes(
        &self,
        module: SyncModule,
        since: i64,
        options: FetchOptions,
    ) -> Result<ModuleChanges, FetchError>;
}
