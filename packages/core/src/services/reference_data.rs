//! Reference Data Lookup
//!
//! Read-only access to the CRM's reference tables. The hierarchy only needs
//! industries: when a child organization is created without an industry,
//! the parent's industry is copied, provided the catalogue still lists it as
//! active.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Industry catalogue entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Industry {
    pub id: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Read-only reference data supplied by the host CRM
#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    /// Industry by id (`Ok(None)` if unknown)
    async fn industry(&self, id: &str) -> anyhow::Result<Option<Industry>>;
}

/// Fixed in-memory catalogue
#[derive(Debug, Clone, Default)]
pub struct StaticReferenceData {
    industries: HashMap<String, Industry>,
}

impl StaticReferenceData {
    pub fn new(industries: impl IntoIterator<Item = Industry>) -> Self {
        Self {
            industries: industries
                .into_iter()
                .map(|i| (i.id.clone(), i))
                .collect(),
        }
    }

    /// Parse a JSON array of industries
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let industries: Vec<Industry> = serde_json::from_str(json)?;
        Ok(Self::new(industries))
    }
}

#[async_trait]
impl ReferenceLookup for StaticReferenceData {
    async fn industry(&self, id: &str) -> anyhow::Result<Option<Industry>> {
        Ok(self.industries.get(id).cloned())
    }
}
