use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogEntityId(Uuid);

impl CatalogEntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CatalogEntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CatalogEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    Company,
    Salesperson,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::Company => "company",
            EntityKind::Salesperson => "salesperson",
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product" => Ok(EntityKind::Product),
            "company" => Ok(EntityKind::Company),
            "salesperson" => Ok(EntityKind::Salesperson),
            _ => Err(format!("Invalid entity kind: {}", s)),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shared catalog record (product, company or salesperson).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntity {
    pub id: CatalogEntityId,
    pub kind: EntityKind,
    pub name: String,
    pub description: Option<String>,
    /// Hash of the text the current embedding was computed from.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogEntity {
    pub fn new(kind: EntityKind, name: impl Into<String>, description: Option<String>) -> Self {
        let name = name.into();
        let now = Utc::now();
        let content_hash = content_hash(&name, description.as_deref());
        Self {
            id: CatalogEntityId::new(),
            kind,
            name,
            description,
            content_hash,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// Text the entity's embedding is computed from.
    pub fn embedding_text(&self) -> String {
        match &self.description {
            Some(description) if !description.trim().is_empty() => {
                format!("{}\n{}", self.name, description)
            }
            _ => self.name.clone(),
        }
    }

    pub fn is_embedding_stale(&self, indexed_hash: &str) -> bool {
        self.content_hash != indexed_hash
    }
}

/// Uniqueness key for catalog entities: lowercase, punctuation stripped,
/// whitespace collapsed.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn content_hash(name: &str, description: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(description.unwrap_or_default().as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
