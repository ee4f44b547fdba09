//! Club records served by the catalog routes.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::OffsetDateTime;

use crate::domain::error::RepoError;

/// A record kept in a [`crate::domain::catalog::Collection`].
pub trait Record: Clone + Serialize + Send + Sync + 'static {
    /// Collection name used in errors and logs.
    const COLLECTION: &'static str;

    /// Query parameters accepted by the list route.
    type Filter: DeserializeOwned + Default + Send + Sync + 'static;

    fn id(&self) -> u64;

    fn set_id(&mut self, id: u64);

    fn validate(&self) -> Result<(), RepoError>;

    fn matches(&self, filter: &Self::Filter) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    pub category: String,
    pub quantity: u32,
    /// Price in cents.
    pub unit_price: u64,
}

/// The inventory list takes no filters; unknown parameters are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InventoryFilter {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Active,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub id: u64,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub starts_at: OffsetDateTime,
    #[serde(default)]
    pub status: EventStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub status: Option<EventStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    pub email: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemberFilter {
    pub active: Option<bool>,
}

fn default_active() -> bool {
    true
}

fn require(collection: &'static str, field: &str, value: &str) -> Result<(), RepoError> {
    if value.trim().is_empty() {
        return Err(RepoError::validation(
            collection,
            format!("`{field}` must not be empty"),
        ));
    }
    Ok(())
}

impl Record for InventoryItem {
    const COLLECTION: &'static str = "inventory item";
    type Filter = InventoryFilter;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), RepoError> {
        require(Self::COLLECTION, "name", &self.name)?;
        require(Self::COLLECTION, "category", &self.category)
    }

    fn matches(&self, _filter: &InventoryFilter) -> bool {
        true
    }
}

impl Record for Event {
    const COLLECTION: &'static str = "event";
    type Filter = EventFilter;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), RepoError> {
        require(Self::COLLECTION, "title", &self.title)
    }

    fn matches(&self, filter: &EventFilter) -> bool {
        filter.status.is_none_or(|status| status == self.status)
    }
}

impl Record for Member {
    const COLLECTION: &'static str = "member";
    type Filter = MemberFilter;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), RepoError> {
        require(Self::COLLECTION, "name", &self.name)?;
        if !self.email.contains('@') {
            return Err(RepoError::validation(
                Self::COLLECTION,
                format!("`{}` is not an email address", self.email),
            ));
        }
        Ok(())
    }

    fn matches(&self, filter: &MemberFilter) -> bool {
        filter.active.is_none_or(|active| active == self.active)
    }
}
