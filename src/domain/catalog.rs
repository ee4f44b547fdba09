//! In-process catalog backing the club routes.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use time::macros::datetime;
use tokio::sync::RwLock;

use crate::domain::{
    entities::{Event, EventStatus, InventoryItem, Member, Record},
    error::RepoError,
};

/// Records of one kind, keyed by id.
#[derive(Debug)]
pub struct Collection<T> {
    records: RwLock<BTreeMap<u64, T>>,
    next_id: AtomicU64,
}

impl<T: Record> Default for Collection<T> {
    fn default() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T: Record> Collection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list(&self) -> Vec<T> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn list_where(&self, filter: &T::Filter) -> Vec<T> {
        self.records
            .read()
            .await
            .values()
            .filter(|record| record.matches(filter))
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: u64) -> Result<T, RepoError> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RepoError::not_found(T::COLLECTION, id))
    }

    /// Insert `record` under a fresh id, ignoring any id it carries.
    pub async fn create(&self, mut record: T) -> Result<T, RepoError> {
        record.validate()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        record.set_id(id);
        self.records.write().await.insert(id, record.clone());
        Ok(record)
    }

    pub async fn update(&self, id: u64, mut record: T) -> Result<T, RepoError> {
        record.validate()?;
        record.set_id(id);
        let mut records = self.records.write().await;
        let slot = records
            .get_mut(&id)
            .ok_or_else(|| RepoError::not_found(T::COLLECTION, id))?;
        *slot = record.clone();
        Ok(record)
    }

    pub async fn delete(&self, id: u64) -> Result<T, RepoError> {
        self.records
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| RepoError::not_found(T::COLLECTION, id))
    }
}

/// The three club collections.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub inventory: Arc<Collection<InventoryItem>>,
    pub events: Arc<Collection<Event>>,
    pub members: Arc<Collection<Member>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog with a handful of records, used by `serve`.
    pub async fn seeded() -> Result<Self, RepoError> {
        let catalog = Self::new();

        for (name, category, quantity, unit_price) in [
            ("Tennis balls (can of 3)", "sports", 48, 599),
            ("Towel", "locker room", 120, 1_250),
            ("Club cap", "merchandise", 35, 1_999),
        ] {
            catalog
                .inventory
                .create(InventoryItem {
                    id: 0,
                    name: name.to_string(),
                    category: category.to_string(),
                    quantity,
                    unit_price,
                })
                .await?;
        }

        for (title, starts_at, status) in [
            (
                "Spring tournament",
                datetime!(2026-04-18 09:00 UTC),
                EventStatus::Completed,
            ),
            (
                "Members' dinner",
                datetime!(2026-11-07 19:30 UTC),
                EventStatus::Active,
            ),
            (
                "Winter open day",
                datetime!(2026-12-12 10:00 UTC),
                EventStatus::Active,
            ),
        ] {
            catalog
                .events
                .create(Event {
                    id: 0,
                    title: title.to_string(),
                    starts_at,
                    status,
                })
                .await?;
        }

        for (name, email, active) in [
            ("Ada Byron", "ada@example.org", true),
            ("Grace Murray", "grace@example.org", true),
            ("Edsger Dijkstra", "edsger@example.org", false),
        ] {
            catalog
                .members
                .create(Member {
                    id: 0,
                    name: name.to_string(),
                    email: email.to_string(),
                    active,
                })
                .await?;
        }

        Ok(catalog)
    }
}
