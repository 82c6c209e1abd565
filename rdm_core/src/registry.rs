//! Opaque item identifiers and the central registry.
//!
//! The original source wires `DownloadItem`, `DownloadManager` and the UI
//! together through raw Qt object pointers. This crate replaces that pointer
//! graph with a stable integer handle (`ItemId`) plus a registry owned by the
//! scheduler — every other component refers to an item by id and resolves it
//! through the registry, never by holding a pointer/reference into another
//! component's internals.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::item::DownloadItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(u64);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ItemId {
    pub fn value(self) -> u64 {
        self.0
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn from_raw(value: u64) -> Self {
        ItemId(value)
    }
}

#[derive(Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> ItemId {
        ItemId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Central map from opaque id to the shared item handle.
#[derive(Default)]
pub struct Registry {
    items: HashMap<ItemId, Arc<DownloadItem>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: Arc<DownloadItem>) {
        self.items.insert(item.id(), item);
    }

    pub fn get(&self, id: ItemId) -> Option<Arc<DownloadItem>> {
        self.items.get(&id).cloned()
    }

    pub fn remove(&mut self, id: ItemId) -> Option<Arc<DownloadItem>> {
        self.items.remove(&id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<DownloadItem>> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
