//! Ordered, id-keyed collection kept in sync with the server.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chirp_types::{CollectionItem, EntityId};

pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Sort key of a collection. Ties are broken by id so the order is total.
pub enum SortOrder<T> {
    NewestFirst,
    OldestFirst,
    Custom(Comparator<T>),
}

impl<T: CollectionItem> SortOrder<T> {
    pub fn custom(cmp: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
        SortOrder::Custom(Arc::new(cmp))
    }

    pub fn compare(&self, a: &T, b: &T) -> Ordering {
        let primary = match self {
            SortOrder::NewestFirst => b.created_at().cmp(&a.created_at()),
            SortOrder::OldestFirst => a.created_at().cmp(&b.created_at()),
            SortOrder::Custom(cmp) => cmp(a, b),
        };
        primary.then_with(|| a.item_id().cmp(&b.item_id()))
    }
}

impl<T> Default for SortOrder<T> {
    fn default() -> Self {
        SortOrder::NewestFirst
    }
}

impl<T> Clone for SortOrder<T> {
    fn clone(&self) -> Self {
        match self {
            SortOrder::NewestFirst => SortOrder::NewestFirst,
            SortOrder::OldestFirst => SortOrder::OldestFirst,
            SortOrder::Custom(cmp) => SortOrder::Custom(Arc::clone(cmp)),
        }
    }
}

impl<T> fmt::Debug for SortOrder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::NewestFirst => f.write_str("NewestFirst"),
            SortOrder::OldestFirst => f.write_str("OldestFirst"),
            SortOrder::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Items are unique by id and sorted after every mutation.
#[derive(Debug, Clone)]
pub struct LiveCollection<T> {
    items: Vec<T>,
    order: SortOrder<T>,
}

impl<T: CollectionItem> LiveCollection<T> {
    pub fn new(order: SortOrder<T>) -> Self {
        Self {
            items: Vec::new(),
            order,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &EntityId) -> Option<&T> {
        self.items.iter().find(|item| item.item_id() == *id)
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.items.iter().map(CollectionItem::item_id).collect()
    }

    /// Replace everything. A later row wins over an earlier one with the same id.
    pub fn replace_all(&mut self, items: Vec<T>) {
        let mut unique: Vec<T> = Vec::with_capacity(items.len());
        for item in items {
            let id = item.item_id();
            match unique.iter_mut().find(|existing| existing.item_id() == id) {
                Some(existing) => *existing = item,
                None => unique.push(item),
            }
        }
        self.items = unique;
        self.sort();
    }

    /// Insert or replace by id. Returns `true` when the id was new.
    pub fn upsert(&mut self, item: T) -> bool {
        let id = item.item_id();
        let inserted = match self.items.iter_mut().find(|existing| existing.item_id() == id) {
            Some(existing) => {
                *existing = item;
                false
            }
            None => {
                self.items.push(item);
                true
            }
        };
        self.sort();
        inserted
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<T> {
        let index = self.items.iter().position(|item| item.item_id() == *id)?;
        Some(self.items.remove(index))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn sort(&mut self) {
        let order = &self.order;
        self.items.sort_by(|a, b| order.compare(a, b));
    }
}

impl<T: CollectionItem> Default for LiveCollection<T> {
    fn default() -> Self {
        Self::new(SortOrder::default())
    }
}
