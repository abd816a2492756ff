//! # Subscription registry: primary map plus secondary indexes.
//!
//! ```text
//! by_id:     SubscriptionId ──► Arc<Subscription>
//! by_client: client_id      ──► {SubscriptionId}
//! by_type:   SubscriptionType ─► {SubscriptionId}
//! ```
//!
//! ## Rules
//! - All three maps change together under one write lock; lookups take the
//!   read lock only for the time needed to clone `Arc`s out.
//! - Global and per-client caps are checked under the same write lock as the
//!   insert, so concurrent subscribes cannot overshoot them.
//! - Query results are ordered by creation time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::NotifyError;
use crate::events::UpdateKind;

use super::subscription::Subscription;
use super::types::{SubscriptionId, SubscriptionType};

#[derive(Debug, Default)]
struct Indexes {
    by_id: HashMap<SubscriptionId, Arc<Subscription>>,
    by_client: HashMap<String, HashSet<SubscriptionId>>,
    by_type: HashMap<SubscriptionType, HashSet<SubscriptionId>>,
}

impl Indexes {
    /// Resolved and ordered by creation, for the query API.
    fn collect<'a>(&self, ids: impl Iterator<Item = &'a SubscriptionId>) -> Vec<Arc<Subscription>> {
        let mut out: Vec<_> = ids.filter_map(|id| self.by_id.get(id).cloned()).collect();
        out.sort_by_key(|s| (s.created_at(), s.id()));
        out
    }

    fn unlink(&mut self, sub: &Subscription) {
        if let Some(ids) = self.by_client.get_mut(sub.client_id()) {
            ids.remove(&sub.id());
            if ids.is_empty() {
                self.by_client.remove(sub.client_id());
            }
        }
        if let Some(ids) = self.by_type.get_mut(&sub.kind()) {
            ids.remove(&sub.id());
        }
    }
}

/// Single authority for subscription identity.
#[derive(Debug)]
pub struct Registry {
    max_subscriptions: usize,
    max_per_client: usize,
    inner: RwLock<Indexes>,
}

impl Registry {
    pub fn new(max_subscriptions: usize, max_per_client: usize) -> Self {
        Self {
            max_subscriptions,
            max_per_client,
            inner: RwLock::new(Indexes::default()),
        }
    }

    /// Adds a subscription, enforcing the global and per-client caps.
    pub fn insert(&self, sub: Arc<Subscription>) -> Result<(), NotifyError> {
        let mut idx = self.inner.write();
        if idx.by_id.len() >= self.max_subscriptions {
            return Err(NotifyError::ResourceExhausted {
                resource: "subscriptions",
                limit: self.max_subscriptions,
            });
        }
        let owned = idx.by_client.get(sub.client_id()).map_or(0, HashSet::len);
        if owned >= self.max_per_client {
            return Err(NotifyError::ResourceExhausted {
                resource: "client_subscriptions",
                limit: self.max_per_client,
            });
        }

        let id = sub.id();
        idx.by_client
            .entry(sub.client_id().to_string())
            .or_default()
            .insert(id);
        idx.by_type.entry(sub.kind()).or_default().insert(id);
        idx.by_id.insert(id, sub);
        Ok(())
    }

    /// Removes a subscription from every index.
    pub fn remove(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        let mut idx = self.inner.write();
        let sub = idx.by_id.remove(&id)?;
        idx.unlink(&sub);
        Some(sub)
    }

    /// Removes every subscription of `client_id`.
    pub fn remove_client(&self, client_id: &str) -> Vec<Arc<Subscription>> {
        let mut idx = self.inner.write();
        let Some(ids) = idx.by_client.remove(client_id) else {
            return Vec::new();
        };
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(sub) = idx.by_id.remove(&id) {
                if let Some(typed) = idx.by_type.get_mut(&sub.kind()) {
                    typed.remove(&id);
                }
                removed.push(sub);
            }
        }
        removed
    }

    pub fn get(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        self.inner.read().by_id.get(&id).cloned()
    }

    pub fn by_client(&self, client_id: &str) -> Vec<Arc<Subscription>> {
        let idx = self.inner.read();
        match idx.by_client.get(client_id) {
            Some(ids) => idx.collect(ids.iter()),
            None => Vec::new(),
        }
    }

    pub fn by_type(&self, kind: SubscriptionType) -> Vec<Arc<Subscription>> {
        let idx = self.inner.read();
        match idx.by_type.get(&kind) {
            Some(ids) => idx.collect(ids.iter()),
            None => Vec::new(),
        }
    }

    /// Active subscriptions that may receive an event of `kind`: its own type
    /// plus `all_updates`. Unordered.
    pub fn candidates(&self, kind: UpdateKind) -> Vec<Arc<Subscription>> {
        let idx = self.inner.read();
        let typed = idx.by_type.get(&SubscriptionType::from(kind)).into_iter().flatten();
        let all = idx
            .by_type
            .get(&SubscriptionType::AllUpdates)
            .into_iter()
            .flatten();
        typed
            .chain(all)
            .filter_map(|id| idx.by_id.get(id))
            .filter(|s| !s.is_paused())
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<Subscription>> {
        let idx = self.inner.read();
        idx.collect(idx.by_id.keys())
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn client_count(&self) -> usize {
        self.inner.read().by_client.len()
    }

    pub fn max_subscriptions(&self) -> usize {
        self.max_subscriptions
    }
}
