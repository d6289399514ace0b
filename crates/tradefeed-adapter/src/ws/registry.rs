/*
[INPUT]:  subscribe/unsubscribe calls with callbacks and protocol params
[OUTPUT]: Ordered key -> {callback, params} map used for dispatch and replay
[POS]:    WebSocket layer - source of truth for what must survive reconnects
[UPDATE]: When subscription params gain new merge/shrink semantics
*/

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::{BoxError, FeedError, Result};

/// Async handler invoked with every payload routed to a subscription
pub type Callback = Arc<dyn Fn(Value) -> BoxFuture<'static, std::result::Result<(), BoxError>> + Send + Sync>;

/// Wrap an async closure as a [`Callback`].
pub fn callback<F, Fut>(f: F) -> Callback
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}

/// Params that are a growable list of keys (mints, accounts, ...)
pub trait KeyList: Clone {
    fn from_keys(keys: Vec<String>) -> Self;

    fn keys(&self) -> &[String];

    /// Add keys not yet present, keeping order. Returns how many were added.
    fn union(&mut self, addition: &[String]) -> usize;

    /// Drop every key in `subset`.
    fn subtract(&mut self, subset: &[String]);

    fn contains_key(&self, key: &str) -> bool {
        self.keys().iter().any(|k| k == key)
    }
}

/// One logical subscription
#[derive(Clone)]
pub struct Subscription<P> {
    pub key: String,
    pub callback: Callback,
    pub params: P,
}

impl<P: fmt::Debug> fmt::Debug for Subscription<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Insertion-ordered subscription map.
///
/// Re-subscribing an existing key replaces callback and params in place, so
/// replay order stays the order keys were first subscribed.
#[derive(Debug)]
pub struct Registry<P> {
    entries: Vec<Subscription<P>>,
}

impl<P> Default for Registry<P> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<P: Clone> Registry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace (last write wins).
    pub fn put(&mut self, key: impl Into<String>, callback: Callback, params: P) {
        let key = key.into();
        match self.entries.iter_mut().find(|entry| entry.key == key) {
            Some(entry) => {
                entry.callback = callback;
                entry.params = params;
            }
            None => self.entries.push(Subscription {
                key,
                callback,
                params,
            }),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Subscription<P>> {
        let index = self.entries.iter().position(|entry| entry.key == key)?;
        Some(self.entries.remove(index))
    }

    pub fn get(&self, key: &str) -> Option<&Subscription<P>> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    pub fn params(&self, key: &str) -> Option<&P> {
        self.get(key).map(|entry| &entry.params)
    }

    pub fn callback(&self, key: &str) -> Option<Callback> {
        self.get(key).map(|entry| entry.callback.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Entries in stable insertion order
    pub fn all(&self) -> impl Iterator<Item = &Subscription<P>> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key.clone()).collect()
    }

    /// Owned `(key, params)` pairs for replay outside the lock
    pub fn snapshot(&self) -> Vec<(String, P)> {
        self.entries
            .iter()
            .map(|entry| (entry.key.clone(), entry.params.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<P: KeyList> Registry<P> {
    /// Union `addition` into an existing subscription's key list.
    ///
    /// Fails without creating anything when `key` was never subscribed.
    pub fn merge_params(&mut self, key: &str, addition: &[String]) -> Result<usize> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.key == key)
            .ok_or_else(|| FeedError::SubscriptionState {
                key: key.to_string(),
            })?;
        Ok(entry.params.union(addition))
    }

    /// Shrink a subscription's key list. Returns the keys left, if the
    /// subscription exists.
    pub fn remove_keys(&mut self, key: &str, subset: &[String]) -> Option<usize> {
        let entry = self.entries.iter_mut().find(|entry| entry.key == key)?;
        entry.params.subtract(subset);
        Some(entry.params.keys().len())
    }
}
