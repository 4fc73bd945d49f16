//! Plan-result caching middleware

use crate::error::Result;
use crate::middleware::{AgentMiddleware, PlanContext};
use crate::step::AgentAction;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Hit/miss counters for a [`CacheMiddleware`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

struct CachedEntry {
    action: AgentAction,
    inserted: Instant,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CachedEntry>,
    insertion_order: VecDeque<String>,
}

/// Caches planner decisions keyed by input and history length
///
/// Eviction is FIFO at `max_size`; entries optionally expire after a TTL.
/// A hit short-circuits the model call by filling
/// [`PlanContext::cached_action`].
pub struct CacheMiddleware {
    max_size: usize,
    ttl: Option<Duration>,
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheMiddleware {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            ttl: None,
            inner: Mutex::new(CacheInner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(ctx: &PlanContext) -> String {
        format!("{}::{}", ctx.input, ctx.history_len)
    }

    fn lookup(&self, key: &str) -> Option<AgentAction> {
        let mut inner = self.inner.lock().unwrap();

        let expired = match (&self.ttl, inner.entries.get(key)) {
            (Some(ttl), Some(entry)) => entry.inserted.elapsed() > *ttl,
            _ => false,
        };
        if expired {
            inner.entries.remove(key);
            inner.insertion_order.retain(|k| k != key);
            return None;
        }

        inner.entries.get(key).map(|e| e.action.clone())
    }

    fn insert(&self, key: String, action: AgentAction) {
        let mut inner = self.inner.lock().unwrap();

        if inner.entries.contains_key(&key) {
            return;
        }

        while inner.entries.len() >= self.max_size {
            match inner.insertion_order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }

        inner.insertion_order.push_back(key.clone());
        inner.entries.insert(
            key,
            CachedEntry {
                action,
                inserted: Instant::now(),
            },
        );
    }
}

#[async_trait]
impl AgentMiddleware for CacheMiddleware {
    fn name(&self) -> &str {
        "cache"
    }

    async fn before_model(&self, ctx: &mut PlanContext) -> Result<()> {
        match self.lookup(&Self::key(ctx)) {
            Some(action) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(step = ctx.step, "plan cache hit");
                ctx.cached_action = Some(action);
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    async fn after_model(&self, ctx: &PlanContext, action: &mut AgentAction) -> Result<()> {
        // Don't re-insert what we just served from cache.
        if ctx.cached_action.is_none() {
            self.insert(Self::key(ctx), action.clone());
        }
        Ok(())
    }
}
