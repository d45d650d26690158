// Product list cache

use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::Product;

/// How long a project's product list is served from cache
pub const PRODUCT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

struct CachedProducts {
    products: Vec<Product>,
    fetched_at: Instant,
}

/// Thread-safe cache of product lists, keyed by project id
pub struct ProductCache {
    entries: DashMap<String, CachedProducts>,

    /// Entries older than this are ignored
    ttl: Duration,
}

impl ProductCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cached products for `project_id`, if fetched within the TTL
    pub fn get(&self, project_id: &str) -> Option<Vec<Product>> {
        let entry = self.entries.get(project_id)?;
        if entry.fetched_at.elapsed() < self.ttl {
            Some(entry.products.clone())
        } else {
            None
        }
    }

    pub fn put(&self, project_id: &str, products: Vec<Product>) {
        tracing::debug!(
            "Caching {} products for project {}",
            products.len(),
            project_id
        );
        self.entries.insert(
            project_id.to_string(),
            CachedProducts {
                products,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, project_id: &str) {
        if self.entries.remove(project_id).is_some() {
            tracing::debug!("Invalidated product cache for project {}", project_id);
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Whether `project_id` has an entry that is still fresh
    pub fn is_fresh(&self, project_id: &str) -> bool {
        self.entries
            .get(project_id)
            .map(|entry| entry.fetched_at.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    /// Number of cached projects, fresh or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ProductCache {
    fn default() -> Self {
        Self::new(PRODUCT_CACHE_TTL)
    }
}
