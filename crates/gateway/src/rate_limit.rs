use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Fixed-window counter keyed by visitor. Shared across handler clones.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<HashMap<String, Window>>>,
    window: Duration,
    max_keys: usize,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, max_keys: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_keys: max_keys.max(1),
        }
    }

    /// Records one hit for `key`; `false` once `limit` hits landed in the current window.
    /// A `limit` of zero disables limiting.
    pub fn allow(&self, key: &str, limit: u32) -> bool {
        if limit == 0 {
            return true;
        }

        self.allow_at(key, limit, Instant::now())
    }

    fn allow_at(&self, key: &str, limit: u32, now: Instant) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if !inner.contains_key(key) && inner.len() >= self.max_keys {
            let window = self.window;
            inner.retain(|_, entry| now.duration_since(entry.started) < window);
            if inner.len() >= self.max_keys {
                evict_oldest(&mut inner);
            }
        }

        let entry = inner.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= limit {
            return false;
        }
        entry.count += 1;
        true
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

fn evict_oldest(windows: &mut HashMap<String, Window>) {
    let oldest = windows
        .iter()
        .min_by_key(|(_, entry)| entry.started)
        .map(|(key, _)| key.clone());
    if let Some(key) = oldest {
        windows.remove(&key);
    }
}
