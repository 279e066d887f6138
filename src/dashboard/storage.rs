//! Process-wide intern table mapping agent URL to its `HostDashboard`
//! (spec §3 "Dashboard storage", `cDashStorage` in the original).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::HostDashboard;

pub struct DashboardStorage {
    inner: RwLock<HashMap<String, Arc<HostDashboard>>>,
}

impl DashboardStorage {
    pub fn new() -> DashboardStorage {
        DashboardStorage { inner: RwLock::new(HashMap::new()) }
    }

    /// Looks up an existing dashboard for `url`, if any.
    pub fn find(&self, url: &str) -> Option<Arc<HostDashboard>> {
        self.inner.read().unwrap().get(url).cloned()
    }

    /// Returns the dashboard for `url`, creating one if this is the first
    /// reference. On insertion, opportunistically evicts entries whose
    /// sole remaining holder is this table (mirrors `cDashStorage::AddAgent`'s
    /// inline eviction, expressed here via `Arc::strong_count` instead of
    /// the original's intrusive refcount + "is-last" check).
    pub fn get_or_insert(&self,
                          url: &str,
                          karma_period_secs: u32,
                          pool_capacity: usize)
                          -> Arc<HostDashboard> {
        if let Some(d) = self.find(url) {
            return d;
        }

        let mut map = self.inner.write().unwrap();
        map.retain(|_, v| Arc::strong_count(v) > 1);
        map.entry(url.to_string())
            .or_insert_with(|| {
                Arc::new(HostDashboard::new(url.to_string(), karma_period_secs, pool_capacity))
            })
            .clone()
    }

    /// All dashboards currently interned, for ping sweeps and shutdown.
    pub fn active_dashes(&self) -> Vec<Arc<HostDashboard>> {
        self.inner.read().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }
}
