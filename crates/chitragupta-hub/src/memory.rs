// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::HubError;

/// Callback invoked with `(key, value, version)` after every write.
pub type RegionWatcher = Arc<dyn Fn(&str, &Value, u64) + Send + Sync>;

struct Region {
    owner: String,
    /// Agents allowed to write; `None` means anyone.
    access: Option<HashSet<String>>,
    data: HashMap<String, Value>,
    version: u64,
    watchers: Vec<RegionWatcher>,
}

/// Named shared-memory regions with a monotone version counter per
/// region.  The version is the authoritative write order.
pub struct RegionManager {
    destroyed: Arc<AtomicBool>,
    state: Mutex<HashMap<String, Region>>,
}

impl RegionManager {
    pub(crate) fn new(destroyed: Arc<AtomicBool>) -> Self {
        Self {
            destroyed,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn check_destroyed(&self) -> Result<(), HubError> {
        if self.destroyed.load(Ordering::SeqCst) {
            Err(HubError::Destroyed)
        } else {
            Ok(())
        }
    }

    pub fn create(
        &self,
        name: &str,
        owner: &str,
        access_list: Option<Vec<String>>,
    ) -> Result<(), HubError> {
        self.check_destroyed()?;
        let mut state = self.state.lock().unwrap();
        if state.contains_key(name) {
            return Err(HubError::AlreadyExists(format!("region {name}")));
        }
        // The owner always writes, regardless of the access list.
        let access = access_list.map(|list| {
            let mut set: HashSet<String> = list.into_iter().collect();
            set.insert(owner.to_string());
            set
        });
        state.insert(
            name.to_string(),
            Region {
                owner: owner.to_string(),
                access,
                data: HashMap::new(),
                version: 0,
                watchers: Vec::new(),
            },
        );
        Ok(())
    }

    /// Write one key.  Returns the region version after the write.
    pub fn write(
        &self,
        name: &str,
        agent: &str,
        key: &str,
        value: Value,
    ) -> Result<u64, HubError> {
        self.check_destroyed()?;
        let (version, watchers) = {
            let mut state = self.state.lock().unwrap();
            let region = state
                .get_mut(name)
                .ok_or_else(|| HubError::NotFound(format!("region {name}")))?;
            if let Some(access) = &region.access {
                if !access.contains(agent) {
                    return Err(HubError::AccessDenied {
                        region: name.to_string(),
                        agent: agent.to_string(),
                    });
                }
            }
            region.version += 1;
            region.data.insert(key.to_string(), value.clone());
            (region.version, region.watchers.clone())
        };
        for w in watchers {
            w(key, &value, version);
        }
        Ok(version)
    }

    pub fn read(&self, name: &str, key: &str) -> Result<Option<Value>, HubError> {
        self.check_destroyed()?;
        let state = self.state.lock().unwrap();
        let region = state
            .get(name)
            .ok_or_else(|| HubError::NotFound(format!("region {name}")))?;
        Ok(region.data.get(key).cloned())
    }

    pub fn version(&self, name: &str) -> Result<u64, HubError> {
        self.check_destroyed()?;
        let state = self.state.lock().unwrap();
        state
            .get(name)
            .map(|r| r.version)
            .ok_or_else(|| HubError::NotFound(format!("region {name}")))
    }

    pub fn watch(&self, name: &str, watcher: RegionWatcher) -> Result<(), HubError> {
        self.check_destroyed()?;
        let mut state = self.state.lock().unwrap();
        let region = state
            .get_mut(name)
            .ok_or_else(|| HubError::NotFound(format!("region {name}")))?;
        region.watchers.push(watcher);
        Ok(())
    }

    /// Delete a region.  Only the owner may delete.
    pub fn delete(&self, name: &str, agent: &str) -> Result<(), HubError> {
        self.check_destroyed()?;
        let mut state = self.state.lock().unwrap();
        let region = state
            .get(name)
            .ok_or_else(|| HubError::NotFound(format!("region {name}")))?;
        if region.owner != agent {
            return Err(HubError::AccessDenied {
                region: name.to_string(),
                agent: agent.to_string(),
            });
        }
        state.remove(name);
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.state.lock().unwrap().len()
    }

    pub(crate) fn destroy(&self) {
        self.state.lock().unwrap().clear();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
