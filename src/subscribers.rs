// src/subscribers.rs
//! Subscriber registry: recipient id → subscription state.
//!
//! Every mutation replaces exactly one record under the write lock and then
//! rewrites the backing JSON file atomically (temp file + rename). Broadcasts
//! take an owned snapshot via [`SubscriberRegistry::list_active`], so later
//! writes never leak into an in-flight delivery.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::RegistryError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    pub subscribed_at: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsubscribed_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

/// Optional profile data captured at subscribe time.
#[derive(Debug, Clone, Default)]
pub struct SubscriberMeta {
    pub username: Option<String>,
    pub first_name: Option<String>,
}

impl SubscriberMeta {
    pub fn new(username: Option<String>, first_name: Option<String>) -> Self {
        Self {
            username,
            first_name,
        }
    }
}

/// On-disk record; the id lives in the map key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSubscriber {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    subscribed_at: DateTime<Utc>,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unsubscribed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct SubscriberRegistry {
    inner: RwLock<BTreeMap<i64, Subscriber>>,
    path: Option<PathBuf>,
}

impl SubscriberRegistry {
    /// Registry without a backing file (tests, dry runs).
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
            path: None,
        }
    }

    /// Load from `path`; a missing file starts an empty registry.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let map = load_file(&path)?;
        info!(
            target: "subscribers",
            path = %path.display(),
            total = map.len(),
            active = map.values().filter(|s| s.active).count(),
            "subscriber registry loaded"
        );
        Ok(Self {
            inner: RwLock::new(map),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Subscribe `id`. Returns `false` when it is already active (record untouched).
    /// An inactive record is reactivated in place with a fresh `subscribed_at`.
    pub fn add(&self, id: i64, meta: SubscriberMeta) -> Result<bool, RegistryError> {
        let mut map = self.inner.write().map_err(|_| RegistryError::Poisoned)?;
        let now = Utc::now();

        let next = match map.get(&id) {
            Some(existing) if existing.active => {
                debug!(target: "subscribers", id, "already subscribed");
                return Ok(false);
            }
            Some(existing) => Subscriber {
                id,
                username: meta.username.or_else(|| existing.username.clone()),
                first_name: meta.first_name.or_else(|| existing.first_name.clone()),
                subscribed_at: now,
                active: true,
                unsubscribed_at: None,
            },
            None => Subscriber {
                id,
                username: meta.username,
                first_name: meta.first_name,
                subscribed_at: now,
                active: true,
                unsubscribed_at: None,
            },
        };

        let previous = map.insert(id, next);
        if let Err(e) = self.persist(&map) {
            // keep memory and disk consistent
            match previous {
                Some(p) => map.insert(id, p),
                None => map.remove(&id),
            };
            return Err(e);
        }
        info!(target: "subscribers", id, "subscriber added");
        Ok(true)
    }

    /// Soft-remove `id`. Returns `false` when unknown or already inactive.
    pub fn remove(&self, id: i64) -> Result<bool, RegistryError> {
        let mut map = self.inner.write().map_err(|_| RegistryError::Poisoned)?;
        let Some(existing) = map.get(&id) else {
            debug!(target: "subscribers", id, "remove: not found");
            return Ok(false);
        };
        if !existing.active {
            debug!(target: "subscribers", id, "remove: already inactive");
            return Ok(false);
        }

        let mut next = existing.clone();
        next.active = false;
        next.unsubscribed_at = Some(Utc::now());

        let previous = map.insert(id, next);
        if let Err(e) = self.persist(&map) {
            if let Some(p) = previous {
                map.insert(id, p);
            }
            return Err(e);
        }
        info!(target: "subscribers", id, "subscriber removed");
        Ok(true)
    }

    /// Snapshot of active ids, in key order.
    pub fn list_active(&self) -> Result<Vec<i64>, RegistryError> {
        let map = self.inner.read().map_err(|_| RegistryError::Poisoned)?;
        Ok(map
            .values()
            .filter(|s| s.active)
            .map(|s| s.id)
            .collect())
    }

    /// Snapshot of every record, active or not.
    pub fn all(&self) -> Result<Vec<Subscriber>, RegistryError> {
        let map = self.inner.read().map_err(|_| RegistryError::Poisoned)?;
        Ok(map.values().cloned().collect())
    }

    pub fn get(&self, id: i64) -> Result<Option<Subscriber>, RegistryError> {
        let map = self.inner.read().map_err(|_| RegistryError::Poisoned)?;
        Ok(map.get(&id).cloned())
    }

    pub fn active_count(&self) -> Result<usize, RegistryError> {
        let map = self.inner.read().map_err(|_| RegistryError::Poisoned)?;
        Ok(map.values().filter(|s| s.active).count())
    }

    fn persist(&self, map: &BTreeMap<i64, Subscriber>) -> Result<(), RegistryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let stored: BTreeMap<String, StoredSubscriber> = map
            .values()
            .map(|s| {
                (
                    s.id.to_string(),
                    StoredSubscriber {
                        username: s.username.clone(),
                        first_name: s.first_name.clone(),
                        subscribed_at: s.subscribed_at,
                        active: s.active,
                        unsubscribed_at: s.unsubscribed_at,
                    },
                )
            })
            .collect();
        let json = serde_json::to_string_pretty(&stored)?;
        write_atomic(path, json.as_bytes())?;
        debug!(target: "subscribers", path = %path.display(), "subscribers saved");
        Ok(())
    }
}

fn load_file(path: &Path) -> Result<BTreeMap<i64, Subscriber>, RegistryError> {
    let content = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let stored: BTreeMap<String, StoredSubscriber> = serde_json::from_str(&content)?;
    let mut out = BTreeMap::new();
    for (key, rec) in stored {
        let Ok(id) = key.trim().parse::<i64>() else {
            warn!(target: "subscribers", key = %key, "skipping non-numeric subscriber key");
            continue;
        };
        out.insert(
            id,
            Subscriber {
                id,
                username: rec.username,
                first_name: rec.first_name,
                subscribed_at: rec.subscribed_at,
                active: rec.active,
                unsubscribed_at: rec.unsubscribed_at,
            },
        );
    }
    Ok(out)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    fs::rename(tmp, path)?;
    Ok(())
}
