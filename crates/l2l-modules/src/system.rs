//! The host module graph: resolution tables, hook pipelines, source loading
//! and the notification stream of module events.

use crate::address::is_remote_address;
use crate::hooks::{
    FetchBase, FetchNext, Hooks, Load, NormalizeNext, NormalizeRequest, NormalizeSyncNext,
};
use crate::loader::{FileUrlLoader, SourceLoader};
use crate::subscribers::SubscriberRegistry;
use async_trait::async_trait;
use dashmap::DashMap;
use l2l_types::error::{L2lError, L2lResult};
use l2l_types::event::ModuleEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::debug;
use url::Url;

/// Maximum events retained in the history ring buffer.
const HISTORY_SIZE: usize = 1000;

/// Capacity of the notification channel.
const EVENT_CHANNEL_SIZE: usize = 1024;

/// Resolution tables of a module system.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemTables {
    /// Package address → package config. A config's `name` lets bare
    /// imports of that package resolve to the address.
    pub packages: BTreeMap<String, Value>,
    /// Name → address overrides.
    pub map: BTreeMap<String, String>,
}

impl SystemTables {
    /// Copy without packages living at, or names mapped to, remote addresses.
    pub fn without_remote(&self) -> Self {
        Self {
            packages: self
                .packages
                .iter()
                .filter(|(address, _)| !is_remote_address(address))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            map: self
                .map
                .iter()
                .filter(|(_, target)| !is_remote_address(target))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    fn lookup_map(&self, name: &str) -> Option<String> {
        if let Some(target) = self.map.get(name) {
            return Some(target.clone());
        }
        // Longest prefix mapping `key/` wins.
        self.map
            .iter()
            .filter(|(key, _)| {
                name.strip_prefix(key.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|(key, _)| key.len())
            .map(|(key, target)| format!("{}{}", target.trim_end_matches('/'), &name[key.len()..]))
    }

    fn lookup_package(&self, name: &str) -> Option<String> {
        let (head, rest) = match name.split_once('/') {
            Some((head, rest)) => (head, rest),
            None => (name, ""),
        };
        self.packages.iter().find_map(|(address, config)| {
            let pkg_name = config.get("name").and_then(Value::as_str)?;
            if pkg_name != head {
                return None;
            }
            let base = address.trim_end_matches('/');
            Some(if rest.is_empty() {
                base.to_string()
            } else {
                format!("{base}/{rest}")
            })
        })
    }
}

fn is_bare_name(name: &str) -> bool {
    !(name.starts_with("./") || name.starts_with("../") || name.starts_with('/'))
}

/// A module system: one named graph of modules with its own resolution
/// tables, hooks, subscribers and event stream.
pub struct ModuleSystem {
    name: String,
    base_url: String,
    tables: RwLock<SystemTables>,
    hooks: Hooks,
    loader: Arc<dyn SourceLoader>,
    events: broadcast::Sender<ModuleEvent>,
    history: RwLock<VecDeque<ModuleEvent>>,
    subscribers: SubscriberRegistry,
    /// Serializes remote resolutions that swap the tables.
    resolution: Mutex<()>,
}

impl ModuleSystem {
    /// Create a system resolving relative names against `base_url`.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            name: name.into(),
            base_url,
            tables: RwLock::new(SystemTables::default()),
            hooks: Hooks::default(),
            loader: Arc::new(FileUrlLoader),
            events,
            history: RwLock::new(VecDeque::with_capacity(HISTORY_SIZE)),
            subscribers: SubscriberRegistry::new(),
            resolution: Mutex::new(()),
        }
    }

    /// Create a system serving the modules below `dir`.
    pub fn from_dir(name: impl Into<String>, dir: &Path) -> L2lResult<Self> {
        let dir = dir.canonicalize()?;
        let base_url = Url::from_directory_path(&dir)
            .map_err(|_| L2lError::Config(format!("not a directory path: {}", dir.display())))?;
        Ok(Self::new(name, base_url.to_string()))
    }

    /// Replace the built-in source loader.
    pub fn with_loader(mut self, loader: Arc<dyn SourceLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn subscribers(&self) -> &SubscriberRegistry {
        &self.subscribers
    }

    fn read_tables(&self) -> RwLockReadGuard<'_, SystemTables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_tables(&self) -> RwLockWriteGuard<'_, SystemTables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the resolution tables.
    pub fn tables(&self) -> SystemTables {
        self.read_tables().clone()
    }

    pub fn set_tables(&self, tables: SystemTables) {
        *self.write_tables() = tables;
    }

    pub fn add_package(&self, address: impl Into<String>, config: Value) {
        self.write_tables().packages.insert(address.into(), config);
    }

    pub fn set_mapping(&self, name: impl Into<String>, target: impl Into<String>) {
        self.write_tables().map.insert(name.into(), target.into());
    }

    /// Built-in normalization: map, packages, absolute, then relative.
    fn default_normalize(&self, request: &NormalizeRequest) -> L2lResult<String> {
        let name = request.name.as_str();
        {
            let tables = self.read_tables();
            if let Some(target) = tables.lookup_map(name) {
                return Ok(target);
            }
            if is_bare_name(name) {
                if let Some(address) = tables.lookup_package(name) {
                    return Ok(address);
                }
            }
        }
        if name.contains("://") {
            return Ok(name.to_string());
        }
        let base = request.parent.as_deref().unwrap_or(&self.base_url);
        Url::parse(base)
            .and_then(|b| b.join(name))
            .map(|u| u.to_string())
            .map_err(|e| L2lError::InvalidAddress(format!("{name} relative to {base}: {e}")))
    }

    /// Resolve `name` imported from `parent` through the async pipeline.
    pub async fn normalize(&self, name: &str, parent: Option<&str>) -> L2lResult<String> {
        let request = NormalizeRequest::new(name, parent);
        let hooks = self.hooks.normalize.snapshot();
        let base = |req: &NormalizeRequest| self.default_normalize(req);
        NormalizeNext::new(&hooks, &base).run(&request).await
    }

    /// Resolve `name` imported from `parent` through the sync pipeline.
    pub fn normalize_sync(&self, name: &str, parent: Option<&str>) -> L2lResult<String> {
        let request = NormalizeRequest::new(name, parent);
        let hooks = self.hooks.normalize_sync.snapshot();
        let base = |req: &NormalizeRequest| self.default_normalize(req);
        NormalizeSyncNext::new(&hooks, &base).run(&request)
    }

    /// Fetch source for a normalized load through the fetch pipeline.
    pub async fn fetch(&self, load: &Load) -> L2lResult<String> {
        let hooks = self.hooks.fetch.snapshot();
        FetchNext::new(&hooks, self).run(load).await
    }

    /// Resolve `path` relative to `parent` and return the module source.
    pub async fn source_of(&self, path: &str, parent: Option<&str>) -> L2lResult<String> {
        let address = self.normalize(path, parent).await?;
        debug!(system = %self.name, path = %path, address = %address, "Resolving source");
        self.fetch(&Load::new(path, address)).await
    }

    /// Like [`source_of`](Self::source_of), but only for modules this peer
    /// owns. A name that resolves to a remote address fails with
    /// `NotLocal` before any fetch hook runs.
    pub async fn local_source_of(&self, path: &str, parent: Option<&str>) -> L2lResult<String> {
        let address = self.normalize(path, parent).await?;
        if is_remote_address(&address) {
            return Err(L2lError::NotLocal(address));
        }
        debug!(system = %self.name, path = %path, address = %address, "Resolving local source");
        self.fetch(&Load::new(path, address)).await
    }

    /// Lock the system for one resolution and hide remote table entries.
    ///
    /// The original tables come back when the returned view is dropped.
    pub async fn local_view(&self) -> LocalView<'_> {
        let lock = self.resolution.lock().await;
        let saved = {
            let mut tables = self.write_tables();
            let filtered = tables.without_remote();
            std::mem::replace(&mut *tables, filtered)
        };
        LocalView {
            system: self,
            saved: Some(saved),
            _lock: lock,
        }
    }

    /// Record a module event and notify listeners.
    pub fn record_event(&self, event: ModuleEvent) {
        debug!(
            system = %self.name,
            kind = %event.kind,
            module = ?event.module,
            remote = event.is_remote_event,
            "Recording module event"
        );
        {
            let mut history = self.history.write().unwrap_or_else(|e| e.into_inner());
            if history.len() >= HISTORY_SIZE {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Listen to events recorded from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ModuleEvent> {
        self.events.subscribe()
    }

    /// Most recent events, oldest first.
    pub fn history(&self, limit: usize) -> Vec<ModuleEvent> {
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }
}

#[async_trait]
impl FetchBase for ModuleSystem {
    async fn fetch_base(&self, load: &Load) -> L2lResult<String> {
        self.loader.load(load).await
    }
}

/// A module system locked for one resolution, with remote entries hidden.
pub struct LocalView<'a> {
    system: &'a ModuleSystem,
    saved: Option<SystemTables>,
    _lock: MutexGuard<'a, ()>,
}

impl Drop for LocalView<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            *self.system.write_tables() = saved;
            debug!(system = %self.system.name, "Restored resolution tables");
        }
    }
}

/// Module systems of a process, by name.
#[derive(Clone, Default)]
pub struct SystemRegistry {
    systems: Arc<DashMap<String, Arc<ModuleSystem>>>,
}

impl SystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a system under its name, replacing any previous one.
    pub fn register(&self, system: Arc<ModuleSystem>) {
        self.systems.insert(system.name().to_string(), system);
    }

    pub fn get(&self, name: &str) -> Option<Arc<ModuleSystem>> {
        self.systems.get(name).map(|s| Arc::clone(s.value()))
    }

    pub fn remove(&self, name: &str) -> Option<Arc<ModuleSystem>> {
        self.systems.remove(name).map(|(_, s)| s)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.systems.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
