//! Named interception points of a module system.
//!
//! Three points exist: async normalization, sync normalization and fetching.
//! Each holds an ordered chain of named hooks. A hook receives the request
//! plus a `proceed` continuation that runs the rest of the chain and finally
//! the system's built-in behavior. The most recently installed hook runs
//! first. A name can be installed at most once per point.

use async_trait::async_trait;
use l2l_types::error::L2lResult;
use std::sync::{Arc, RwLock};

/// A name-to-address resolution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeRequest {
    /// The name as written by the importer.
    pub name: String,
    /// Address of the importing module, if any.
    pub parent: Option<String>,
}

impl NormalizeRequest {
    pub fn new(name: impl Into<String>, parent: Option<&str>) -> Self {
        Self {
            name: name.into(),
            parent: parent.map(str::to_string),
        }
    }
}

/// A source fetch request for an already normalized module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Load {
    /// Module name as requested.
    pub name: String,
    /// Normalized address to fetch.
    pub address: String,
}

impl Load {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }

    /// The address to fetch, falling back to the name.
    pub fn target(&self) -> &str {
        if self.address.is_empty() {
            &self.name
        } else {
            &self.address
        }
    }
}

/// Common identity of every hook.
pub trait Hook: Send + Sync {
    /// Name the hook is installed under.
    fn name(&self) -> &str;
}

/// Async normalization hook.
#[async_trait]
pub trait NormalizeHook: Hook {
    async fn normalize(
        &self,
        request: &NormalizeRequest,
        proceed: NormalizeNext<'_>,
    ) -> L2lResult<String>;
}

/// Sync normalization hook.
pub trait NormalizeSyncHook: Hook {
    fn normalize_sync(
        &self,
        request: &NormalizeRequest,
        proceed: NormalizeSyncNext<'_>,
    ) -> L2lResult<String>;
}

/// Fetch hook.
#[async_trait]
pub trait FetchHook: Hook {
    async fn fetch(&self, load: &Load, proceed: FetchNext<'_>) -> L2lResult<String>;
}

/// Built-in behavior at the end of a fetch chain.
#[async_trait]
pub trait FetchBase: Send + Sync {
    async fn fetch_base(&self, load: &Load) -> L2lResult<String>;
}

type NormalizeFn<'a> = &'a (dyn Fn(&NormalizeRequest) -> L2lResult<String> + Send + Sync);

/// Continuation of an async normalization chain.
pub struct NormalizeNext<'a> {
    hooks: &'a [Arc<dyn NormalizeHook>],
    base: NormalizeFn<'a>,
}

impl<'a> NormalizeNext<'a> {
    pub(crate) fn new(hooks: &'a [Arc<dyn NormalizeHook>], base: NormalizeFn<'a>) -> Self {
        Self { hooks, base }
    }

    /// Run the remaining hooks, then the built-in normalization.
    pub async fn run(self, request: &NormalizeRequest) -> L2lResult<String> {
        match self.hooks.split_last() {
            Some((hook, rest)) => {
                hook.normalize(request, NormalizeNext::new(rest, self.base))
                    .await
            }
            None => (self.base)(request),
        }
    }
}

/// Continuation of a sync normalization chain.
pub struct NormalizeSyncNext<'a> {
    hooks: &'a [Arc<dyn NormalizeSyncHook>],
    base: NormalizeFn<'a>,
}

impl<'a> NormalizeSyncNext<'a> {
    pub(crate) fn new(hooks: &'a [Arc<dyn NormalizeSyncHook>], base: NormalizeFn<'a>) -> Self {
        Self { hooks, base }
    }

    pub fn run(self, request: &NormalizeRequest) -> L2lResult<String> {
        match self.hooks.split_last() {
            Some((hook, rest)) => hook.normalize_sync(request, NormalizeSyncNext::new(rest, self.base)),
            None => (self.base)(request),
        }
    }
}

/// Continuation of a fetch chain.
pub struct FetchNext<'a> {
    hooks: &'a [Arc<dyn FetchHook>],
    base: &'a dyn FetchBase,
}

impl<'a> FetchNext<'a> {
    pub(crate) fn new(hooks: &'a [Arc<dyn FetchHook>], base: &'a dyn FetchBase) -> Self {
        Self { hooks, base }
    }

    pub async fn run(self, load: &Load) -> L2lResult<String> {
        match self.hooks.split_last() {
            Some((hook, rest)) => hook.fetch(load, FetchNext::new(rest, self.base)).await,
            None => self.base.fetch_base(load).await,
        }
    }
}

/// Ordered, uniquely named hooks for one interception point.
pub struct HookChain<H: ?Sized> {
    hooks: RwLock<Vec<Arc<H>>>,
}

impl<H: ?Sized + Hook> HookChain<H> {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Install a hook. Returns false if the name is already taken.
    pub fn install(&self, hook: Arc<H>) -> bool {
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        if hooks.iter().any(|h| h.name() == hook.name()) {
            return false;
        }
        hooks.push(hook);
        true
    }

    /// Remove the hook installed under `name`.
    pub fn remove(&self, name: &str) -> bool {
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        let before = hooks.len();
        hooks.retain(|h| h.name() != name);
        hooks.len() != before
    }

    pub fn is_installed(&self, name: &str) -> bool {
        let hooks = self.hooks.read().unwrap_or_else(|e| e.into_inner());
        hooks.iter().any(|h| h.name() == name)
    }

    /// Installed names, in installation order.
    pub fn names(&self) -> Vec<String> {
        let hooks = self.hooks.read().unwrap_or_else(|e| e.into_inner());
        hooks.iter().map(|h| h.name().to_string()).collect()
    }

    /// Copy of the chain, so it can be run without holding the lock.
    pub(crate) fn snapshot(&self) -> Vec<Arc<H>> {
        self.hooks.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl<H: ?Sized + Hook> Default for HookChain<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// The three interception points of one module system.
#[derive(Default)]
pub struct Hooks {
    pub normalize: HookChain<dyn NormalizeHook>,
    pub normalize_sync: HookChain<dyn NormalizeSyncHook>,
    pub fetch: HookChain<dyn FetchHook>,
}
