//! Hooks that route remote addresses of a module system over the session.

use crate::address::{is_remote_address, normalize};
use crate::fetch::fetch_remote;
use crate::hooks::{
    FetchHook, FetchNext, Hook, Load, NormalizeHook, NormalizeNext, NormalizeRequest,
    NormalizeSyncHook, NormalizeSyncNext,
};
use crate::system::ModuleSystem;
use async_trait::async_trait;
use l2l_session::Session;
use l2l_types::error::L2lResult;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Hook names, shared by every system the router is installed on.
pub const CONFORMANT_URL_HOOK: &str = "l2lMakeConformantURL";
pub const CONFORMANT_URL_SYNC_HOOK: &str = "l2lMakeConformantURLSync";
pub const FETCH_HOOK: &str = "l2lFetch";

/// Canonicalize the parent so relative names join onto a parseable URL.
fn conformant_request(request: &NormalizeRequest) -> NormalizeRequest {
    NormalizeRequest {
        name: request.name.clone(),
        parent: request.parent.as_deref().map(normalize),
    }
}

/// Makes async normalization results conformant remote addresses.
pub struct ConformantUrl;

impl Hook for ConformantUrl {
    fn name(&self) -> &str {
        CONFORMANT_URL_HOOK
    }
}

#[async_trait]
impl NormalizeHook for ConformantUrl {
    async fn normalize(
        &self,
        request: &NormalizeRequest,
        proceed: NormalizeNext<'_>,
    ) -> L2lResult<String> {
        let resolved = proceed.run(&conformant_request(request)).await?;
        Ok(normalize(&resolved))
    }
}

/// Sync counterpart of [`ConformantUrl`].
pub struct ConformantUrlSync;

impl Hook for ConformantUrlSync {
    fn name(&self) -> &str {
        CONFORMANT_URL_SYNC_HOOK
    }
}

impl NormalizeSyncHook for ConformantUrlSync {
    fn normalize_sync(
        &self,
        request: &NormalizeRequest,
        proceed: NormalizeSyncNext<'_>,
    ) -> L2lResult<String> {
        let resolved = proceed.run(&conformant_request(request))?;
        Ok(normalize(&resolved))
    }
}

/// Fetches remote addresses from their owning peer.
pub struct RemoteFetch {
    session: Arc<dyn Session>,
    online_timeout: Duration,
}

impl RemoteFetch {
    pub fn new(session: Arc<dyn Session>, online_timeout: Duration) -> Self {
        Self {
            session,
            online_timeout,
        }
    }
}

impl Hook for RemoteFetch {
    fn name(&self) -> &str {
        FETCH_HOOK
    }
}

#[async_trait]
impl FetchHook for RemoteFetch {
    async fn fetch(&self, load: &Load, proceed: FetchNext<'_>) -> L2lResult<String> {
        let address = load.target();
        if !is_remote_address(address) {
            return proceed.run(load).await;
        }
        debug!(address = %address, "Routing fetch to remote session");
        fetch_remote(self.session.as_ref(), address, self.online_timeout).await
    }
}

/// Install the three routing hooks on `system`.
///
/// Hooks already present under their names are left in place.
pub fn install(system: &ModuleSystem, session: Arc<dyn Session>, online_timeout: Duration) {
    let hooks = system.hooks();
    let fresh = [
        hooks.normalize.install(Arc::new(ConformantUrl)),
        hooks.normalize_sync.install(Arc::new(ConformantUrlSync)),
        hooks
            .fetch
            .install(Arc::new(RemoteFetch::new(session, online_timeout))),
    ];
    info!(
        system = %system.name(),
        installed = fresh.iter().filter(|f| **f).count(),
        "l2l routing hooks installed"
    );
}

/// Remove the routing hooks from `system`.
pub fn uninstall(system: &ModuleSystem) {
    let hooks = system.hooks();
    hooks.normalize.remove(CONFORMANT_URL_HOOK);
    hooks.normalize_sync.remove(CONFORMANT_URL_SYNC_HOOK);
    hooks.fetch.remove(FETCH_HOOK);
    info!(system = %system.name(), "l2l routing hooks removed");
}

/// Whether all routing hooks are present on `system`.
pub fn is_installed(system: &ModuleSystem) -> bool {
    let hooks = system.hooks();
    hooks.normalize.is_installed(CONFORMANT_URL_HOOK)
        && hooks.normalize_sync.is_installed(CONFORMANT_URL_SYNC_HOOK)
        && hooks.fetch.is_installed(FETCH_HOOK)
}
