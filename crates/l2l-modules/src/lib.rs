//! Remote module loading over l2l sessions.
//!
//! A module system on one peer resolves, fetches and receives change
//! notifications for modules living on another peer, addressed as
//! `l2l://<sessionId>/<path>`.
//!
//! ## Architecture
//!
//! - **address**: canonical form and parsing of remote addresses
//! - **hooks / router**: interceptor chains of a module system, and the hooks
//!   that route remote addresses over the session
//! - **fetch / fs**: client requests (source fetch, filesystem bridge)
//! - **subscribers / relay**: who receives this peer's module events, and the
//!   task forwarding them
//! - **services**: handlers answering the protocol's actions
//! - **system**: the module graph the protocol plugs into

pub mod address;
pub mod fetch;
pub mod fs;
pub mod hooks;
pub mod loader;
pub mod relay;
pub mod router;
pub mod services;
pub mod store;
pub mod subscribers;
pub mod system;

pub use address::{local_to_remote, normalize, parse_address, RemoteAddress};
pub use fetch::fetch_remote;
pub use fs::{fs_request, FsMethod, FsOutcome};
pub use relay::{Delivery, EventRelay};
pub use services::{ServiceContext, SYSTEM_KEY};
pub use store::{FileStore, LocalFileStore};
pub use subscribers::{subscribe_remote, unsubscribe_remote, SubscriberRegistry};
pub use system::{ModuleSystem, SystemRegistry, SystemTables};

use l2l_session::Session;
use l2l_types::config::ModulesConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// The protocol installed on a session: service handlers, plus routing hooks
/// and an event relay per attached module system.
pub struct L2lModules {
    session: Arc<dyn Session>,
    ctx: ServiceContext,
    online_timeout: Duration,
    inspect_depth: usize,
    relays: Vec<(Arc<ModuleSystem>, JoinHandle<()>)>,
}

impl L2lModules {
    /// Install the protocol on `session`, attaching the context's default
    /// system.
    pub fn initialize(session: Arc<dyn Session>, ctx: ServiceContext, config: &ModulesConfig) -> Self {
        services::install(session.actions(), &ctx);
        let mut modules = Self {
            session,
            online_timeout: config.online_timeout(),
            inspect_depth: config.inspect_depth,
            relays: Vec::new(),
            ctx,
        };
        let default_system = Arc::clone(modules.ctx.default_system());
        modules.attach(default_system);
        info!(session = %modules.session.session_id(), "l2l modules initialized");
        modules
    }

    /// Route `system`'s remote addresses and relay its events.
    ///
    /// The system also becomes selectable by name in requests.
    pub fn attach(&mut self, system: Arc<ModuleSystem>) {
        if self.relays.iter().any(|(s, _)| Arc::ptr_eq(s, &system)) {
            return;
        }
        self.ctx.systems().register(Arc::clone(&system));
        router::install(&system, Arc::clone(&self.session), self.online_timeout);
        let relay = Arc::new(EventRelay::new(
            Arc::clone(&system),
            Arc::clone(&self.session),
            self.inspect_depth,
        ));
        self.relays.push((system, relay.spawn()));
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    pub fn default_system(&self) -> &Arc<ModuleSystem> {
        self.ctx.default_system()
    }

    pub fn online_timeout(&self) -> Duration {
        self.online_timeout
    }

    /// Remove the handlers, hooks and relays again.
    pub fn uninstall(self) {
        services::uninstall(self.session.actions());
        for (system, relay) in self.relays {
            router::uninstall(&system);
            relay.abort();
        }
        info!(session = %self.session.session_id(), "l2l modules uninstalled");
    }
}
