//! Subcommand implementations.

pub mod client;
pub mod serve;

use crate::ui;
use l2l_modules::{L2lModules, LocalFileStore, ModuleSystem, ServiceContext, SystemRegistry};
use l2l_session::{NodeConfig, PeerRegistry, Session, SessionNode};
use l2l_types::config::ModulesConfig;
use l2l_types::error::{L2lError, L2lResult};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// This process as a peer: a TCP session with the protocol installed.
pub struct LocalPeer {
    pub node: Arc<SessionNode>,
    pub modules: L2lModules,
    pub accept: JoinHandle<()>,
}

impl LocalPeer {
    pub fn session(&self) -> &dyn Session {
        self.node.as_ref()
    }

    /// Connect to the peer at `addr`, returning its session id.
    pub async fn connect(&self, addr: &str) -> L2lResult<String> {
        let addr = parse_addr(addr)?;
        Ok(self.node.connect_to_peer(addr).await?)
    }

    pub fn shutdown(self) {
        self.modules.uninstall();
        self.node.shutdown();
        self.accept.abort();
    }
}

/// Start the session node and install the protocol on it.
pub async fn start_peer(config: &ModulesConfig) -> L2lResult<LocalPeer> {
    let node_config = NodeConfig {
        listen_addr: parse_addr(&config.listen_addr)?,
        session_id: config.session_id.clone(),
    };
    let (node, accept) = SessionNode::start(node_config, PeerRegistry::new()).await?;

    let system = Arc::new(ModuleSystem::from_dir(
        config.system_name.clone(),
        &config.base_dir,
    )?);
    let ctx = ServiceContext::new(
        SystemRegistry::new(),
        system,
        Arc::new(LocalFileStore::new(&config.base_dir)),
    );
    let session: Arc<dyn Session> = node.clone();
    let modules = L2lModules::initialize(session, ctx, config);
    Ok(LocalPeer {
        node,
        modules,
        accept,
    })
}

pub fn parse_addr(addr: &str) -> L2lResult<SocketAddr> {
    addr.parse()
        .map_err(|e| L2lError::Config(format!("invalid address {addr}: {e}")))
}

/// Run a command future to completion, exiting non-zero on failure.
pub fn run<F>(command: F)
where
    F: Future<Output = L2lResult<()>>,
{
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Failed to create Tokio runtime: {e}"));
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(command) {
        ui::error(&e.to_string());
        std::process::exit(1);
    }
}
