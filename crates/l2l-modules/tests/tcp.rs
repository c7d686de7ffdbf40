//! The protocol over real TCP session nodes.

use l2l_modules::{subscribe_remote, L2lModules, LocalFileStore, ModuleSystem, ServiceContext, SystemRegistry};
use l2l_session::{NodeConfig, PeerRegistry, Session, SessionNode};
use l2l_types::config::ModulesConfig;
use l2l_types::event::ModuleEvent;
use std::sync::Arc;
use std::time::Duration;

async fn node(session_id: &str, dir: &std::path::Path) -> (Arc<SessionNode>, L2lModules) {
    let config = NodeConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        session_id: session_id.to_string(),
    };
    let (node, _accept) = SessionNode::start(config, PeerRegistry::new()).await.unwrap();
    let system = Arc::new(ModuleSystem::from_dir("default", dir).unwrap());
    let ctx = ServiceContext::new(SystemRegistry::new(), system, Arc::new(LocalFileStore::new(dir)));
    let session: Arc<dyn Session> = node.clone();
    let modules = L2lModules::initialize(session, ctx, &ModulesConfig::default());
    (node, modules)
}

#[tokio::test]
async fn test_fetch_and_relay_over_tcp() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    std::fs::write(server_dir.path().join("a.js"), "over the wire").unwrap();

    let (server, server_modules) = node("tracker:srv", server_dir.path()).await;
    let (client, client_modules) = node("tracker:cli", client_dir.path()).await;
    let announced = client.connect_to_peer(server.local_addr()).await.unwrap();
    assert_eq!(announced, "tracker:srv");

    let source = client_modules
        .default_system()
        .source_of("l2l://tracker:srv/a.js", None)
        .await
        .unwrap();
    assert_eq!(source, "over the wire");

    let client_session: &dyn Session = client.as_ref();
    assert_eq!(
        subscribe_remote(client_session, "tracker:srv", None).await.unwrap(),
        "subscribed"
    );
    let mut received = client_modules.default_system().subscribe_events();
    let server_system = server_modules.default_system();
    server_system.record_event(ModuleEvent::new(
        "modulechange",
        format!("{}a.js", server_system.base_url()),
    ));

    let relayed = tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await
        .expect("no event relayed")
        .unwrap();
    assert_eq!(relayed.module.as_deref(), Some("l2l://tracker:srv/a.js"));
    assert_eq!(relayed.source_session.as_deref(), Some("tracker:srv"));
}
