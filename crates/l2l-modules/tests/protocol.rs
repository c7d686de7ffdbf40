//! End-to-end protocol tests: two peers on an in-process session hub.

use async_trait::async_trait;
use l2l_modules::relay::EventRelay;
use l2l_modules::services::actions;
use l2l_modules::{
    fs_request, router, subscribe_remote, unsubscribe_remote, FsOutcome, L2lModules,
    LocalFileStore, ModuleSystem, ServiceContext, SystemRegistry,
};
use l2l_session::{ActionHandler, InboundMessage, MemorySession, Session, SessionHub};
use l2l_types::config::ModulesConfig;
use l2l_types::error::L2lError;
use l2l_types::event::{EventOptions, ModuleEvent};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const SERVER: &str = "tracker:srv";
const CLIENT: &str = "tracker:cli";

struct Peer {
    session: Arc<MemorySession>,
    modules: L2lModules,
    _dir: TempDir,
}

impl Peer {
    fn system(&self) -> &Arc<ModuleSystem> {
        self.modules.default_system()
    }

    fn dyn_session(&self) -> &dyn Session {
        self.session.as_ref()
    }
}

fn config(online_timeout_ms: u64) -> ModulesConfig {
    ModulesConfig {
        online_timeout_ms,
        ..Default::default()
    }
}

fn peer(hub: &SessionHub, id: &str, online_timeout_ms: u64) -> Peer {
    let dir = tempfile::tempdir().unwrap();
    let session = Arc::new(hub.join(id));
    let system = Arc::new(ModuleSystem::from_dir("default", dir.path()).unwrap());
    let ctx = ServiceContext::new(
        SystemRegistry::new(),
        system,
        Arc::new(LocalFileStore::new(dir.path())),
    );
    let dyn_session: Arc<dyn Session> = session.clone();
    let modules = L2lModules::initialize(dyn_session, ctx, &config(online_timeout_ms));
    Peer {
        session,
        modules,
        _dir: dir,
    }
}

fn write_module(root: &Path, rel: &str, source: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, source).unwrap();
}

fn server_root(server: &Peer) -> std::path::PathBuf {
    server._dir.path().to_path_buf()
}

#[tokio::test]
async fn test_fetch_remote_module() {
    let hub = SessionHub::new();
    let server = peer(&hub, SERVER, 500);
    let client = peer(&hub, CLIENT, 500);
    write_module(&server_root(&server), "lib/a.js", "export const a = 1;");

    let source = client
        .system()
        .source_of("l2l://tracker:srv/lib/a.js", None)
        .await
        .unwrap();
    assert_eq!(source, "export const a = 1;");
}

#[tokio::test]
async fn test_relative_import_from_remote_parent() {
    let hub = SessionHub::new();
    let server = peer(&hub, SERVER, 500);
    let client = peer(&hub, CLIENT, 500);
    write_module(&server_root(&server), "lib/b.js", "export const b = 2;");

    let address = client
        .system()
        .normalize("./b.js", Some("l2l://tracker:srv/lib/a.js"))
        .await
        .unwrap();
    assert_eq!(address, "l2l://tracker__COLON__srv/lib/b.js");

    let source = client
        .system()
        .source_of("./b.js", Some("l2l://tracker:srv/lib/a.js"))
        .await
        .unwrap();
    assert_eq!(source, "export const b = 2;");
}

#[tokio::test]
async fn test_local_modules_bypass_the_session() {
    let hub = SessionHub::new();
    let client = peer(&hub, CLIENT, 50);
    write_module(client._dir.path(), "local.js", "local");
    client.session.set_online(false);

    let source = client.system().source_of("local.js", None).await.unwrap();
    assert_eq!(source, "local");
}

#[tokio::test]
async fn test_missing_remote_module_is_remote_error() {
    let hub = SessionHub::new();
    let _server = peer(&hub, SERVER, 500);
    let client = peer(&hub, CLIENT, 500);

    let err = client
        .system()
        .source_of("l2l://tracker:srv/lib/missing.js", None)
        .await
        .unwrap_err();
    assert!(matches!(err, L2lError::Remote(_)), "got {err:?}");
}

#[tokio::test]
async fn test_fetch_from_unknown_peer_fails() {
    let hub = SessionHub::new();
    let client = peer(&hub, CLIENT, 500);

    let err = client
        .system()
        .source_of("l2l://tracker:nobody/a.js", None)
        .await
        .unwrap_err();
    assert!(matches!(err, L2lError::Transport(_)), "got {err:?}");
}

#[tokio::test]
async fn test_offline_fetch_fails_within_timeout() {
    let hub = SessionHub::new();
    let _server = peer(&hub, SERVER, 100);
    let client = peer(&hub, CLIENT, 100);
    client.session.set_online(false);

    let started = Instant::now();
    let err = client
        .system()
        .source_of("l2l://tracker:srv/lib/a.js", None)
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, L2lError::Offline { timeout_ms: 100 }), "got {err:?}");
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(1000), "took {elapsed:?}");
}

#[tokio::test]
async fn test_fetch_waits_for_session_to_come_online() {
    let hub = SessionHub::new();
    let server = peer(&hub, SERVER, 2000);
    let client = peer(&hub, CLIENT, 2000);
    write_module(&server_root(&server), "a.js", "late");
    client.session.set_online(false);

    let session = Arc::clone(&client.session);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.set_online(true);
    });
    let source = client
        .system()
        .source_of("l2l://tracker:srv/a.js", None)
        .await
        .unwrap();
    assert_eq!(source, "late");
}

#[tokio::test]
async fn test_failed_resolution_restores_tables() {
    let hub = SessionHub::new();
    let server = peer(&hub, SERVER, 500);
    let client = peer(&hub, CLIENT, 500);

    let system = server.system();
    system.add_package("l2l://tracker__COLON__other/pkg", json!({"name": "remote-pkg"}));
    system.set_mapping("x", "l2l://tracker__COLON__other/x.js");
    system.set_mapping("local", "file:///nowhere/local.js");
    let before = system.tables();

    // `x` is mapped remotely, which the server must not follow while serving.
    let err = client
        .system()
        .source_of("l2l://tracker:srv/x", None)
        .await
        .unwrap_err();
    assert!(matches!(err, L2lError::Remote(_)));
    assert_eq!(system.tables(), before);

    let err = client
        .system()
        .source_of("l2l://tracker:srv/local", None)
        .await
        .unwrap_err();
    assert!(matches!(err, L2lError::Remote(_)));
    assert_eq!(system.tables(), before);
}

#[tokio::test]
async fn test_concurrent_fetches_are_all_answered() {
    let hub = SessionHub::new();
    let server = peer(&hub, SERVER, 500);
    let client = peer(&hub, CLIENT, 500);
    for i in 0..8 {
        write_module(&server_root(&server), &format!("m{i}.js"), &format!("module {i}"));
    }

    let fetches = (0..8).map(|i| {
        let system = Arc::clone(client.system());
        async move {
            system
                .source_of(&format!("l2l://tracker:srv/m{i}.js"), None)
                .await
        }
    });
    let sources = futures::future::join_all(fetches).await;
    for (i, source) in sources.into_iter().enumerate() {
        assert_eq!(source.unwrap(), format!("module {i}"));
    }
}

#[tokio::test]
async fn test_fetch_of_remote_path_is_refused_without_locking() {
    let hub = SessionHub::new();
    let server = peer(&hub, SERVER, 500);
    let client = peer(&hub, CLIENT, 500);
    write_module(&server_root(&server), "ok.js", "ok");

    // A remote path would make the server fetch from itself while holding
    // its own resolution lock.
    for data in [
        json!({"path": "l2l://tracker:srv/ok.js"}),
        json!({"path": "l2l://tracker__COLON__srv/ok.js"}),
        json!({"path": "./ok.js", "parent": "l2l://tracker:srv/lib/a.js"}),
    ] {
        let answer = tokio::time::timeout(
            Duration::from_millis(500),
            client.dyn_session().send_to(SERVER, actions::FETCH, data),
        )
        .await
        .expect("fetch request left unanswered")
        .unwrap();
        assert!(
            answer.error_text().unwrap().contains("only local modules are served"),
            "got {answer:?}"
        );
    }

    // The system is not left locked.
    let source = tokio::time::timeout(
        Duration::from_millis(500),
        client.system().source_of("l2l://tracker:srv/ok.js", None),
    )
    .await
    .expect("later fetch left unanswered")
    .unwrap();
    assert_eq!(source, "ok");
}

#[tokio::test]
async fn test_named_system_selection() {
    let hub = SessionHub::new();
    let server = peer(&hub, SERVER, 500);
    let client = peer(&hub, CLIENT, 500);
    write_module(&server_root(&server), "a.js", "default system");

    let other_dir = tempfile::tempdir().unwrap();
    write_module(other_dir.path(), "a.js", "other system");
    let other = Arc::new(ModuleSystem::from_dir("other", other_dir.path()).unwrap());
    let mut server = server;
    server.modules.attach(other);

    let answer = client
        .dyn_session()
        .send_to(SERVER, actions::FETCH, json!({"path": "a.js", "System": "other"}))
        .await
        .unwrap();
    assert_eq!(answer.data["source"], "other system");

    let answer = client
        .dyn_session()
        .send_to(SERVER, actions::FETCH, json!({"path": "a.js"}))
        .await
        .unwrap();
    assert_eq!(answer.data["source"], "default system");

    let answer = client
        .dyn_session()
        .send_to(SERVER, actions::FETCH, json!({"path": "a.js", "System": "nope"}))
        .await
        .unwrap();
    assert!(answer.error_text().unwrap().contains("nope"));
}

#[tokio::test]
async fn test_fs_write_then_read() {
    let hub = SessionHub::new();
    let client = peer(&hub, CLIENT, 500);
    let session = client.dyn_session();
    let timeout = Duration::from_millis(500);
    let address = "l2l://tracker:cli/notes/today.txt";

    let status = fs_request(session, "l2l://tracker:cli/notes", "mkdir", Value::Null, timeout)
        .await
        .unwrap();
    assert_eq!(status, FsOutcome::Status("created".into()));

    let status = fs_request(session, address, "write", json!({"content": "hello"}), timeout)
        .await
        .unwrap();
    assert_eq!(status, FsOutcome::Status("created".into()));

    let content = fs_request(session, address, "read", Value::Null, timeout)
        .await
        .unwrap();
    assert_eq!(content, FsOutcome::Content("hello".into()));

    let exists = fs_request(session, address, "exists", Value::Null, timeout)
        .await
        .unwrap();
    assert_eq!(exists, FsOutcome::Exists(true));
}

#[tokio::test]
async fn test_fs_write_without_overwrite_keeps_content() {
    let hub = SessionHub::new();
    let client = peer(&hub, CLIENT, 500);
    let session = client.dyn_session();
    let timeout = Duration::from_millis(500);
    let address = "l2l://tracker:cli/a.txt";

    fs_request(session, address, "write", json!({"content": "first"}), timeout)
        .await
        .unwrap();
    let status = fs_request(
        session,
        address,
        "write",
        json!({"content": "second", "options": {"overwrite": false}}),
        timeout,
    )
    .await
    .unwrap();
    assert_eq!(status, FsOutcome::Status("not overwritten".into()));

    let content = fs_request(session, address, "read", Value::Null, timeout)
        .await
        .unwrap();
    assert_eq!(content, FsOutcome::Content("first".into()));
}

#[tokio::test]
async fn test_fs_rm_and_errors() {
    let hub = SessionHub::new();
    let client = peer(&hub, CLIENT, 500);
    let session = client.dyn_session();
    let timeout = Duration::from_millis(500);

    fs_request(session, "l2l://tracker:cli/d/e", "mkdir", Value::Null, timeout)
        .await
        .unwrap();
    let status = fs_request(session, "l2l://tracker:cli/d", "rm", Value::Null, timeout)
        .await
        .unwrap();
    assert_eq!(status, FsOutcome::Status("removed".into()));
    let exists = fs_request(session, "l2l://tracker:cli/d", "exists", Value::Null, timeout)
        .await
        .unwrap();
    assert_eq!(exists, FsOutcome::Exists(false));

    let err = fs_request(session, "l2l://tracker:cli/gone.txt", "read", Value::Null, timeout)
        .await
        .unwrap_err();
    assert!(matches!(err, L2lError::Remote(_)));

    let err = fs_request(session, "/tmp/not-l2l", "read", Value::Null, timeout)
        .await
        .unwrap_err();
    assert!(matches!(err, L2lError::InvalidAddress(_)));

    let err = fs_request(session, "l2l://tracker:cli/a", "chmod", Value::Null, timeout)
        .await
        .unwrap_err();
    assert!(matches!(err, L2lError::UnsupportedOperation(_)));
}

#[tokio::test]
async fn test_subscribe_and_unsubscribe() {
    let hub = SessionHub::new();
    let server = peer(&hub, SERVER, 500);
    let client = peer(&hub, CLIENT, 500);
    let session = client.dyn_session();

    assert_eq!(subscribe_remote(session, SERVER, None).await.unwrap(), "subscribed");
    assert_eq!(
        subscribe_remote(session, SERVER, None).await.unwrap(),
        "already subscribed"
    );
    assert_eq!(server.system().subscribers().session_ids(), vec![CLIENT]);

    assert_eq!(unsubscribe_remote(session, SERVER, None).await.unwrap(), "unsubscribed");
    assert_eq!(
        unsubscribe_remote(session, SERVER, None).await.unwrap(),
        "not subscribed"
    );
    assert!(server.system().subscribers().is_empty());
}

async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<ModuleEvent>) -> ModuleEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no event relayed")
        .unwrap()
}

#[tokio::test]
async fn test_module_events_are_relayed_with_remote_addresses() {
    let hub = SessionHub::new();
    let server = peer(&hub, SERVER, 500);
    let client = peer(&hub, CLIENT, 500);
    subscribe_remote(client.dyn_session(), SERVER, None)
        .await
        .unwrap();
    let mut received = client.system().subscribe_events();

    let base = server.system().base_url().to_string();
    let mut event = ModuleEvent::new("modulechange", format!("{base}lib/a.js"));
    event.options = Some(EventOptions {
        target_module: Some(format!("{base}lib/b.js")),
        ..Default::default()
    });
    event.extra.insert("newSource".into(), json!("export const a = 2;"));
    server.system().record_event(event.clone());

    let relayed = next_event(&mut received).await;
    assert!(relayed.is_remote_event);
    assert_eq!(relayed.source_session.as_deref(), Some(SERVER));
    assert_eq!(relayed.module.as_deref(), Some("l2l://tracker:srv/lib/a.js"));
    assert_eq!(
        relayed.options.unwrap().target_module.as_deref(),
        Some("l2l://tracker:srv/lib/b.js")
    );
    assert_eq!(relayed.extra["newSource"], "export const a = 2;");
    assert_eq!(relayed.sequence, Some(1));

    // The server's own record is unchanged.
    let local = server.system().history(1).remove(0);
    assert_eq!(local, event);
}

#[tokio::test]
async fn test_doit_results_are_rendered() {
    let hub = SessionHub::new();
    let server = peer(&hub, SERVER, 500);
    let client = peer(&hub, CLIENT, 500);
    subscribe_remote(client.dyn_session(), SERVER, None)
        .await
        .unwrap();
    let mut received = client.system().subscribe_events();

    let mut event = ModuleEvent::new(
        "doitresult",
        format!("{}workspace.js", server.system().base_url()),
    );
    event.result = Some(json!({"list": [1, 2, 3], "n": 4}));
    server.system().record_event(event);

    let relayed = next_event(&mut received).await;
    assert_eq!(relayed.result, Some(json!("{list: [...], n: 4}")));
}

#[tokio::test]
async fn test_remote_events_are_not_relayed_again() {
    let hub = SessionHub::new();
    let server = peer(&hub, SERVER, 500);
    let client = peer(&hub, CLIENT, 500);
    // Each subscribes to the other.
    subscribe_remote(client.dyn_session(), SERVER, None)
        .await
        .unwrap();
    subscribe_remote(server.dyn_session(), CLIENT, None)
        .await
        .unwrap();
    let mut server_events = server.system().subscribe_events();
    let mut client_events = client.system().subscribe_events();

    let inside = ModuleEvent::new("modulechange", format!("{}a.js", server.system().base_url()));
    let outside = ModuleEvent::new("modulechange", "https://cdn.example/x.js");
    let anonymous = ModuleEvent {
        kind: "custom".to_string(),
        ..Default::default()
    };

    for event in [inside, outside, anonymous] {
        server.system().record_event(event);

        // The server sees its own event, the client the relayed copy.
        assert!(!next_event(&mut server_events).await.is_remote_event);
        assert!(next_event(&mut client_events).await.is_remote_event);

        // The client does not bounce the copy back.
        let echo = tokio::time::timeout(Duration::from_millis(200), server_events.recv()).await;
        assert!(echo.is_err(), "event bounced back: {echo:?}");
    }
    assert_eq!(server.system().history(usize::MAX).len(), 3);
    assert_eq!(client.system().history(usize::MAX).len(), 3);
}

/// Subscriber whose event handler never answers.
struct Stalled;

#[async_trait]
impl ActionHandler for Stalled {
    async fn handle(&self, _msg: InboundMessage) -> Value {
        std::future::pending::<()>().await;
        Value::Null
    }
}

#[tokio::test]
async fn test_slow_or_missing_subscribers_do_not_block_others() {
    let hub = SessionHub::new();
    let server = peer(&hub, SERVER, 500);
    let client = peer(&hub, CLIENT, 500);

    let stalled = hub.join("tracker:stalled");
    stalled
        .actions()
        .register(actions::ON_MODULE_EVENT, Arc::new(Stalled));
    let subscribers = server.system().subscribers();
    subscribers.add("tracker:stalled");
    subscribers.add("tracker:gone");
    subscribers.add(CLIENT);
    let mut received = client.system().subscribe_events();

    server
        .system()
        .record_event(ModuleEvent::new("modulechange", format!("{}a.js", server.system().base_url())));
    let relayed = next_event(&mut received).await;
    assert_eq!(relayed.module.as_deref(), Some("l2l://tracker:srv/a.js"));
}

#[tokio::test]
async fn test_dispatch_reports_each_delivery() {
    let hub = SessionHub::new();
    let server = peer(&hub, SERVER, 500);
    let _client = peer(&hub, CLIENT, 500);
    server.system().subscribers().add(CLIENT);
    server.system().subscribers().add("tracker:gone");

    let session: Arc<dyn Session> = server.session.clone();
    let relay = EventRelay::new(Arc::clone(server.system()), session, 1);
    let mut deliveries = relay
        .dispatch(&ModuleEvent::new("modulechange", "file:///elsewhere/a.js"))
        .await;
    deliveries.sort_by(|a, b| a.peer.cmp(&b.peer));

    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[0].peer, CLIENT);
    assert_eq!(deliveries[0].result, Ok(json!({"status": "recorded"})));
    assert_eq!(deliveries[1].peer, "tracker:gone");
    assert!(deliveries[1].result.is_err());
}

#[tokio::test]
async fn test_uninstall_removes_handlers_and_hooks() {
    let hub = SessionHub::new();
    let client = peer(&hub, CLIENT, 500);
    let system = Arc::clone(client.system());
    let session = Arc::clone(&client.session);
    assert!(router::is_installed(&system));
    assert!(session.actions().contains(actions::FETCH));

    client.modules.uninstall();
    assert!(!router::is_installed(&system));
    assert!(session.actions().names().is_empty());
}
