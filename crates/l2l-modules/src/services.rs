//! Action handlers answering the protocol's requests.
//!
//! Every handler answers exactly once. Failures become `{error: "..."}`
//! replies; nothing is thrown back at the session layer.

use crate::address::is_remote_address;
use crate::fs::FsMethod;
use crate::store::FileStore;
use crate::system::{ModuleSystem, SystemRegistry};
use async_trait::async_trait;
use l2l_session::{ActionHandler, ActionTable, InboundMessage};
use l2l_types::error::{L2lError, L2lResult};
use l2l_types::event::ModuleEvent;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Wire action names.
pub mod actions {
    pub const FETCH: &str = "modules.fetch";
    pub const ON_MODULE_EVENT: &str = "modules.onModuleEvent";
    pub const ADD_SUBSCRIBER: &str = "modules.addSubscriber";
    pub const REMOVE_SUBSCRIBER: &str = "modules.removeSubscriber";
}

/// Payload key selecting a named module system.
pub const SYSTEM_KEY: &str = "System";

/// What the handlers operate on.
#[derive(Clone)]
pub struct ServiceContext {
    systems: SystemRegistry,
    default_system: Arc<ModuleSystem>,
    store: Arc<dyn FileStore>,
}

impl ServiceContext {
    /// Handlers serving `default_system` and any system registered in
    /// `systems`. The default system is registered as well.
    pub fn new(
        systems: SystemRegistry,
        default_system: Arc<ModuleSystem>,
        store: Arc<dyn FileStore>,
    ) -> Self {
        systems.register(Arc::clone(&default_system));
        Self {
            systems,
            default_system,
            store,
        }
    }

    pub fn default_system(&self) -> &Arc<ModuleSystem> {
        &self.default_system
    }

    pub fn systems(&self) -> &SystemRegistry {
        &self.systems
    }

    fn system_for(&self, data: &Value) -> L2lResult<Arc<ModuleSystem>> {
        match data.get(SYSTEM_KEY).and_then(Value::as_str) {
            Some(name) => self
                .systems
                .get(name)
                .ok_or_else(|| L2lError::UnknownSystem(name.to_string())),
            None => Ok(Arc::clone(&self.default_system)),
        }
    }
}

/// Actions this crate answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Fetch,
    OnModuleEvent,
    AddSubscriber,
    RemoveSubscriber,
    Fs(FsMethod),
}

impl Service {
    pub fn all() -> Vec<Service> {
        let mut all = vec![
            Service::Fetch,
            Service::OnModuleEvent,
            Service::AddSubscriber,
            Service::RemoveSubscriber,
        ];
        all.extend(FsMethod::ALL.into_iter().map(Service::Fs));
        all
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::Fetch => actions::FETCH,
            Self::OnModuleEvent => actions::ON_MODULE_EVENT,
            Self::AddSubscriber => actions::ADD_SUBSCRIBER,
            Self::RemoveSubscriber => actions::REMOVE_SUBSCRIBER,
            Self::Fs(method) => method.action(),
        }
    }
}

/// Handler for one [`Service`].
pub struct ServiceHandler {
    service: Service,
    ctx: ServiceContext,
}

impl ServiceHandler {
    pub fn new(service: Service, ctx: ServiceContext) -> Self {
        Self { service, ctx }
    }

    async fn answer(&self, msg: &InboundMessage) -> L2lResult<Value> {
        match self.service {
            Service::Fetch => self.fetch(msg).await,
            Service::OnModuleEvent => self.on_module_event(msg),
            Service::AddSubscriber => {
                let system = self.ctx.system_for(&msg.data)?;
                let status = system.subscribers().add(&msg.sender);
                Ok(json!({ "status": status.as_str() }))
            }
            Service::RemoveSubscriber => {
                let system = self.ctx.system_for(&msg.data)?;
                let status = system.subscribers().remove(&msg.sender);
                Ok(json!({ "status": status.as_str() }))
            }
            Service::Fs(method) => self.fs(method, msg).await,
        }
    }

    async fn fetch(&self, msg: &InboundMessage) -> L2lResult<Value> {
        let data = expect_data(msg, &["path"])?;
        let path = string_field(msg, data, "path")?;
        let parent = data.get("parent").and_then(Value::as_str);
        let system = self.ctx.system_for(&msg.data)?;
        if is_remote_address(path) {
            return Err(L2lError::NotLocal(path.to_string()));
        }

        let source = {
            let _view = system.local_view().await;
            system.local_source_of(path, parent).await
        }?;
        Ok(json!({ "source": source }))
    }

    fn on_module_event(&self, msg: &InboundMessage) -> L2lResult<Value> {
        let system = self.ctx.system_for(&msg.data)?;
        let mut data = msg.data.clone();
        if let Value::Object(fields) = &mut data {
            fields.remove(SYSTEM_KEY);
        }
        let event: ModuleEvent = serde_json::from_value(data)?;
        system.record_event(event);
        Ok(json!({ "status": "recorded" }))
    }

    async fn fs(&self, method: FsMethod, msg: &InboundMessage) -> L2lResult<Value> {
        let required: &[&str] = match method {
            FsMethod::Write => &["path", "content"],
            _ => &["path"],
        };
        let data = expect_data(msg, required)?;
        let cwd = data.get("cwd").and_then(Value::as_str);
        let path = self
            .ctx
            .store
            .resolve(string_field(msg, data, "path")?, cwd);
        let store = &self.ctx.store;

        match method {
            FsMethod::Exists => Ok(json!({ "exists": store.exists(&path).await? })),
            FsMethod::Mkdir => {
                store.mkdir(&path).await?;
                Ok(json!({ "status": "created" }))
            }
            FsMethod::Rm => {
                store.rm(&path).await?;
                Ok(json!({ "status": "removed" }))
            }
            FsMethod::Read => Ok(json!({ "content": store.read(&path).await? })),
            FsMethod::Write => {
                let content = string_field(msg, data, "content")?;
                let overwrite = data
                    .get("options")
                    .and_then(|o| o.get("overwrite"))
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                let existed = store.is_file(&path).await?;
                let status = match (existed, overwrite) {
                    (true, false) => "not overwritten",
                    (true, true) => {
                        store.write(&path, content).await?;
                        "overwritten"
                    }
                    (false, _) => {
                        store.write(&path, content).await?;
                        "created"
                    }
                };
                Ok(json!({ "status": status }))
            }
        }
    }
}

#[async_trait]
impl ActionHandler for ServiceHandler {
    async fn handle(&self, msg: InboundMessage) -> Value {
        debug!(action = %msg.action, sender = %msg.sender, "Handling module service request");
        match self.answer(&msg).await {
            Ok(data) => data,
            Err(e) => {
                warn!(action = %msg.action, sender = %msg.sender, error = %e, "Module service request failed");
                json!({ "error": e.to_string() })
            }
        }
    }
}

/// The payload object, once every field in `required` is present.
fn expect_data<'a>(msg: &'a InboundMessage, required: &[&str]) -> L2lResult<&'a Map<String, Value>> {
    let missing = |field: &str| L2lError::MissingField {
        field: field.to_string(),
        action: msg.action.clone(),
    };
    let Value::Object(data) = &msg.data else {
        return Err(missing(required.first().copied().unwrap_or("data")));
    };
    if let Some(field) = required.iter().find(|f| !data.contains_key(**f)) {
        return Err(missing(*field));
    }
    Ok(data)
}

fn string_field<'a>(
    msg: &InboundMessage,
    data: &'a Map<String, Value>,
    field: &str,
) -> L2lResult<&'a str> {
    data.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| L2lError::MissingField {
            field: field.to_string(),
            action: msg.action.clone(),
        })
}

/// Register every service on `table`.
pub fn install(table: &ActionTable, ctx: &ServiceContext) {
    for service in Service::all() {
        table.register(
            service.action(),
            Arc::new(ServiceHandler::new(service, ctx.clone())),
        );
    }
}

/// Remove every service from `table`.
pub fn uninstall(table: &ActionTable) {
    for service in Service::all() {
        table.remove(service.action());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalFileStore;

    fn message(action: &str, data: Value) -> InboundMessage {
        InboundMessage {
            id: "m1".to_string(),
            action: action.to_string(),
            sender: "S2".to_string(),
            data,
        }
    }

    fn context(root: &std::path::Path) -> ServiceContext {
        ServiceContext::new(
            SystemRegistry::new(),
            Arc::new(ModuleSystem::new("default", "file:///srv/app/")),
            Arc::new(LocalFileStore::new(root)),
        )
    }

    fn handler(service: Service, ctx: &ServiceContext) -> ServiceHandler {
        ServiceHandler::new(service, ctx.clone())
    }

    #[test]
    fn test_all_actions_distinct() {
        let names: std::collections::HashSet<_> =
            Service::all().iter().map(|s| s.action()).collect();
        assert_eq!(names.len(), 9);
    }

    #[tokio::test]
    async fn test_missing_field_names_field_and_action() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let reply = handler(Service::Fs(FsMethod::Write), &ctx)
            .handle(message("modules.fs.write", json!({"path": "a.txt"})))
            .await;
        let err = reply["error"].as_str().unwrap();
        assert!(err.contains("content"));
        assert!(err.contains("modules.fs.write"));

        let reply = handler(Service::Fetch, &ctx)
            .handle(message("modules.fetch", json!({})))
            .await;
        assert!(reply["error"].as_str().unwrap().contains("path"));
    }

    #[tokio::test]
    async fn test_write_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let write = handler(Service::Fs(FsMethod::Write), &ctx);

        let reply = write
            .handle(message("modules.fs.write", json!({"path": "a.txt", "content": "X"})))
            .await;
        assert_eq!(reply["status"], "created");

        let reply = write
            .handle(message(
                "modules.fs.write",
                json!({"path": "a.txt", "content": "Y", "options": {"overwrite": false}}),
            ))
            .await;
        assert_eq!(reply["status"], "not overwritten");
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "X");

        let reply = write
            .handle(message("modules.fs.write", json!({"path": "a.txt", "content": "Z"})))
            .await;
        assert_eq!(reply["status"], "overwritten");
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "Z");
    }

    #[tokio::test]
    async fn test_cwd_resolution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "in sub").unwrap();
        let ctx = context(dir.path());

        let reply = handler(Service::Fs(FsMethod::Read), &ctx)
            .handle(message("modules.fs.read", json!({"path": "b.txt", "cwd": "sub"})))
            .await;
        assert_eq!(reply["content"], "in sub");

        let reply = handler(Service::Fs(FsMethod::Exists), &ctx)
            .handle(message("modules.fs.exists", json!({"path": "b.txt", "cwd": null})))
            .await;
        assert_eq!(reply["exists"], false);
    }

    #[tokio::test]
    async fn test_subscriber_services() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let add = handler(Service::AddSubscriber, &ctx);
        let remove = handler(Service::RemoveSubscriber, &ctx);

        assert_eq!(add.handle(message(actions::ADD_SUBSCRIBER, json!({}))).await["status"], "subscribed");
        assert_eq!(
            add.handle(message(actions::ADD_SUBSCRIBER, json!({}))).await["status"],
            "already subscribed"
        );
        assert!(ctx.default_system().subscribers().contains("S2"));
        assert_eq!(
            remove.handle(message(actions::REMOVE_SUBSCRIBER, json!({}))).await["status"],
            "unsubscribed"
        );
        assert_eq!(
            remove.handle(message(actions::REMOVE_SUBSCRIBER, json!({}))).await["status"],
            "not subscribed"
        );
    }

    #[tokio::test]
    async fn test_unknown_system() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let reply = handler(Service::AddSubscriber, &ctx)
            .handle(message(actions::ADD_SUBSCRIBER, json!({"System": "other"})))
            .await;
        assert!(reply["error"].as_str().unwrap().contains("other"));
    }

    #[tokio::test]
    async fn test_on_module_event_records() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let reply = handler(Service::OnModuleEvent, &ctx)
            .handle(message(
                actions::ON_MODULE_EVENT,
                json!({
                    "type": "modulechange",
                    "module": "l2l://S2/lib/a.js",
                    "isRemoteEvent": true,
                    "sourceSession": "S2",
                    "newSource": "x"
                }),
            ))
            .await;
        assert_eq!(reply["status"], "recorded");
        let history = ctx.default_system().history(1);
        assert_eq!(history[0].module.as_deref(), Some("l2l://S2/lib/a.js"));
        assert_eq!(history[0].extra["newSource"], "x");

        let reply = handler(Service::OnModuleEvent, &ctx)
            .handle(message(actions::ON_MODULE_EVENT, json!({"module": 3})))
            .await;
        assert!(reply.get("error").is_some());
    }
}
