//! One-shot client commands: fetch, fs, subscribe, unsubscribe.

use super::start_peer;
use crate::ui;
use l2l_modules::{fetch_remote, fs_request, subscribe_remote, unsubscribe_remote, FsOutcome};
use l2l_types::config::ModulesConfig;
use l2l_types::error::L2lResult;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast::error::RecvError;

pub async fn cmd_fetch(config: ModulesConfig, url: &str, peer_addr: &str) -> L2lResult<()> {
    let peer = start_peer(&config).await?;
    peer.connect(peer_addr).await?;
    let source = fetch_remote(peer.session(), url, config.online_timeout()).await;
    peer.shutdown();
    print!("{}", source?);
    Ok(())
}

/// Payload options of an fs request from the command line flags.
pub fn fs_options(content: Option<String>, cwd: Option<String>, no_overwrite: bool) -> Value {
    let mut options = Map::new();
    if let Some(content) = content {
        options.insert("content".into(), Value::String(content));
    }
    if let Some(cwd) = cwd {
        options.insert("cwd".into(), Value::String(cwd));
    }
    if no_overwrite {
        options.insert("options".into(), json!({ "overwrite": false }));
    }
    Value::Object(options)
}

pub async fn cmd_fs(config: ModulesConfig, method: &str, url: &str, options: Value) -> L2lResult<()> {
    let peer = start_peer(&config).await?;
    let outcome = fs_request(peer.session(), url, method, options, config.online_timeout()).await;
    peer.shutdown();
    match outcome? {
        FsOutcome::Exists(exists) => println!("{exists}"),
        FsOutcome::Status(status) => ui::success(&status),
        FsOutcome::Content(content) => print!("{content}"),
    }
    Ok(())
}

pub async fn cmd_subscribe(
    config: ModulesConfig,
    session: &str,
    peer_addr: &str,
    system: Option<&str>,
    follow: bool,
) -> L2lResult<()> {
    let peer = start_peer(&config).await?;
    peer.connect(peer_addr).await?;
    let mut events = peer.modules.default_system().subscribe_events();
    let status = subscribe_remote(peer.session(), session, system).await?;
    ui::success(&format!("{session}: {status}"));

    if follow {
        ui::hint("printing relayed module events, Ctrl-C to stop");
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => println!("{}", serde_json::to_string(&event)?),
                    Err(RecvError::Lagged(n)) => ui::error(&format!("skipped {n} events")),
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        let status = unsubscribe_remote(peer.session(), session, system).await?;
        ui::success(&format!("{session}: {status}"));
    }
    peer.shutdown();
    Ok(())
}

pub async fn cmd_unsubscribe(
    config: ModulesConfig,
    session: &str,
    peer_addr: &str,
    system: Option<&str>,
) -> L2lResult<()> {
    let peer = start_peer(&config).await?;
    peer.connect(peer_addr).await?;
    let status = unsubscribe_remote(peer.session(), session, system).await;
    peer.shutdown();
    ui::success(&format!("{session}: {}", status?));
    Ok(())
}
