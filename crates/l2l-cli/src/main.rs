//! l2l CLI: serve a module directory to other peers, fetch their modules,
//! drive the filesystem bridge and manage event subscriptions.

mod cli;
mod cmd;
mod ui;

use crate::cli::{Cli, Commands};
use clap::Parser;
use l2l_types::config::load_config;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    let mut config = load_config(cli.config.as_deref());

    match cli.command {
        Commands::Serve { dir, listen, peers } => {
            if let Some(dir) = dir {
                config.base_dir = dir;
            }
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            config.peers.extend(peers);
            cmd::run(cmd::serve::cmd_serve(config));
        }
        Commands::Fetch { url, peer } => {
            cmd::run(cmd::client::cmd_fetch(config, &url, &peer));
        }
        Commands::Fs {
            method,
            url,
            content,
            cwd,
            no_overwrite,
        } => {
            let options = cmd::client::fs_options(content, cwd, no_overwrite);
            cmd::run(cmd::client::cmd_fs(config, &method, &url, options));
        }
        Commands::Subscribe {
            session,
            peer,
            system,
            follow,
        } => {
            cmd::run(cmd::client::cmd_subscribe(
                config,
                &session,
                &peer,
                system.as_deref(),
                follow,
            ));
        }
        Commands::Unsubscribe {
            session,
            peer,
            system,
        } => {
            cmd::run(cmd::client::cmd_unsubscribe(
                config,
                &session,
                &peer,
                system.as_deref(),
            ));
        }
    }
}
