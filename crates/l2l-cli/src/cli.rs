//! Clap CLI definitions for l2l.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  l2l serve --dir ./src --listen 127.0.0.1:7400     Serve ./src to other peers
  l2l fetch l2l://tracker:srv/lib/a.js --peer 127.0.0.1:7400
  l2l fs write l2l://me/notes.txt --content hello   Write through the fs bridge
  l2l subscribe tracker:srv --peer 127.0.0.1:7400 --follow";

/// l2l: load modules from other peers' sessions.
#[derive(Parser)]
#[command(
    name = "l2l",
    version,
    about = "Serve and fetch modules over l2l sessions",
    after_help = AFTER_HELP,
)]
pub struct Cli {
    /// Path to config file (default: ~/.l2l/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve a module directory to other peers until Ctrl-C.
    Serve {
        /// Module root directory [default: config base_dir].
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Listen address [default: config listen_addr].
        #[arg(long)]
        listen: Option<String>,
        /// Peer address to connect to (repeatable).
        #[arg(long = "peer")]
        peers: Vec<String>,
    },
    /// Print the source of a remote module.
    Fetch {
        /// Remote address, e.g. l2l://tracker:srv/lib/a.js.
        url: String,
        /// Address of the peer owning the module.
        #[arg(long)]
        peer: String,
    },
    /// Run a filesystem bridge request (exists, mkdir, rm, read, write).
    Fs {
        /// Operation to perform.
        method: String,
        /// Address naming the path.
        url: String,
        /// Content for `write`.
        #[arg(long)]
        content: Option<String>,
        /// Directory the path is relative to.
        #[arg(long)]
        cwd: Option<String>,
        /// Keep an existing file on `write`.
        #[arg(long)]
        no_overwrite: bool,
    },
    /// Ask a peer to relay its module events to this session.
    Subscribe {
        /// Session id of the peer.
        session: String,
        /// Address of the peer.
        #[arg(long)]
        peer: String,
        /// Named module system on the peer.
        #[arg(long)]
        system: Option<String>,
        /// Keep running and print relayed events.
        #[arg(long)]
        follow: bool,
    },
    /// Ask a peer to stop relaying module events to this session.
    Unsubscribe {
        /// Session id of the peer.
        session: String,
        /// Address of the peer.
        #[arg(long)]
        peer: String,
        /// Named module system on the peer.
        #[arg(long)]
        system: Option<String>,
    },
}
