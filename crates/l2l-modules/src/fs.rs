//! Client side of the filesystem bridge.
//!
//! Requests are addressed to this peer's own session: the address names the
//! path, and the local `modules.fs.*` handlers perform the operation.

use crate::address::parse_address;
use l2l_session::{wait_online, Session};
use l2l_types::error::{L2lError, L2lResult};
use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Operations of the filesystem bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsMethod {
    Exists,
    Mkdir,
    Rm,
    Read,
    Write,
}

impl FsMethod {
    pub const ALL: [FsMethod; 5] = [
        FsMethod::Exists,
        FsMethod::Mkdir,
        FsMethod::Rm,
        FsMethod::Read,
        FsMethod::Write,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exists => "exists",
            Self::Mkdir => "mkdir",
            Self::Rm => "rm",
            Self::Read => "read",
            Self::Write => "write",
        }
    }

    /// Wire action answering this method.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Exists => "modules.fs.exists",
            Self::Mkdir => "modules.fs.mkdir",
            Self::Rm => "modules.fs.rm",
            Self::Read => "modules.fs.read",
            Self::Write => "modules.fs.write",
        }
    }
}

impl FromStr for FsMethod {
    type Err = L2lError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| L2lError::UnsupportedOperation(s.to_string()))
    }
}

/// Unwrapped answer of a filesystem request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsOutcome {
    /// `exists`
    Exists(bool),
    /// `mkdir`, `rm` and `write`
    Status(String),
    /// `read`
    Content(String),
}

/// Perform `method` on the path named by `address`.
///
/// `options` (an object, or `null` for none) is merged over
/// `{path, cwd: null}`; use it to pass `content`, `cwd` or
/// `options: {overwrite}`. Any other value fails with `InvalidOptions`.
pub async fn fs_request(
    session: &dyn Session,
    address: &str,
    method: &str,
    options: Value,
    online_timeout: Duration,
) -> L2lResult<FsOutcome> {
    let method: FsMethod = method.parse()?;
    let result = send_fs_request(session, address, method, options, online_timeout).await;
    if let Err(e) = &result {
        warn!(address = %address, method = method.as_str(), error = %e, "l2l fs request failed");
    }
    result
}

async fn send_fs_request(
    session: &dyn Session,
    address: &str,
    method: FsMethod,
    options: Value,
    online_timeout: Duration,
) -> L2lResult<FsOutcome> {
    let options = match options {
        Value::Object(options) => options,
        Value::Null => Map::new(),
        other => {
            return Err(L2lError::InvalidOptions(format!(
                "{} expects an object, got {other}",
                method.action()
            )))
        }
    };
    let target = parse_address(address)?;
    wait_online(session, online_timeout).await?;

    let mut data = json!({ "path": target.path, "cwd": null });
    if let Value::Object(data) = &mut data {
        data.extend(options);
    }

    debug!(method = method.as_str(), path = %target.path, "Sending fs request");
    let answer = session
        .send_to(session.session_id(), method.action(), data)
        .await?;
    if let Some(err) = answer.error_text() {
        return Err(L2lError::Remote(err));
    }

    let field = |name: &str| answer.data.get(name).cloned();
    let malformed = || L2lError::Remote(format!("{} answer is malformed", method.action()));
    match method {
        FsMethod::Exists => field("exists")
            .and_then(|v| v.as_bool())
            .map(FsOutcome::Exists)
            .ok_or_else(malformed),
        FsMethod::Read => match field("content") {
            Some(Value::String(content)) => Ok(FsOutcome::Content(content)),
            _ => Err(malformed()),
        },
        FsMethod::Mkdir | FsMethod::Rm | FsMethod::Write => match field("status") {
            Some(Value::String(status)) => Ok(FsOutcome::Status(status)),
            _ => Err(malformed()),
        },
    }
}
