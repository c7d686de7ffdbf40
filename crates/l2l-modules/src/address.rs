//! `l2l://<session>/<path>` addresses.
//!
//! Session ids contain `:` (e.g. `tracker-1:0f3c`), which a generic URL
//! parser reads as a port separator. Canonical addresses therefore carry the
//! delimiter escaped as `__COLON__`, making the authority one opaque segment.

use l2l_types::error::{L2lError, L2lResult};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// URL prefix of remote module addresses.
pub const SCHEME_PREFIX: &str = "l2l://";

/// Separator between session kind and id inside a session id.
pub const SESSION_DELIMITER: char = ':';

/// Canonical stand-in for [`SESSION_DELIMITER`] inside an authority.
pub const DELIMITER_ESCAPE: &str = "__COLON__";

/// Characters escaped when a path is put into an address.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// A parsed remote address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddress {
    /// The canonical form of the address that was parsed.
    pub raw_url: String,
    /// Session owning the resource, delimiter unescaped.
    pub session_id: String,
    /// Percent-decoded path below the session.
    pub path: String,
}

impl RemoteAddress {
    /// Build an address from its parts.
    pub fn new(session_id: impl Into<String>, path: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let path = path.into();
        let raw_url = format!(
            "{SCHEME_PREFIX}{}/{}",
            escape_session(&session_id),
            utf8_percent_encode(&path, PATH_ENCODE_SET)
        );
        Self {
            raw_url,
            session_id,
            path,
        }
    }

    /// The canonical URL of this address.
    pub fn to_url(&self) -> String {
        self.raw_url.clone()
    }
}

impl std::fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw_url)
    }
}

/// Split `l2l://<authority>/<path>` into its two parts.
fn split_remote(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix(SCHEME_PREFIX)?;
    let (authority, path) = rest.split_once('/')?;
    if authority.is_empty() {
        return None;
    }
    Some((authority, path))
}

fn escape_session(session_id: &str) -> String {
    session_id.replace(SESSION_DELIMITER, DELIMITER_ESCAPE)
}

/// Whether `url` uses the remote scheme.
pub fn is_remote_address(url: &str) -> bool {
    url.starts_with(SCHEME_PREFIX)
}

/// Canonicalize a remote address; anything else is returned unchanged.
///
/// Idempotent: escaping leaves no delimiter behind to escape again.
pub fn normalize(url: &str) -> String {
    match split_remote(url) {
        Some((authority, path)) if authority.contains(SESSION_DELIMITER) => {
            format!("{SCHEME_PREFIX}{}/{}", escape_session(authority), path)
        }
        _ => url.to_string(),
    }
}

/// Parse a remote address into session id and path.
pub fn parse_address(url: &str) -> L2lResult<RemoteAddress> {
    let raw_url = normalize(url);
    let Some((authority, path)) = split_remote(&raw_url) else {
        return Err(L2lError::InvalidAddress(url.to_string()));
    };
    url::Url::parse(&raw_url).map_err(|e| L2lError::InvalidAddress(format!("{url}: {e}")))?;

    let session_id = authority.replace(DELIMITER_ESCAPE, &SESSION_DELIMITER.to_string());
    let path = percent_decode_str(path)
        .decode_utf8()
        .map_err(|e| L2lError::InvalidAddress(format!("{url}: {e}")))?
        .into_owned();

    Ok(RemoteAddress {
        raw_url,
        session_id,
        path,
    })
}

/// Rewrite an address below `base_url` into an address on `session_id`.
///
/// Addresses outside `base_url` are returned unchanged.
pub fn local_to_remote(base_url: &str, session_id: &str, address: &str) -> String {
    let Some(rest) = address.strip_prefix(base_url) else {
        return address.to_string();
    };
    let rel = rest.strip_prefix('/').unwrap_or(rest);
    format!("{SCHEME_PREFIX}{session_id}/{rel}")
}
