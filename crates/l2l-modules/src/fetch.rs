//! Client side of `modules.fetch`: one round trip to the owning peer.

use crate::address::parse_address;
use crate::services::actions;
use l2l_session::{wait_online, Session};
use l2l_types::error::{L2lError, L2lResult};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Fetch the source behind remote address `url`.
///
/// Waits at most `online_timeout` for the session to come online, then sends
/// a single request. Failures are logged and returned, never retried.
pub async fn fetch_remote(
    session: &dyn Session,
    url: &str,
    online_timeout: Duration,
) -> L2lResult<String> {
    let result = request_source(session, url, online_timeout).await;
    if let Err(e) = &result {
        warn!(url = %url, error = %e, "l2l fetch failed");
    }
    result
}

async fn request_source(
    session: &dyn Session,
    url: &str,
    online_timeout: Duration,
) -> L2lResult<String> {
    let address = parse_address(url)?;
    wait_online(session, online_timeout).await?;

    debug!(peer = %address.session_id, path = %address.path, "Sending fetch request");
    let answer = session
        .send_to(
            &address.session_id,
            actions::FETCH,
            json!({ "url": address.raw_url, "path": address.path }),
        )
        .await?;

    if let Some(err) = answer.error_text() {
        return Err(L2lError::Remote(err));
    }
    answer
        .data
        .get("source")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| L2lError::Remote(format!("fetch answer for {url} carries no source")))
}
