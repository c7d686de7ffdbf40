//! Built-in source loading for local addresses.

use crate::hooks::Load;
use async_trait::async_trait;
use l2l_types::error::{L2lError, L2lResult};
use tracing::debug;
use url::Url;

/// Reads module source for a normalized local address.
#[async_trait]
pub trait SourceLoader: Send + Sync + 'static {
    async fn load(&self, load: &Load) -> L2lResult<String>;
}

/// Loader serving `file://` addresses from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileUrlLoader;

#[async_trait]
impl SourceLoader for FileUrlLoader {
    async fn load(&self, load: &Load) -> L2lResult<String> {
        let address = load.target();
        let url = Url::parse(address)
            .map_err(|e| L2lError::InvalidAddress(format!("{address}: {e}")))?;
        if url.scheme() != "file" {
            return Err(L2lError::InvalidAddress(format!(
                "{address}: only file addresses are loaded locally"
            )));
        }
        let path = url
            .to_file_path()
            .map_err(|_| L2lError::InvalidAddress(address.to_string()))?;
        debug!(path = %path.display(), "Loading module source");
        Ok(tokio::fs::read_to_string(&path).await?)
    }
}
