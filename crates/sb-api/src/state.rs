use std::path::PathBuf;
use std::sync::Arc;

use sb_core::traits::{ContentRepo, IdentityProvider, MediaStore};

use crate::realtime::Notifier;

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn ContentRepo>,
    pub store: Arc<dyn MediaStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub notifier: Notifier,
    /// Served read-only under `/uploads`
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}
