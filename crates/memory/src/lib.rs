//! Conversation history backends for lexstream.
//!
//! Every backend implements `lexstream_core::HistoryStore`; [`open_from_config`]
//! picks one from the `[history]` config section.

pub mod file_backend;
pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file_backend::FileHistory;
pub use in_memory::InMemoryHistory;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteHistory;

use lexstream_config::{AppConfig, HistoryConfig};
use lexstream_core::error::HistoryError;
use lexstream_core::history::HistoryStore;
use std::sync::Arc;

/// Open the history backend named in `config`.
pub async fn open_from_config(config: &HistoryConfig) -> Result<Arc<dyn HistoryStore>, HistoryError> {
    let path = || {
        config
            .path
            .clone()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| AppConfig::default_history_path(&config.backend))
    };

    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryHistory::new())),
        "file" => Ok(Arc::new(FileHistory::open(path()).await?)),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = path();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    HistoryError::Storage(format!("Failed to create history directory: {e}"))
                })?;
            }
            let url = format!("sqlite://{}", path.display());
            Ok(Arc::new(SqliteHistory::open(&url).await?))
        }
        other => Err(HistoryError::Storage(format!(
            "history backend '{other}' is not available in this build"
        ))),
    }
}
