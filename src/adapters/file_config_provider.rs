use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use eyre::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::{
    config::{loader::load_config, models::GatewayConfig},
    ports::config_provider::ConfigProvider,
};

/// Reads the gateway configuration from a local file and reports edits to it.
///
/// The parent directory is watched rather than the file itself so that
/// editors replacing the file on save are still noticed.
pub struct FileConfigProvider {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    changes: Mutex<Option<mpsc::Receiver<()>>>,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file_name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("Config path has no file name: {}", path.display()))?
            .to_owned();

        // One pending signal is enough, the reload reads the latest file
        let (tx, rx) = mpsc::channel(1);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if touches(&event, &file_name) => {
                tracing::debug!(kind = ?event.kind, "Config file changed");
                let _ = tx.try_send(());
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Config watch error"),
        })
        .wrap_err("Failed to create config file watcher")?;

        watcher
            .watch(watch_dir(&path), RecursiveMode::NonRecursive)
            .wrap_err_with(|| format!("Failed to watch directory of {}", path.display()))?;

        Ok(Self {
            path,
            _watcher: watcher,
            changes: Mutex::new(Some(rx)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn touches(event: &Event, file_name: &OsString) -> bool {
    let relevant = event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove();
    relevant
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

fn watch_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load_config(&self) -> Result<GatewayConfig> {
        let path = self
            .path
            .to_str()
            .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", self.path.display()))?;
        load_config(path).await
    }

    fn watch(&self) -> mpsc::Receiver<()> {
        let taken = self
            .changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        taken.unwrap_or_else(|| {
            tracing::warn!("Config changes already consumed by another watcher");
            // Sender dropped right away: the receiver reports a closed channel
            mpsc::channel(1).1
        })
    }
}
