use std::{
    future::Future,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info, warn};
use notify::{
    event::CreateKind, recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode,
    Watcher,
};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
    config::{Config, ConfigError},
    upload::{
        is_image_path, upload_with_retry, ImageSource, RetryPolicy, UploadAttempt, UploadClient,
    },
};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("failed to create watch directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("file watcher failed: {0}")]
    Notify(#[from] notify::Error),
}

/// Paths of newly created image files carried by `event`.
pub fn created_images(event: &Event, extensions: &[String]) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => return vec![],
        EventKind::Create(_) => (),
        _ => return vec![],
    }
    event
        .paths
        .iter()
        .filter(|path| !path.is_dir())
        .filter(|path| is_image_path(path, extensions))
        .cloned()
        .collect()
}

pub struct ImageWatcher {
    dir: PathBuf,
    extensions: Vec<String>,
    settle_delay: Duration,
}

impl ImageWatcher {
    pub fn new(config: &Config) -> Result<Self, WatchError> {
        Ok(Self {
            dir: config.resolve_watch_dir()?,
            extensions: config.extensions.clone(),
            settle_delay: config.settle_delay(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Starts a non-recursive watch, creating the directory first if needed.
    /// Events are forwarded from the notify thread into the returned channel.
    pub fn subscribe(&self) -> Result<(RecommendedWatcher, mpsc::Receiver<Event>), WatchError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| WatchError::CreateDir(self.dir.clone(), e))?;

        let (sender, receiver) = mpsc::channel(100);
        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if sender.blocking_send(event).is_err() {
                    debug!("watch channel closed, dropping event");
                }
            }
            Err(e) => warn!("file watcher error: {e}"),
        })?;
        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;
        Ok((watcher, receiver))
    }

    /// Uploads every new image one at a time until `shutdown` resolves.
    pub async fn run<S: ImageSource>(
        &self,
        source: &S,
        client: &UploadClient,
        policy: &RetryPolicy,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), WatchError> {
        let (_watcher, mut events) = self.subscribe()?;
        info!("watching {} for new images", self.dir().display());
        info!("uploading to {}", client.url());

        tokio::pin!(shutdown);
        loop {
            let event = tokio::select! {
                _ = &mut shutdown => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            for path in created_images(&event, &self.extensions) {
                self.handle_created(source, client, policy, &path).await;
            }
        }
        info!("stopped watching {}", self.dir().display());
        Ok(())
    }

    pub async fn handle_created<S: ImageSource>(
        &self,
        source: &S,
        client: &UploadClient,
        policy: &RetryPolicy,
        path: &Path,
    ) -> UploadAttempt {
        info!("new image detected: {}", path.display());
        // fixed settle delay, the writer signals nothing when it is done
        tokio::time::sleep(self.settle_delay).await;
        upload_with_retry(source, client, path, policy).await
    }
}
