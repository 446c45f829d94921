//! Filesystem event sources for exit detection.
//!
//! The reconciler is written against `EventSource`, a lazy unbounded
//! sequence of named filesystem events, so its logic is independent of the
//! concrete watch mechanism. `ExitDirWatcher` is the production source,
//! bridging inotify events from `notify` into a tokio channel;
//! `ChannelEventSource` is a synthetic source for tests.

use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use berth_core::error::{BerthError, Result};

/// A named filesystem event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// An entry was created; the payload is its base name.
    Created(String),
}

/// Lazy, unbounded sequence of named filesystem events.
///
/// `None` means the source is exhausted; an `Err` item is a watch-source
/// failure and the source must be considered dead afterwards.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Option<Result<WatchEvent>>;
}

/// Watches a directory for newly created entries.
pub struct ExitDirWatcher {
    // Held to keep the watch alive for the source's lifetime.
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<notify::Result<notify::Event>>,
    pending: VecDeque<WatchEvent>,
}

impl ExitDirWatcher {
    /// Establish a watch on `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let (tx, rx) = mpsc::channel(64);

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.blocking_send(res);
            },
            Config::default(),
        )
        .map_err(|e| BerthError::WatchError(format!("failed to create watcher: {}", e)))?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                BerthError::WatchError(format!("failed to watch {}: {}", dir.display(), e))
            })?;

        tracing::debug!(dir = %dir.display(), "watching exit directory");

        Ok(Self {
            _watcher: watcher,
            rx,
            pending: VecDeque::new(),
        })
    }
}

#[async_trait]
impl EventSource for ExitDirWatcher {
    async fn next_event(&mut self) -> Option<Result<WatchEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }

            match self.rx.recv().await {
                Some(Ok(event)) => {
                    if !event.kind.is_create() {
                        continue;
                    }
                    for path in &event.paths {
                        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                            self.pending.push_back(WatchEvent::Created(name.to_string()));
                        }
                    }
                }
                Some(Err(e)) => {
                    return Some(Err(BerthError::WatchError(e.to_string())));
                }
                None => return None,
            }
        }
    }
}

/// Synthetic event source fed through a channel.
pub struct ChannelEventSource {
    rx: mpsc::Receiver<Result<WatchEvent>>,
}

impl ChannelEventSource {
    /// Create a source and the sender feeding it.
    pub fn new(capacity: usize) -> (mpsc::Sender<Result<WatchEvent>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn next_event(&mut self) -> Option<Result<WatchEvent>> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_channel_source_yields_in_order() {
        let (tx, mut source) = ChannelEventSource::new(8);
        tx.send(Ok(WatchEvent::Created("a".to_string()))).await.unwrap();
        tx.send(Ok(WatchEvent::Created("b".to_string()))).await.unwrap();

        assert_eq!(
            source.next_event().await.unwrap().unwrap(),
            WatchEvent::Created("a".to_string())
        );
        assert_eq!(
            source.next_event().await.unwrap().unwrap(),
            WatchEvent::Created("b".to_string())
        );
    }

    #[tokio::test]
    async fn test_channel_source_ends_on_sender_drop() {
        let (tx, mut source) = ChannelEventSource::new(8);
        drop(tx);
        assert!(source.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_source_propagates_errors() {
        let (tx, mut source) = ChannelEventSource::new(8);
        tx.send(Err(BerthError::WatchError("boom".to_string())))
            .await
            .unwrap();

        let event = source.next_event().await.unwrap();
        assert!(event.is_err());
    }

    #[tokio::test]
    async fn test_exit_dir_watcher_sees_created_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = ExitDirWatcher::new(dir.path()).unwrap();

        // Give the backend a moment to establish the watch.
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.path().join("c1"), "0").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), watcher.next_event())
            .await
            .expect("no event within timeout")
            .expect("source ended")
            .expect("watch error");
        assert_eq!(event, WatchEvent::Created("c1".to_string()));
    }
}
