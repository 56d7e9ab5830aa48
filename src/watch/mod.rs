//! Filesystem change watching
//!
//! Each watched root gets a [`ChangeWatcher`]: a `notify` watcher bridged
//! into a tokio task that filters create/modify events, applies the shared
//! per-file [`DebounceTable`], and spawns the change handler for accepted
//! paths. Watchers live in a [`WatchRegistry`] owned by the service.

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Callback invoked with the absolute path of a changed file
pub type ChangeHandler = Arc<dyn Fn(PathBuf) -> BoxFuture<'static, ()> + Send + Sync>;

/// Suffix of editor/atomic-write temporary files
const TEMP_SUFFIX: &str = ".tmp";

struct DebounceState {
    last_processed: HashMap<PathBuf, Instant>,
    last_sweep: Instant,
}

/// Per-file "last processed" table
///
/// Entries idle for longer than `evict_after` are swept so the table stays
/// bounded on long-lived processes.
pub struct DebounceTable {
    window: Duration,
    evict_after: Duration,
    state: Mutex<DebounceState>,
}

impl DebounceTable {
    pub fn new(window: Duration, evict_windows: u32) -> Self {
        Self {
            window,
            evict_after: window.saturating_mul(evict_windows.max(1)),
            state: Mutex::new(DebounceState {
                last_processed: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Accept or drop an event for `path` arriving now
    pub fn should_process(&self, path: &Path) -> bool {
        self.should_process_at(path, Instant::now())
    }

    /// Accept or drop an event for `path` arriving at `now`
    ///
    /// An accepted event records `now` as the path's last processed time.
    pub fn should_process_at(&self, path: &Path, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if now.saturating_duration_since(state.last_sweep) >= self.evict_after {
            let evict_after = self.evict_after;
            state
                .last_processed
                .retain(|_, last| now.saturating_duration_since(*last) < evict_after);
            state.last_sweep = now;
        }

        if let Some(last) = state.last_processed.get(path) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }

        state.last_processed.insert(path.to_path_buf(), now);
        true
    }

    /// Number of tracked paths
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.last_processed.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Absolute paths of files touched by a create/modify event
///
/// Directories and `.tmp` files are dropped; relative paths are resolved
/// against `root`.
pub fn changed_files(root: &Path, event: &Event) -> Vec<PathBuf> {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return Vec::new();
    }

    event
        .paths
        .iter()
        .filter(|p| !p.to_string_lossy().ends_with(TEMP_SUFFIX))
        .map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                root.join(p)
            }
        })
        .filter(|p| !p.is_dir())
        .collect()
}

/// A running watch on one root directory
pub struct ChangeWatcher {
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ChangeWatcher {
    /// Start watching `root` recursively; must be called inside a tokio runtime
    pub fn start(root: &Path, debounce: Arc<DebounceTable>, handler: ChangeHandler) -> Result<Self> {
        let root = root.to_path_buf();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = event_tx.send(event);
                }
                Err(e) => warn!("Filesystem watcher error: {}", e),
            },
            NotifyConfig::default(),
        )
        .map_err(|e| Error::Watch(format!("failed to create watcher for {:?}: {}", root, e)))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| Error::Watch(format!("failed to watch {:?}: {}", root, e)))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_event_loop(
            root.clone(),
            event_rx,
            shutdown_rx,
            debounce,
            handler,
        ));

        debug!("Watching {:?}", root);
        Ok(Self {
            root,
            watcher: Some(watcher),
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Stop the OS watch and wait for the event loop to exit
    pub async fn stop(mut self) {
        drop(self.watcher.take());
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Watcher task for {:?} ended abnormally: {}", self.root, e);
            }
        }
        debug!("Stopped watching {:?}", self.root);
    }
}

async fn run_event_loop(
    root: PathBuf,
    mut events: mpsc::UnboundedReceiver<Event>,
    mut shutdown: oneshot::Receiver<()>,
    debounce: Arc<DebounceTable>,
    handler: ChangeHandler,
) {
    loop {
        let event = tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        for path in changed_files(&root, &event) {
            if debounce.should_process(&path) {
                trace!("Change accepted: {:?}", path);
                tokio::spawn(handler(path));
            } else {
                trace!("Change debounced: {:?}", path);
            }
        }
    }
}

/// Process-local registry of active watches, keyed by resource URI
pub struct WatchRegistry {
    watchers: Mutex<HashMap<String, ChangeWatcher>>,
    debounce: Arc<DebounceTable>,
}

impl WatchRegistry {
    pub fn new(debounce: DebounceTable) -> Self {
        Self {
            watchers: Mutex::new(HashMap::new()),
            debounce: Arc::new(debounce),
        }
    }

    /// Debounce table shared by every watcher
    pub fn debounce(&self) -> Arc<DebounceTable> {
        Arc::clone(&self.debounce)
    }

    /// Start and register a watcher unless `uri` is already watched
    pub fn watch(&self, uri: &str, root: &Path, handler: ChangeHandler) -> Result<bool> {
        let mut watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());
        if watchers.contains_key(uri) {
            return Ok(false);
        }
        let watcher = ChangeWatcher::start(root, self.debounce(), handler)?;
        watchers.insert(uri.to_string(), watcher);
        Ok(true)
    }

    pub fn is_watched(&self, uri: &str) -> bool {
        self.watchers
            .lock()
            .map(|w| w.contains_key(uri))
            .unwrap_or(false)
    }

    /// Stop and forget the watcher of `uri`; false when none was registered
    pub async fn unwatch(&self, uri: &str) -> bool {
        let watcher = self
            .watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(uri);
        match watcher {
            Some(w) => {
                w.stop().await;
                true
            }
            None => false,
        }
    }

    /// Stop every watcher
    pub async fn stop_all(&self) {
        let drained: Vec<ChangeWatcher> = self
            .watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, w)| w)
            .collect();
        for watcher in drained {
            watcher.stop().await;
        }
    }
}
