//! Filesystem observation feeding the [`Reloader`].
//!
//! The platform watcher only reports changes made after it was started, so
//! no baseline scan ever reaches the browser.

use std::{
    path::{Component, Path, PathBuf},
    time::Duration,
};

use notify::{
    event::{MetadataKind, ModifyKind, RenameMode},
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver},
    task::JoinHandle,
    time::Instant,
};

use crate::reloader::Reloader;

/// Shortest window used to coalesce changes.
///
/// A single save usually shows up as several events (truncate, write,
/// metadata), all within this window.
pub const MIN_DEBOUNCE: Duration = Duration::from_millis(20);

/// What happened to a path.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// The path was created or moved in.
    Added,
    /// The contents or metadata changed.
    Changed,
    /// The path was deleted or moved away.
    Removed,
}

/// A single qualifying change below the served root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Absolute path that changed.
    pub path: PathBuf,
    /// Kind of change.
    pub kind: ChangeKind,
}

/// Recursive watcher over the served root.
///
/// Dropping it (or calling [`ChangeWatcher::stop`]) ends observation.
pub struct ChangeWatcher {
    watcher: RecommendedWatcher,
    root: PathBuf,
    task: JoinHandle<()>,
}

impl ChangeWatcher {
    /// Start watching `root`, sending a reload through `reloader` after each
    /// change.
    ///
    /// Changes arriving within `debounce` of the first one in a burst share a
    /// single reload. Windows shorter than [`MIN_DEBOUNCE`] are raised to it.
    pub fn start(root: &Path, reloader: Reloader, debounce: Duration) -> notify::Result<Self> {
        let debounce = debounce.max(MIN_DEBOUNCE);
        let (sender, receiver) = mpsc::unbounded_channel();
        let watched = root.to_path_buf();

        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            match event {
                Ok(event) => {
                    for change in classify(&watched, &event) {
                        sender.send(change).ok();
                    }
                }
                // Usually an unreadable subtree; the rest keeps being watched.
                Err(err) => tracing::warn!(error = %err, "file watcher error"),
            }
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        tracing::debug!(root = %root.display(), "watching for changes");

        let task = tokio::spawn(forward(receiver, reloader, debounce));
        Ok(Self {
            watcher,
            root: root.to_path_buf(),
            task,
        })
    }

    /// Stop watching and drop any changes not yet turned into a reload.
    pub fn stop(mut self) {
        if let Err(err) = self.watcher.unwatch(&self.root) {
            tracing::debug!(error = %err, "cannot unwatch root");
        }
        self.task.abort();
        tracing::debug!("file watcher stopped");
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Turn a raw watcher event into the changes worth reloading for.
pub fn classify(root: &Path, event: &Event) -> Vec<ChangeEvent> {
    let kinds: Vec<ChangeKind> = match event.kind {
        EventKind::Create(_) => vec![ChangeKind::Added],
        EventKind::Remove(_) => vec![ChangeKind::Removed],
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => vec![ChangeKind::Removed],
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => vec![ChangeKind::Added],
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            vec![ChangeKind::Removed, ChangeKind::Added]
        }
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)) => return Vec::new(),
        EventKind::Modify(_) => vec![ChangeKind::Changed],
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };

    event
        .paths
        .iter()
        .enumerate()
        .filter(|(_, path)| !is_hidden(root, path))
        .map(|(index, path)| ChangeEvent {
            path: path.clone(),
            kind: kinds.get(index).copied().unwrap_or(kinds[0]),
        })
        .collect()
}

/// Whether any component of `path` below `root` starts with a dot.
pub fn is_hidden(root: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|component| match component {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

async fn forward(
    mut changes: UnboundedReceiver<ChangeEvent>,
    reloader: Reloader,
    debounce: Duration,
) {
    while let Some(change) = changes.recv().await {
        log_change(&change);

        if !debounce.is_zero() {
            let deadline = Instant::now() + debounce;
            while let Ok(next) = tokio::time::timeout_at(deadline, changes.recv()).await {
                match next {
                    Some(change) => log_change(&change),
                    None => break,
                }
            }
        }

        reloader.reload();
    }
}

fn log_change(change: &ChangeEvent) {
    let path = change.path.display();
    match change.kind {
        ChangeKind::Added => tracing::info!(%path, "file added"),
        ChangeKind::Changed => tracing::info!(%path, "file changed"),
        ChangeKind::Removed => tracing::info!(%path, "file removed"),
    }
}
