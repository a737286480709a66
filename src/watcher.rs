use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::SchemaError;
use crate::schema::DocKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    File(PathBuf),
    Folder(PathBuf),
}

impl WatchTarget {
    pub fn path(&self) -> &Path {
        match self {
            WatchTarget::File(path) | WatchTarget::Folder(path) => path,
        }
    }

    fn watch_root(&self) -> (&Path, RecursiveMode) {
        match self {
            WatchTarget::File(path) => (
                path.parent().unwrap_or(path.as_path()),
                RecursiveMode::NonRecursive,
            ),
            WatchTarget::Folder(path) => (path, RecursiveMode::Recursive),
        }
    }

    pub fn matches(&self, changed: &Path) -> bool {
        match self {
            WatchTarget::File(path) => changed.file_name() == path.file_name(),
            WatchTarget::Folder(dir) => {
                changed.starts_with(dir)
                    && changed
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("html"))
            }
        }
    }
}

struct SchemaWatch {
    target: WatchTarget,
    _watcher: RecommendedWatcher,
}

pub struct WatchSet {
    watches: Mutex<HashMap<DocKind, SchemaWatch>>,
    events: UnboundedSender<DocKind>,
}

impl WatchSet {
    pub fn new(events: UnboundedSender<DocKind>) -> Self {
        Self {
            watches: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn target(&self, kind: DocKind) -> Option<WatchTarget> {
        self.watches.lock().get(&kind).map(|watch| watch.target.clone())
    }

    pub fn replace(&self, kind: DocKind, target: Option<WatchTarget>) -> Result<(), SchemaError> {
        let mut watches = self.watches.lock();
        if watches.get(&kind).map(|watch| &watch.target) == target.as_ref() {
            return Ok(());
        }
        if let Some(old) = watches.remove(&kind) {
            debug!(%kind, path = %old.target.path().display(), "stopped watching schema source");
        }
        let Some(target) = target else {
            return Ok(());
        };

        let watcher = self.spawn_watcher(kind, &target)?;
        info!(%kind, path = %target.path().display(), "watching schema source");
        watches.insert(
            kind,
            SchemaWatch {
                target,
                _watcher: watcher,
            },
        );
        Ok(())
    }

    fn spawn_watcher(
        &self,
        kind: DocKind,
        target: &WatchTarget,
    ) -> Result<RecommendedWatcher, SchemaError> {
        let (root, mode) = target.watch_root();
        let watch_error = |source| SchemaError::Watch {
            path: root.to_path_buf(),
            source,
        };

        let tx = self.events.clone();
        let filter = target.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                if event.paths.iter().any(|path| filter.matches(path)) {
                    trace!(%kind, event = ?event.kind, "schema source changed");
                    let _ = tx.send(kind);
                }
            }
            Err(err) => warn!(%kind, error = %err, "schema watcher error"),
        })
        .map_err(watch_error)?;
        watcher.watch(root, mode).map_err(watch_error)?;
        Ok(watcher)
    }

    pub fn shutdown(&self) {
        self.watches.lock().clear();
    }
}

struct Pending {
    token: u64,
    handle: JoinHandle<()>,
}

/// Collapses bursts of change events into one run per kind. Scheduling
/// resets the pending timer; a run that has begun is never aborted.
#[derive(Default)]
pub struct Debouncer {
    slots: Mutex<HashMap<DocKind, Pending>>,
    next_token: AtomicU64,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F, Fut>(self: &Arc<Self>, kind: DocKind, delay: Duration, run: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let this = Arc::clone(self);

        // The slot lock is held until the new entry is in place, so the timer
        // task cannot look for its slot before it exists.
        let mut slots = self.slots.lock();
        if let Some(previous) = slots.remove(&kind) {
            previous.handle.abort();
            trace!(%kind, "debounce timer reset");
        }
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let current = {
                let mut slots = this.slots.lock();
                match slots.get(&kind) {
                    Some(pending) if pending.token == token => {
                        slots.remove(&kind);
                        true
                    }
                    _ => false,
                }
            };
            if current {
                run().await;
            }
        });
        slots.insert(kind, Pending { token, handle });
    }

    pub fn cancel(&self, kind: DocKind) {
        if let Some(pending) = self.slots.lock().remove(&kind) {
            pending.handle.abort();
        }
    }

    pub fn cancel_all(&self) {
        for (_, pending) in self.slots.lock().drain() {
            pending.handle.abort();
        }
    }

    pub fn is_pending(&self, kind: DocKind) -> bool {
        self.slots.lock().contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn bump(runs: &Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<()> + Send + 'static {
        let runs = Arc::clone(runs);
        move || {
            runs.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_collapse_into_one_run() {
        let debouncer = Arc::new(Debouncer::new());
        let runs = counter();
        let delay = Duration::from_millis(300);

        for _ in 0..3 {
            debouncer.schedule(DocKind::Ability, delay, bump(&runs));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending(DocKind::Ability));
    }

    #[tokio::test(start_paused = true)]
    async fn kinds_are_debounced_independently() {
        let debouncer = Arc::new(Debouncer::new());
        let abilities = counter();
        let conditions = counter();
        let delay = Duration::from_millis(300);

        debouncer.schedule(DocKind::Ability, delay, bump(&abilities));
        debouncer.schedule(DocKind::Condition, delay, bump(&conditions));
        debouncer.schedule(DocKind::Condition, delay, bump(&conditions));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(abilities.load(Ordering::SeqCst), 1);
        assert_eq!(conditions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timers_never_fire() {
        let debouncer = Arc::new(Debouncer::new());
        let runs = counter();
        debouncer.schedule(DocKind::EnergyRenderer, Duration::from_millis(300), bump(&runs));
        debouncer.cancel_all();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn started_runs_are_not_aborted_by_new_events() {
        let debouncer = Arc::new(Debouncer::new());
        let finished = counter();
        let delay = Duration::from_millis(300);

        for _ in 0..2 {
            let finished = Arc::clone(&finished);
            debouncer.schedule(DocKind::Ability, delay, move || async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            });
            // Let the first run begin before the second event arrives.
            tokio::time::sleep(Duration::from_millis(400)).await;
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn targets_match_their_files() {
        let file = WatchTarget::File(PathBuf::from("/docs/abilities.html"));
        assert!(file.matches(Path::new("/docs/abilities.html")));
        assert!(!file.matches(Path::new("/docs/conditions.html")));

        let folder = WatchTarget::Folder(PathBuf::from("/docs"));
        assert!(folder.matches(Path::new("/docs/sub/conditions.HTML")));
        assert!(!folder.matches(Path::new("/docs/notes.txt")));
        assert!(!folder.matches(Path::new("/elsewhere/conditions.html")));
    }
}
