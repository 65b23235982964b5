//! Debounced directory watcher used by [`super::ModuleLoader::update_on_changes`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecursiveMode, Watcher};

/// A file was added to or removed from a watched module directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    Created,
    Removed,
}

/// Owns the watcher thread; dropping it stops watching.
pub struct DirectoryWatcherGuard {
    _watcher: notify::RecommendedWatcher,
    stop: mpsc::Sender<()>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Drop for DirectoryWatcherGuard {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Watches `dirs` for file create/remove events and calls `cb(dir, file,
/// event)` once per logical change, debounced by `debounce` (spec requires
/// >=100ms) to avoid reacting to partial writes mid-copy.
pub fn watch(
    dirs: Vec<PathBuf>,
    debounce: Duration,
    mut cb: impl FnMut(&Path, &Path, WatchEvent) + Send + 'static,
) -> notify::Result<DirectoryWatcherGuard> {
    let (tx, rx) = mpsc::channel::<Event>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            let _ = tx.send(event);
        }
    })?;
    for dir in &dirs {
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
    }

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let dirs_for_thread = dirs;
    let handle = std::thread::spawn(move || {
        // path -> (containing dir, pending event, last seen)
        let mut pending: HashMap<PathBuf, (PathBuf, WatchEvent, Instant)> = HashMap::new();

        loop {
            if stop_rx.try_recv().is_ok() {
                return;
            }
            let poll_wait = Duration::from_millis(50);
            match rx.recv_timeout(poll_wait) {
                Ok(event) => {
                    let kind = match event.kind {
                        EventKind::Create(_) => Some(WatchEvent::Created),
                        EventKind::Remove(_) => Some(WatchEvent::Removed),
                        _ => None,
                    };
                    if let Some(kind) = kind {
                        for path in event.paths {
                            let Some(dir) = dirs_for_thread
                                .iter()
                                .find(|d| path.parent() == Some(d.as_path()))
                                .cloned()
                            else {
                                continue;
                            };
                            pending.insert(path, (dir, kind, Instant::now()));
                        }
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => return,
            }

            let ready: Vec<PathBuf> = pending
                .iter()
                .filter(|(_, (_, _, seen))| seen.elapsed() >= debounce)
                .map(|(path, _)| path.clone())
                .collect();
            for path in ready {
                if let Some((dir, kind, _)) = pending.remove(&path) {
                    cb(&dir, &path, kind);
                }
            }
        }
    });

    Ok(DirectoryWatcherGuard {
        _watcher: watcher,
        stop: stop_tx,
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use super::{WatchEvent, watch};
    use std::sync::mpsc;
    use std::time::Duration;

    /// The watcher only reacts to create/remove events on plain files; it
    /// never inspects their content, so a real plug-in `.so` isn't needed to
    /// exercise the debounced create/remove path end to end.
    #[test]
    fn reports_a_debounced_create_then_a_debounced_remove() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel();
        let _guard = watch(vec![dir.path().to_path_buf()], Duration::from_millis(100), move |_, path, event| {
            let _ = tx.send((path.to_path_buf(), event));
        })
        .unwrap();

        let candidate = dir.path().join("candidate.module");
        std::fs::write(&candidate, b"placeholder").unwrap();

        let (path, event) = rx.recv_timeout(Duration::from_secs(3)).expect("create event never arrived");
        assert_eq!(path, candidate);
        assert_eq!(event, WatchEvent::Created);

        std::fs::remove_file(&candidate).unwrap();
        let (path, event) = rx.recv_timeout(Duration::from_secs(3)).expect("remove event never arrived");
        assert_eq!(path, candidate);
        assert_eq!(event, WatchEvent::Removed);
    }
}
