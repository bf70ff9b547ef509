use crate::{
    handlers::{HandlerDirectory, HandlerRef},
    options::{RunOptions, WatchOptions},
    registry::{WatchRegistry, WatchTarget},
    NotifyError, Result,
};
use directories::BaseDirs;
use fsnotifier_sdk::{
    Event, EventStatus, EventType, Inotify, OsError, RawEvents, WatchDescriptor, WatchModifier,
};
use std::{
    collections::{HashMap, VecDeque},
    fmt, fs, io,
    os::{
        fd::{AsFd, BorrowedFd},
        unix::fs::MetadataExt,
    },
    path::{Path, PathBuf},
};
use tokio::{
    io::{unix::AsyncFd, Interest},
    runtime::Handle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Watches paths through one inotify instance and dispatches decoded events
/// to the handlers registered on each watch.
///
/// The inotify descriptor is registered with a tokio reactor at construction.
/// Events are read only while [`Notifier::run`] is waiting, which is the single
/// place the notifier yields.
pub struct Notifier {
    inotify: AsyncFd<Inotify>,
    registry: WatchRegistry,
    handlers: HandlerDirectory,
    /// Modifier bits each watch was created with, re-sent on modification.
    modifiers: HashMap<WatchDescriptor, WatchModifier>,
    queue: VecDeque<Queued>,
}

/// An entry of the dispatch queue.
#[derive(Debug)]
enum Queued {
    Event(Event),
    /// The kernel dropped this watch. It is pruned once the events queued
    /// ahead of it have been dispatched.
    Ignored(WatchDescriptor),
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("inotify", self.inotify.get_ref())
            .field("registry", &self.registry)
            .field("handlers", &self.handlers)
            .field("modifiers", &self.modifiers)
            .field("queue.len()", &self.queue.len())
            .finish()
    }
}

/// Resolve a leading `~` to the current user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match BaseDirs::new() {
        Some(dirs) if rest.as_os_str().is_empty() => dirs.home_dir().to_path_buf(),
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

/// Device and inode `path` names, resolving a final symlink unless
/// `DONT_FOLLOW` is set.
fn inode_of(path: &Path, modifiers: WatchModifier) -> Option<(u64, u64)> {
    let metadata = if modifiers.contains(WatchModifier::DONT_FOLLOW) {
        fs::symlink_metadata(path)
    } else {
        fs::metadata(path)
    };
    metadata.ok().map(|metadata| (metadata.dev(), metadata.ino()))
}

fn normalize(target: WatchTarget) -> WatchTarget {
    match target {
        WatchTarget::Path(path) => WatchTarget::Path(expand_home(&path)),
        descriptor => descriptor,
    }
}

impl Notifier {
    /// Create a notifier on the ambient tokio runtime.
    pub fn new() -> Result<Self> {
        let handle = Handle::try_current().map_err(|error| NotifyError::Configuration {
            context: "no tokio runtime",
            source: io::Error::other(error),
        })?;
        Self::with_handle(&handle)
    }

    /// Create a notifier whose descriptor is driven by `handle`'s reactor.
    pub fn with_handle(handle: &Handle) -> Result<Self> {
        let inotify = Inotify::init().map_err(|error| NotifyError::Configuration {
            context: error.op,
            source: error.source,
        })?;
        let _entered = handle.enter();
        // SAFETY: `Inotify` owns its descriptor and only gives it up when
        // consumed, which `into_inner` does before `close`.
        let inotify = unsafe { AsyncFd::register_with_interest(inotify, Interest::READABLE) }
            .map_err(|error| NotifyError::Configuration {
                context: "register inotify descriptor",
                source: error.into_parts().1,
            })?;
        Ok(Self {
            inotify,
            registry: WatchRegistry::new(),
            handlers: HandlerDirectory::new(),
            modifiers: HashMap::new(),
            queue: VecDeque::new(),
        })
    }

    /// Start watching `path` and dispatch its events to `handlers`.
    pub fn add_watch<P>(
        &mut self,
        path: P,
        handlers: impl IntoIterator<Item = HandlerRef>,
        options: WatchOptions,
    ) -> Result<WatchDescriptor>
    where
        P: AsRef<Path>,
    {
        let path = expand_home(path.as_ref());
        if !path.exists() {
            return Err(NotifyError::NotFound(path));
        }
        if self.registry.descriptor_of(&path).is_some() {
            return Err(NotifyError::DuplicateWatch(path));
        }

        // MASK_CREATE makes the kernel refuse an inode that is already
        // watched instead of replacing that watch's mask.
        let mask = options.mask() | WatchModifier::MASK_CREATE.bits();
        let wd = match self.inotify.get_ref().add_or_modify_watch(&path, mask) {
            Ok(wd) => wd,
            Err(error) if error.source.kind() == io::ErrorKind::AlreadyExists => {
                let existing = self.alias_of(&path, options.modifiers()).unwrap_or(path);
                warn!(path = ?existing, "path aliases an existing watch");
                return Err(NotifyError::DuplicateWatch(existing));
            }
            Err(error) => return Err(error.into()),
        };
        if let Some(existing) = self.registry.path_of(wd) {
            // Kernels older than 4.18 ignore MASK_CREATE and modify the watch.
            warn!(%wd, path = ?path, existing = ?existing, "path aliases an existing watch");
            return Err(NotifyError::DuplicateWatch(existing.to_path_buf()));
        }

        info!(%wd, path = ?path, mask = options.mask(), "watch added");
        self.registry.insert(wd, path);
        self.handlers.create(wd, handlers);
        self.modifiers.insert(wd, options.modifiers());
        Ok(wd)
    }

    /// The registered path watching the same inode as `path`.
    fn alias_of(&self, path: &Path, modifiers: WatchModifier) -> Option<PathBuf> {
        let inode = inode_of(path, modifiers)?;
        self.registry
            .iter()
            .find(|(wd, watched)| {
                let modifiers = self.modifiers.get(wd).copied();
                inode_of(watched, modifiers.unwrap_or(WatchModifier::empty())) == Some(inode)
            })
            .map(|(_, watched)| watched.to_path_buf())
    }

    /// Change the event types reported by an existing watch. With `merge`,
    /// `new_types` is added to the current mask instead of replacing it.
    pub fn modify_watch(
        &mut self,
        target: impl Into<WatchTarget>,
        new_types: EventType,
        merge: bool,
    ) -> Result<()> {
        let target = normalize(target.into());
        let Some((wd, path)) = self.registry.resolve(&target) else {
            return Err(NotifyError::NotWatched(target));
        };
        let path = path.to_path_buf();
        let mut modifiers = self
            .modifiers
            .get(&wd)
            .copied()
            .unwrap_or(WatchModifier::empty());
        modifiers.set(WatchModifier::MASK_ADD, merge);

        // inotify_add_watch on a watched inode modifies that watch.
        let returned = self
            .inotify
            .get_ref()
            .add_or_modify_watch(&path, new_types.with_modifiers(modifiers))?;
        if returned != wd {
            warn!(%wd, %returned, path = ?path, "watched path now refers to a different inode");
            if self.registry.path_of(returned).is_none() {
                self.inotify.get_ref().remove_watch(returned)?;
            }
            return Err(NotifyError::Replaced(path));
        }
        debug!(%wd, ?new_types, merge, "watch modified");
        Ok(())
    }

    /// Stop watching. A missing watch is an error only when `raises` is set.
    pub fn remove_watch(&mut self, target: impl Into<WatchTarget>, raises: bool) -> Result<()> {
        let target = normalize(target.into());
        let Some((wd, path)) = self.registry.remove(&target) else {
            if raises {
                return Err(NotifyError::NotWatched(target));
            }
            return Ok(());
        };
        self.handlers.drop_entry(wd);
        self.modifiers.remove(&wd);
        info!(%wd, path = ?path, "watch removed");
        self.inotify.get_ref().remove_watch(wd)?;
        Ok(())
    }

    fn descriptor(&self, target: impl Into<WatchTarget>) -> Result<WatchDescriptor> {
        let target = normalize(target.into());
        match self.registry.resolve(&target) {
            Some((wd, _)) => Ok(wd),
            None => Err(NotifyError::NotWatched(target)),
        }
    }

    /// Add handlers to a watch. Handlers already on it are skipped.
    pub fn add_handlers(
        &mut self,
        target: impl Into<WatchTarget>,
        handlers: impl IntoIterator<Item = HandlerRef>,
    ) -> Result<()> {
        let wd = self.descriptor(target)?;
        self.handlers.add(wd, handlers)
    }

    pub fn remove_handlers(
        &mut self,
        target: impl Into<WatchTarget>,
        handlers: &[HandlerRef],
    ) -> Result<()> {
        let wd = self.descriptor(target)?;
        self.handlers.remove(wd, handlers)
    }

    pub fn clear_handlers(&mut self, target: impl Into<WatchTarget>) -> Result<()> {
        let wd = self.descriptor(target)?;
        self.handlers.clear(wd)
    }

    pub fn path_of(&self, wd: WatchDescriptor) -> Option<&Path> {
        self.registry.path_of(wd)
    }

    pub fn descriptor_of(&self, path: impl AsRef<Path>) -> Option<WatchDescriptor> {
        self.registry.descriptor_of(&expand_home(path.as_ref()))
    }

    pub fn is_watched(&self, target: impl Into<WatchTarget>) -> bool {
        self.registry.contains(&normalize(target.into()))
    }

    pub fn watch_count(&self) -> usize {
        self.registry.len()
    }

    pub fn handler_count(&self, target: impl Into<WatchTarget>) -> Result<usize> {
        let wd = self.descriptor(target)?;
        Ok(self.handlers.handlers(wd).map_or(0, <[_]>::len))
    }

    /// Events read from the kernel but not dispatched yet.
    pub fn pending_events(&self) -> usize {
        self.queue
            .iter()
            .filter(|queued| matches!(queued, Queued::Event(_)))
            .count()
    }

    /// Dispatch events until `stop` is cancelled.
    ///
    /// Without a stop token this only returns on error. Cancellation is
    /// observed before every event and while waiting for one, so no event is
    /// dispatched after it.
    pub async fn run(&mut self, stop: Option<&CancellationToken>, options: RunOptions) -> Result<()> {
        loop {
            let event = match stop {
                Some(stop) => {
                    if stop.is_cancelled() {
                        break;
                    }
                    tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        event = self.next_event() => event?,
                    }
                }
                None => self.next_event().await?,
            };
            self.dispatch(&event, options);
            self.prune_ignored();
        }
        debug!(pending = self.pending_events(), "dispatch loop stopped");
        Ok(())
    }

    fn dispatch(&self, event: &Event, options: RunOptions) {
        let mut handled = false;
        if let Some(handlers) = self.handlers.handlers(event.watch_descriptor()) {
            for handler in handlers {
                if !handler.can_handle_event_type(event.event_type()) {
                    continue;
                }
                handler.handle_event(event);
                handled = true;
                if options.handle_once {
                    break;
                }
            }
        }
        if options.warn_unhandled && !handled {
            warn!(?event, "unhandled event");
        }
    }

    /// Pop the next queued event, waiting for the descriptor to become
    /// readable while the queue is empty. Cancel safe.
    async fn next_event(&mut self) -> Result<Event> {
        loop {
            if let Some(event) = self.pop_event() {
                return Ok(event);
            }
            let mut guard = self
                .inotify
                .readable()
                .await
                .map_err(|source| OsError {
                    op: "poll inotify descriptor",
                    source,
                })?;
            trace!("inotify descriptor readable");
            guard.clear_ready();
            drop(guard);
            self.on_readable()?;
        }
    }

    fn pop_event(&mut self) -> Option<Event> {
        while let Some(queued) = self.queue.pop_front() {
            match queued {
                Queued::Event(event) => return Some(event),
                Queued::Ignored(wd) => self.prune(wd),
            }
        }
        None
    }

    /// Prune the kernel-dropped watches at the front of the queue.
    fn prune_ignored(&mut self) {
        while let Some(&Queued::Ignored(wd)) = self.queue.front() {
            self.queue.pop_front();
            self.prune(wd);
        }
    }

    fn prune(&mut self, wd: WatchDescriptor) {
        // Nothing to do if we removed it ourselves.
        if let Some((wd, path)) = self.registry.remove(&WatchTarget::Descriptor(wd)) {
            self.handlers.drop_entry(wd);
            self.modifiers.remove(&wd);
            info!(%wd, path = ?path, "watch dropped by kernel");
        }
    }

    /// Drain everything the kernel has queued and decode it.
    fn on_readable(&mut self) -> Result<()> {
        let inotify = self.inotify.get_ref();
        let available = match inotify.available_bytes() {
            Ok(available) => available,
            // Seen when the last watch was just removed.
            Err(error) => {
                debug!(%error, "treating failed FIONREAD as empty");
                0
            }
        };
        if available == 0 {
            return Ok(());
        }
        let buffer = inotify.read(available)?;
        self.enqueue(&buffer)
    }

    fn enqueue(&mut self, buffer: &[u8]) -> Result<()> {
        for raw in RawEvents::new(buffer) {
            let raw = raw?;
            let status = raw.status();
            if status.contains(EventStatus::Q_OVERFLOW) {
                warn!("inotify event queue overflowed, events were lost");
                continue;
            }
            if status.contains(EventStatus::IGNORED) {
                // The kernel dropped the watch. Events queued for it still go
                // to its handlers first.
                let waiting = self.queue.iter().any(|queued| {
                    matches!(queued, Queued::Event(event) if event.watch_descriptor() == raw.wd)
                });
                if waiting {
                    self.queue.push_back(Queued::Ignored(raw.wd));
                } else {
                    self.prune(raw.wd);
                }
                continue;
            }
            let Some(watched) = self.registry.path_of(raw.wd) else {
                debug!(wd = %raw.wd, "dropping record for unknown watch");
                continue;
            };
            let event = Event::from_raw(&raw, watched);
            debug!(?event, "event decoded");
            self.queue.push_back(Queued::Event(event));
        }
        Ok(())
    }

    /// Release the inotify descriptor. Dropping the notifier also releases
    /// it, but without reporting `close(2)` errors.
    pub fn close(self) -> Result<()> {
        let inotify = self.inotify.into_inner();
        inotify.close()?;
        debug!("notifier closed");
        Ok(())
    }
}

impl AsFd for Notifier {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inotify.get_ref().as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::FnHandler;
    use fsnotifier_sdk::RawEvent;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn record(wd: i32, mask: u32, name: &[u8]) -> Vec<u8> {
        let mut buffer = Vec::new();
        RawEvent {
            wd: WatchDescriptor(wd),
            mask,
            cookie: 0,
            name,
        }
        .encode(&mut buffer);
        buffer
    }

    #[test]
    fn test_new_without_runtime() {
        assert!(matches!(
            Notifier::new(),
            Err(NotifyError::Configuration { .. })
        ));
    }

    #[test]
    fn test_with_explicit_handle() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let notifier = Notifier::with_handle(runtime.handle()).unwrap();
        notifier.close().unwrap();
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home(Path::new("/abs/path")), PathBuf::from("/abs/path"));
        assert_eq!(expand_home(Path::new("rel")), PathBuf::from("rel"));
        if let Some(dirs) = BaseDirs::new() {
            assert_eq!(expand_home(Path::new("~")), dirs.home_dir());
            assert_eq!(expand_home(Path::new("~/x")), dirs.home_dir().join("x"));
        }
        // Only a bare `~` component is expanded.
        assert_eq!(expand_home(Path::new("~user/x")), PathBuf::from("~user/x"));
    }

    #[tokio::test]
    async fn test_enqueue_bookkeeping() {
        let mut notifier = Notifier::new().unwrap();
        notifier.registry.insert(WatchDescriptor(1), PathBuf::from("/w/one"));
        notifier.registry.insert(WatchDescriptor(2), PathBuf::from("/w/two"));
        notifier.handlers.create(WatchDescriptor(1), Vec::new());
        notifier.handlers.create(WatchDescriptor(2), Vec::new());

        let mut buffer = record(1, EventType::CREATE.bits(), b"a\0\0\0");
        // Unknown watch.
        buffer.extend(record(9, EventType::CREATE.bits(), b"b\0\0\0"));
        // Overflow marker.
        buffer.extend(record(-1, EventStatus::Q_OVERFLOW.bits(), b""));
        buffer.extend(record(2, EventType::DELETE_SELF.bits(), b""));
        // Kernel removed watch 2.
        buffer.extend(record(2, EventStatus::IGNORED.bits(), b""));
        notifier.enqueue(&buffer).unwrap();

        assert_eq!(notifier.pending_events(), 2);
        // Watch 2 stays until its DELETE_SELF is dispatched.
        assert!(notifier.is_watched(WatchDescriptor(2)));
        let first = notifier.pop_event().unwrap();
        assert_eq!(first.file_path(), Path::new("/w/one/a"));
        let second = notifier.pop_event().unwrap();
        assert_eq!(second.file_path(), Path::new("/w/two"));
        assert_eq!(second.event_type(), EventType::DELETE_SELF);
        assert!(notifier.is_watched(WatchDescriptor(2)));
        notifier.prune_ignored();

        assert!(notifier.pop_event().is_none());
        assert!(!notifier.is_watched(WatchDescriptor(2)));
        assert!(!notifier.handlers.contains(WatchDescriptor(2)));
        assert!(notifier.is_watched(WatchDescriptor(1)));
    }

    #[tokio::test]
    async fn test_ignored_watch_still_dispatches_queued_events() {
        let mut notifier = Notifier::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = FnHandler::shared(EventType::ALL, move |event: &Event| {
            sink.lock().push(event.event_type());
        });
        notifier.registry.insert(WatchDescriptor(3), PathBuf::from("/w/once"));
        notifier.handlers.create(WatchDescriptor(3), [handler]);

        let mut buffer = record(3, EventType::CREATE.bits(), b"f\0\0\0");
        buffer.extend(record(3, EventStatus::IGNORED.bits(), b""));
        notifier.enqueue(&buffer).unwrap();
        assert_eq!(notifier.pending_events(), 1);

        let event = notifier.pop_event().unwrap();
        notifier.dispatch(&event, RunOptions::default());
        notifier.prune_ignored();

        assert_eq!(*seen.lock(), vec![EventType::CREATE]);
        assert!(!notifier.is_watched(WatchDescriptor(3)));
        assert!(notifier.handlers.is_empty());
        assert!(notifier.queue.is_empty());
    }

    #[tokio::test]
    async fn test_ignored_without_queued_events_prunes_at_once() {
        let mut notifier = Notifier::new().unwrap();
        notifier.registry.insert(WatchDescriptor(4), PathBuf::from("/w/gone"));
        notifier.handlers.create(WatchDescriptor(4), Vec::new());
        notifier
            .enqueue(&record(4, EventStatus::IGNORED.bits(), b""))
            .unwrap();
        assert!(!notifier.is_watched(WatchDescriptor(4)));
        assert!(notifier.queue.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_truncated_keeps_decoded_prefix() {
        let mut notifier = Notifier::new().unwrap();
        notifier.registry.insert(WatchDescriptor(1), PathBuf::from("/w"));
        let mut buffer = record(1, EventType::MODIFY.bits(), b"");
        buffer.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(notifier.enqueue(&buffer), Err(NotifyError::Decode(_))));
        assert_eq!(notifier.pending_events(), 1);
    }
}
