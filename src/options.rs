use fsnotifier_sdk::{EventType, WatchModifier};
use serde::{Deserialize, Serialize};

/// How a new watch is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Only report these event types.
    pub only_event_types: EventType,
    /// Watch `path` even if it is a symlink.
    pub follow_symlinks: bool,
    /// Fail unless `path` is a directory.
    pub if_directory_only: bool,
    /// Remove the watch after its first event.
    pub oneshot: bool,
    /// Stop reporting children once they are unlinked from a watched
    /// directory.
    pub exclude_unlinks: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            only_event_types: EventType::ALL,
            follow_symlinks: true,
            if_directory_only: false,
            oneshot: false,
            exclude_unlinks: true,
        }
    }
}

impl WatchOptions {
    pub fn with_event_types(mut self, event_types: EventType) -> Self {
        self.only_event_types = event_types;
        self
    }

    pub fn with_follow_symlinks(mut self, follow_symlinks: bool) -> Self {
        self.follow_symlinks = follow_symlinks;
        self
    }

    pub fn with_directory_only(mut self, if_directory_only: bool) -> Self {
        self.if_directory_only = if_directory_only;
        self
    }

    pub fn with_oneshot(mut self, oneshot: bool) -> Self {
        self.oneshot = oneshot;
        self
    }

    pub fn with_exclude_unlinks(mut self, exclude_unlinks: bool) -> Self {
        self.exclude_unlinks = exclude_unlinks;
        self
    }

    pub fn modifiers(&self) -> WatchModifier {
        let mut modifiers = WatchModifier::empty();
        // DONT_FOLLOW tracks `follow_symlinks` itself, not its negation.
        modifiers.set(WatchModifier::DONT_FOLLOW, self.follow_symlinks);
        modifiers.set(WatchModifier::ONLYDIR, self.if_directory_only);
        modifiers.set(WatchModifier::EXCL_UNLINK, self.exclude_unlinks);
        modifiers.set(WatchModifier::ONESHOT, self.oneshot);
        modifiers
    }

    /// Flags word passed to `inotify_add_watch`.
    pub fn mask(&self) -> u32 {
        self.only_event_types.with_modifiers(self.modifiers())
    }
}

/// How [`Notifier::run`](crate::Notifier::run) dispatches events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Stop after the first capable handler of each event.
    pub handle_once: bool,
    /// Log a warning for events no handler could take.
    pub warn_unhandled: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            handle_once: false,
            warn_unhandled: true,
        }
    }
}

impl RunOptions {
    pub fn with_handle_once(mut self, handle_once: bool) -> Self {
        self.handle_once = handle_once;
        self
    }

    pub fn with_warn_unhandled(mut self, warn_unhandled: bool) -> Self {
        self.warn_unhandled = warn_unhandled;
        self
    }
}
