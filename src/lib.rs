//! Filesystem change notification on top of Linux inotify.
//!
//! A [`Notifier`] owns one inotify instance. Watches are added per path with
//! a set of [`EventHandler`]s, and [`Notifier::run`] decodes the kernel's
//! records and fans each event out to the handlers of its watch.
mod error;
mod handlers;
mod notifier;
mod options;
mod registry;

pub use error::{NotifyError, Result};
pub use fsnotifier_sdk::{
    DecodeError, Event, EventStatus, EventType, OsError, WatchDescriptor, WatchModifier,
};
pub use handlers::{EventHandler, FnHandler, HandlerDirectory, HandlerRef};
pub use notifier::Notifier;
pub use options::{RunOptions, WatchOptions};
pub use registry::{WatchRegistry, WatchTarget};
pub use tokio_util::sync::CancellationToken;
