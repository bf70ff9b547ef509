//! Linux inotify binding and the wire format of its event records.
mod error;
mod event;
mod event_type;
mod inotify;

pub use error::{DecodeError, OsError};
pub use event::{Event, HEADER_LEN, RawEvent, RawEvents, WatchDescriptor};
pub use event_type::{EventStatus, EventType, WatchModifier};
pub use inotify::Inotify;
