use crate::{DecodeError, EventStatus, EventType};
use std::{
    ffi::{OsStr, OsString},
    fmt,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};

/// Size of the fixed `struct inotify_event` header.
pub const HEADER_LEN: usize = 16;

/// Kernel handle identifying one watch on an inotify instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchDescriptor(pub i32);

impl fmt::Display for WatchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One undecoded record as the kernel wrote it.
///
/// `name` still carries its NUL padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent<'a> {
    pub wd: WatchDescriptor,
    pub mask: u32,
    pub cookie: u32,
    pub name: &'a [u8],
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_ne_bytes(word)
}

impl<'a> RawEvent<'a> {
    /// Parse the record starting at `offset`, returning it together with the
    /// offset of the record that follows.
    pub fn parse(buffer: &'a [u8], offset: usize) -> Result<(Self, usize), DecodeError> {
        let available = buffer.len().saturating_sub(offset);
        if available < HEADER_LEN {
            return Err(DecodeError::Truncated {
                offset,
                needed: HEADER_LEN,
                available,
            });
        }
        let header = &buffer[offset..offset + HEADER_LEN];
        let wd = WatchDescriptor(read_u32(header, 0) as i32);
        let mask = read_u32(header, 4);
        let cookie = read_u32(header, 8);
        let name_len = read_u32(header, 12) as usize;

        let name_start = offset + HEADER_LEN;
        let available = buffer.len() - name_start;
        if available < name_len {
            return Err(DecodeError::Truncated {
                offset: name_start,
                needed: name_len,
                available,
            });
        }
        let name = &buffer[name_start..name_start + name_len];
        Ok((
            RawEvent {
                wd,
                mask,
                cookie,
                name,
            },
            name_start + name_len,
        ))
    }

    pub fn event_type(&self) -> EventType {
        EventType::from_mask(self.mask)
    }

    pub fn status(&self) -> EventStatus {
        EventStatus::from_mask(self.mask)
    }

    /// Name with the trailing NUL padding stripped.
    pub fn file_name(&self) -> &'a OsStr {
        let end = self
            .name
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |last| last + 1);
        OsStr::from_bytes(&self.name[..end])
    }

    /// Append this record to `out` in wire format.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.wd.0.to_ne_bytes());
        out.extend_from_slice(&self.mask.to_ne_bytes());
        out.extend_from_slice(&self.cookie.to_ne_bytes());
        out.extend_from_slice(&(self.name.len() as u32).to_ne_bytes());
        out.extend_from_slice(self.name);
    }
}

/// Iterates the back-to-back records of one `read(2)` result.
///
/// Yields at most one error, after which iteration ends.
pub struct RawEvents<'a> {
    buffer: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> RawEvents<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            offset: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for RawEvents<'a> {
    type Item = Result<RawEvent<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buffer.len() {
            return None;
        }
        match RawEvent::parse(self.buffer, self.offset) {
            Ok((event, next)) => {
                self.offset = next;
                Some(Ok(event))
            }
            Err(error) => {
                self.failed = true;
                Some(Err(error))
            }
        }
    }
}

/// A decoded notification with its path resolved against the watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    wd: WatchDescriptor,
    event_type: EventType,
    is_directory: bool,
    unmounted: bool,
    cookie: u32,
    file_name: OsString,
    file_path: PathBuf,
}

impl Event {
    /// `watched` is the path the record's descriptor was registered for.
    pub fn from_raw(raw: &RawEvent<'_>, watched: &Path) -> Self {
        let status = raw.status();
        let file_name = raw.file_name();
        // An empty name means the watched entry itself.
        let file_path = if file_name.is_empty() {
            watched.to_path_buf()
        } else {
            watched.join(file_name)
        };
        Event {
            wd: raw.wd,
            event_type: raw.event_type(),
            is_directory: status.contains(EventStatus::ISDIR),
            unmounted: status.contains(EventStatus::UNMOUNT),
            cookie: raw.cookie,
            file_name: file_name.to_os_string(),
            file_path,
        }
    }

    /// Decode the record at `offset`, resolving its descriptor to a path with
    /// `resolve_path`.
    pub fn from_buffer<F>(
        resolve_path: F,
        buffer: &[u8],
        offset: usize,
    ) -> Result<(Self, usize), DecodeError>
    where
        F: FnOnce(WatchDescriptor) -> PathBuf,
    {
        let (raw, offset) = RawEvent::parse(buffer, offset)?;
        let watched = resolve_path(raw.wd);
        Ok((Event::from_raw(&raw, &watched), offset))
    }

    pub fn watch_descriptor(&self) -> WatchDescriptor {
        self.wd
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn unmounted(&self) -> bool {
        self.unmounted
    }

    /// Pairs a `MOVED_FROM` with its `MOVED_TO`, zero otherwise.
    pub fn cookie(&self) -> u32 {
        self.cookie
    }

    pub fn file_name(&self) -> &OsStr {
        &self.file_name
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(wd: i32, mask: u32, cookie: u32, name: &[u8]) -> Vec<u8> {
        let mut buffer = Vec::new();
        RawEvent {
            wd: WatchDescriptor(wd),
            mask,
            cookie,
            name,
        }
        .encode(&mut buffer);
        buffer
    }

    fn cwd(_: WatchDescriptor) -> PathBuf {
        PathBuf::from("/watched")
    }

    #[test]
    fn test_removes_nulls() {
        let mut name = [0u8; 255];
        name[..4].copy_from_slice(b"test");
        let buffer = record(0x7777_7777, 0xffff_eeee, 0xffff_dddd, &name);
        let (event, offset) = Event::from_buffer(cwd, &buffer, 0).unwrap();
        assert_eq!(offset, 16 + 255);
        assert_eq!(event.file_name(), "test");
        assert_eq!(event.file_path(), Path::new("/watched/test"));
        assert_eq!(event.watch_descriptor(), WatchDescriptor(0x7777_7777));
        assert_eq!(event.cookie(), 0xffff_dddd);
        assert_eq!(event.event_type().bits(), 0xeee);
        assert!(event.is_directory());
        assert!(event.unmounted());
    }

    #[test]
    fn test_empty_name_is_watched_path() {
        let buffer = record(3, EventType::DELETE_SELF.bits(), 0, b"");
        let (event, offset) = Event::from_buffer(cwd, &buffer, 0).unwrap();
        assert_eq!(offset, HEADER_LEN);
        assert_eq!(event.file_name(), "");
        assert_eq!(event.file_path(), Path::new("/watched"));
        assert_eq!(event.event_type(), EventType::DELETE_SELF);
        assert!(!event.is_directory());
        assert!(!event.unmounted());
    }

    #[test]
    fn test_truncated_header() {
        let buffer = record(1, EventType::CREATE.bits(), 0, b"");
        for len in 0..HEADER_LEN {
            let result = Event::from_buffer(cwd, &buffer[..len], 0);
            assert!(
                matches!(result, Err(DecodeError::Truncated { needed: HEADER_LEN, .. })),
                "length {len} should not decode"
            );
        }
    }

    #[test]
    fn test_name_longer_than_buffer() {
        let mut buffer = record(1, EventType::CREATE.bits(), 0, b"abcdefgh");
        buffer.truncate(buffer.len() - 3);
        let err = RawEvent::parse(&buffer, 0).unwrap_err();
        let DecodeError::Truncated {
            offset,
            needed,
            available,
        } = err;
        assert_eq!((offset, needed, available), (HEADER_LEN, 8, 5));
    }

    #[test]
    fn test_bad_offset() {
        let buffer = record(0, 0, 0, b"test\0");
        assert!(RawEvent::parse(&buffer, 1).is_err());
        assert!(RawEvent::parse(&buffer, buffer.len() + 10).is_err());
    }

    #[test]
    fn test_header_without_length_field() {
        // wd, mask, cookie, then name bytes where the length should be.
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&0i32.to_ne_bytes());
        buffer.extend_from_slice(&0u32.to_ne_bytes());
        buffer.extend_from_slice(&5u32.to_ne_bytes());
        buffer.extend_from_slice(b"test\0");
        assert!(RawEvent::parse(&buffer, 0).is_err());
    }

    #[test]
    fn test_raw_events_sequence() {
        let mut buffer = record(1, EventType::CREATE.bits(), 0, b"a\0\0\0");
        buffer.extend(record(1, EventType::MOVED_FROM.bits(), 42, b"b\0\0\0"));
        buffer.extend(record(2, EventType::MOVED_TO.bits(), 42, b"c\0\0\0"));
        let events: Vec<_> = RawEvents::new(&buffer).collect::<Result<_, _>>().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].file_name(), "a");
        assert_eq!(events[1].cookie, events[2].cookie);
        assert_eq!(events[2].wd, WatchDescriptor(2));
        assert_eq!(events[2].event_type(), EventType::MOVED_TO);
    }

    #[test]
    fn test_raw_events_stops_after_error() {
        let mut buffer = record(1, EventType::CREATE.bits(), 0, b"a\0\0\0");
        buffer.extend_from_slice(&[0u8; 7]);
        let mut events = RawEvents::new(&buffer);
        assert!(events.next().unwrap().is_ok());
        assert!(events.next().unwrap().is_err());
        assert!(events.next().is_none());
    }
}
