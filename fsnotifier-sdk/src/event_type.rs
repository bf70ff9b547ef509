use bitflags::bitflags;

bitflags! {
    /// Event categories an inotify watch can report, named after `IN_*` in
    /// inotify(7).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct EventType: u32 {
        /// File was accessed.
        const ACCESS = 0x001;
        /// File was modified.
        const MODIFY = 0x002;
        /// Metadata changed.
        const ATTRIB = 0x004;
        /// File opened for writing was closed.
        const CLOSE_WRITE = 0x008;
        /// File not opened for writing was closed.
        const CLOSE_NOWRITE = 0x010;
        /// File was opened.
        const OPEN = 0x020;
        /// File was moved out of a watched directory.
        const MOVED_FROM = 0x040;
        /// File was moved into a watched directory.
        const MOVED_TO = 0x080;
        /// File was created in a watched directory.
        const CREATE = 0x100;
        /// File was deleted from a watched directory.
        const DELETE = 0x200;
        /// Watched file or directory was deleted.
        const DELETE_SELF = 0x400;
        /// Watched file or directory was moved.
        const MOVE_SELF = 0x800;

        const CLOSE = Self::CLOSE_WRITE.bits() | Self::CLOSE_NOWRITE.bits();
        const MOVED = Self::MOVED_FROM.bits() | Self::MOVED_TO.bits();
        const ALL = 0xfff;
    }
}

bitflags! {
    /// Modifier bits that change how a watch behaves rather than what it reports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WatchModifier: u32 {
        const ONLYDIR = 0x0100_0000;
        const DONT_FOLLOW = 0x0200_0000;
        const EXCL_UNLINK = 0x0400_0000;
        /// Merge into an existing watch mask instead of replacing it.
        /// Fail with `EEXIST` instead of modifying a watch the inode already has.
        const MASK_CREATE = 0x1000_0000;
        const MASK_ADD = 0x2000_0000;
        const ONESHOT = 0x8000_0000;
    }
}

bitflags! {
    /// Bits the kernel sets on delivered records only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventStatus: u32 {
        /// Filesystem containing the watched object was unmounted.
        const UNMOUNT = 0x0000_2000;
        /// Event queue overflowed, `wd` is -1.
        const Q_OVERFLOW = 0x0000_4000;
        /// Watch was removed, explicitly or by the kernel.
        const IGNORED = 0x0000_8000;
        /// Subject of this event is a directory.
        const ISDIR = 0x4000_0000;
    }
}

impl EventType {
    /// Keep only the bits that name an event category.
    pub fn from_mask(mask: u32) -> Self {
        Self::from_bits_truncate(mask & Self::ALL.bits())
    }

    /// Flags word for `inotify_add_watch`.
    pub fn with_modifiers(self, modifiers: WatchModifier) -> u32 {
        self.bits() | modifiers.bits()
    }
}

impl EventStatus {
    pub fn from_mask(mask: u32) -> Self {
        Self::from_bits_truncate(mask)
    }
}
