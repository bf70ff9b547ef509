use crate::{NotifyError, Result, WatchTarget};
use fsnotifier_sdk::{Event, EventType, WatchDescriptor};
use std::{collections::HashMap, fmt, sync::Arc};

/// Receives events for the watches it is registered on.
///
/// `handle_event` runs on the dispatch loop, so it must not block for long.
pub trait EventHandler: Send + Sync {
    fn can_handle_event_type(&self, event_type: EventType) -> bool;
    fn handle_event(&self, event: &Event);
}

pub type HandlerRef = Arc<dyn EventHandler>;

/// Handler built from a closure, capable of any event intersecting `types`.
pub struct FnHandler<F> {
    types: EventType,
    callback: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    pub fn new(types: EventType, callback: F) -> Self {
        Self { types, callback }
    }

    pub fn shared(types: EventType, callback: F) -> HandlerRef {
        Arc::new(Self::new(types, callback))
    }
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    fn can_handle_event_type(&self, event_type: EventType) -> bool {
        self.types.intersects(event_type)
    }

    fn handle_event(&self, event: &Event) {
        (self.callback)(event)
    }
}

/// Identity, not value, equality. Only the data pointer is compared.
fn same_handler(a: &HandlerRef, b: &HandlerRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn push_unique(set: &mut Vec<HandlerRef>, handler: HandlerRef) {
    if !set.iter().any(|existing| same_handler(existing, &handler)) {
        set.push(handler);
    }
}

/// Per-watch handler sets, kept in registration order.
#[derive(Default)]
pub struct HandlerDirectory {
    entries: HashMap<WatchDescriptor, Vec<HandlerRef>>,
}

impl fmt::Debug for HandlerDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(wd, set)| (wd, set.len())))
            .finish()
    }
}

impl HandlerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the entry for a new watch, replacing any previous one.
    pub fn create(&mut self, wd: WatchDescriptor, handlers: impl IntoIterator<Item = HandlerRef>) {
        let mut set = Vec::new();
        for handler in handlers {
            push_unique(&mut set, handler);
        }
        self.entries.insert(wd, set);
    }

    fn entry_mut(&mut self, wd: WatchDescriptor) -> Result<&mut Vec<HandlerRef>> {
        self.entries
            .get_mut(&wd)
            .ok_or(NotifyError::NotWatched(WatchTarget::Descriptor(wd)))
    }

    /// Add handlers, skipping ones already registered on `wd`.
    pub fn add(
        &mut self,
        wd: WatchDescriptor,
        handlers: impl IntoIterator<Item = HandlerRef>,
    ) -> Result<()> {
        let set = self.entry_mut(wd)?;
        for handler in handlers {
            push_unique(set, handler);
        }
        Ok(())
    }

    pub fn remove(&mut self, wd: WatchDescriptor, handlers: &[HandlerRef]) -> Result<()> {
        let set = self.entry_mut(wd)?;
        set.retain(|existing| !handlers.iter().any(|gone| same_handler(existing, gone)));
        Ok(())
    }

    pub fn clear(&mut self, wd: WatchDescriptor) -> Result<()> {
        self.entry_mut(wd)?.clear();
        Ok(())
    }

    pub fn handlers(&self, wd: WatchDescriptor) -> Option<&[HandlerRef]> {
        self.entries.get(&wd).map(Vec::as_slice)
    }

    pub fn contains(&self, wd: WatchDescriptor) -> bool {
        self.entries.contains_key(&wd)
    }

    /// Drop the entry together with its watch.
    pub fn drop_entry(&mut self, wd: WatchDescriptor) -> Option<Vec<HandlerRef>> {
        self.entries.remove(&wd)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
