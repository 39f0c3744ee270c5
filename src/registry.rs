//! Registry of buffers imported into this process.
//!
//! Entries live in a slot table addressed by [`BufferRef`], an index plus a
//! generation. Freeing a slot bumps its generation, so a stale reference to
//! a reused slot is rejected instead of reaching the new occupant.
//!
//! ```text
//! slots: [ gen 3: buf 0x1a ] [ gen 1: free ] [ gen 7: buf 0x2c ]
//!                               ^ free list
//! by_id: { 0x1a -> 0, 0x2c -> 2 }
//! ```
//!
//! Handles are held as `Arc<BufferHandle>`: a lookup keeps the buffer alive
//! until the caller is done with it, even if another thread frees it.

use crate::error::{Error, Result};
use crate::handle::{BufferHandle, RawBufferHandle};
use crate::observability::{
    instrument_import, record_buffer_freed, record_buffer_imported, record_registered_buffers,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Reference to a registered buffer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRef {
    index: u32,
    generation: u32,
}

impl BufferRef {
    /// Slot index.
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation at registration time.
    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for BufferRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferRef({}v{})", self.index, self.generation)
    }
}

struct Entry {
    handle: Arc<BufferHandle>,
    refs: u32,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Default)]
struct Table {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_id: HashMap<u64, u32>,
}

impl Table {
    fn entry_mut(&mut self, buffer: BufferRef) -> Result<&mut Entry> {
        self.slots
            .get_mut(buffer.index as usize)
            .filter(|slot| slot.generation == buffer.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or_else(|| unregistered(buffer))
    }

    fn remove(&mut self, index: u32) -> Option<Entry> {
        let slot = self.slots.get_mut(index as usize)?;
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.by_id.remove(&entry.handle.buffer_id());
        Some(entry)
    }
}

/// Process-wide table of imported buffers.
///
/// Safe to use from any number of threads.
#[derive(Default)]
pub struct BufferRegistry {
    table: Mutex<Table>,
}

impl BufferRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process-local copy of `raw`.
    ///
    /// The caller keeps ownership of `raw`; the registry holds duplicated
    /// fds.
    ///
    /// # Errors
    ///
    /// - [`Error::BadBuffer`] if the handle fails its signature check
    /// - [`Error::NoResources`] if a buffer with the same id is already
    ///   registered, or fds cannot be duplicated
    pub fn import(&self, raw: &RawBufferHandle) -> Result<BufferRef> {
        let _span = instrument_import(raw.buffer_id());
        raw.validate().inspect_err(|e| {
            tracing::error!(buffer_id = raw.buffer_id(), error = %e, "rejecting invalid handle");
        })?;

        let handle = Arc::new(BufferHandle::from_raw(raw.try_clone()?)?);
        let buffer_id = handle.buffer_id();

        let mut table = self.table.lock();
        if table.by_id.contains_key(&buffer_id) {
            drop(table);
            tracing::error!(
                buffer_id,
                "buffer already registered, a previous handle was released through the wrong path"
            );
            return Err(Error::NoResources(format!(
                "buffer {buffer_id:#x} is already registered"
            )));
        }

        let index = match table.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(table.slots.len())
                    .map_err(|_| Error::NoResources("registry is full".into()))?;
                table.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                index
            }
        };
        let slot = &mut table.slots[index as usize];
        slot.entry = Some(Entry { handle, refs: 1 });
        let buffer = BufferRef {
            index,
            generation: slot.generation,
        };
        table.by_id.insert(buffer_id, index);
        let len = table.by_id.len();
        drop(table);

        record_buffer_imported();
        record_registered_buffers(len);
        tracing::debug!(buffer_id, ?buffer, "buffer imported");
        Ok(buffer)
    }

    /// Take another reference on a registered buffer.
    pub fn retain(&self, buffer: BufferRef) -> Result<()> {
        let mut table = self.table.lock();
        let entry = table.entry_mut(buffer)?;
        entry.refs = entry
            .refs
            .checked_add(1)
            .ok_or_else(|| Error::NoResources("buffer reference count overflow".into()))?;
        Ok(())
    }

    /// Drop one reference. The last reference unregisters the buffer.
    ///
    /// Memory is unmapped and fds are closed once no caller still holds a
    /// handle returned by [`lookup`](Self::lookup).
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadBuffer`] if `buffer` is not registered.
    pub fn free(&self, buffer: BufferRef) -> Result<()> {
        let mut table = self.table.lock();
        let entry = table.entry_mut(buffer)?;
        entry.refs -= 1;
        if entry.refs > 0 {
            return Ok(());
        }

        let removed = table.remove(buffer.index);
        let len = table.by_id.len();
        drop(table);

        if let Some(entry) = removed {
            tracing::debug!(buffer_id = entry.handle.buffer_id(), ?buffer, "buffer freed");
            record_buffer_freed();
            record_registered_buffers(len);
        }
        Ok(())
    }

    /// The handle registered under `buffer`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadBuffer`] if `buffer` is not registered.
    pub fn lookup(&self, buffer: BufferRef) -> Result<Arc<BufferHandle>> {
        let mut table = self.table.lock();
        Ok(Arc::clone(&table.entry_mut(buffer)?.handle))
    }

    /// Current reference count of `buffer`, if registered.
    pub fn ref_count(&self, buffer: BufferRef) -> Option<u32> {
        self.table.lock().entry_mut(buffer).ok().map(|e| e.refs)
    }

    /// Visit every registered buffer.
    ///
    /// The set is snapshotted first; `visitor` runs without the registry
    /// lock held and each handle stays alive for the duration of its visit.
    pub fn for_each(&self, mut visitor: impl FnMut(BufferRef, &BufferHandle)) {
        let snapshot: Vec<(BufferRef, Arc<BufferHandle>)> = {
            let table = self.table.lock();
            table
                .slots
                .iter()
                .enumerate()
                .filter_map(|(index, slot)| {
                    slot.entry.as_ref().map(|entry| {
                        (
                            BufferRef {
                                index: index as u32,
                                generation: slot.generation,
                            },
                            Arc::clone(&entry.handle),
                        )
                    })
                })
                .collect()
        };
        for (buffer, handle) in &snapshot {
            visitor(*buffer, handle);
        }
    }

    /// Number of registered buffers.
    pub fn len(&self) -> usize {
        self.table.lock().by_id.len()
    }

    /// Whether no buffer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregister everything regardless of reference counts.
    ///
    /// Returns the number of buffers dropped.
    pub fn clear(&self) -> usize {
        let removed: Vec<Entry> = {
            let mut table = self.table.lock();
            let indices: Vec<u32> = table.by_id.values().copied().collect();
            indices.into_iter().filter_map(|i| table.remove(i)).collect()
        };
        for _ in &removed {
            record_buffer_freed();
        }
        record_registered_buffers(0);
        removed.len()
    }
}

impl fmt::Debug for BufferRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferRegistry")
            .field("len", &self.len())
            .finish()
    }
}

fn unregistered(buffer: BufferRef) -> Error {
    tracing::error!(?buffer, "buffer is not registered");
    Error::BadBuffer(format!("{buffer:?} is not registered"))
}
