use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use log::{debug, trace};
use thiserror::Error;

/// Failures raised by GPU resource management.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("GPU context has been lost")]
    ContextLost,
    #[error("GPU context is already current")]
    AlreadyCurrent,
    #[error("buffer {0:?} belongs to a different GPU context")]
    ForeignContext(BufferId),
    #[error("buffer {0:?} has been released")]
    Released(BufferId),
    #[error("requested {requested} bytes but buffers are limited to {limit} bytes")]
    TooLarge { requested: u64, limit: u64 },
    #[error("write of {len} bytes at offset {offset} overflows a {size} byte buffer")]
    OutOfRange { offset: u64, len: u64, size: u64 },
}

/// Opaque identifier of a buffer owned by a [`GpuContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(u64);

/// What the renderer binds a buffer as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
}

/// Host-side mirror of a GPU buffer.
///
/// The revision counter increments on every allocation or write so the
/// renderer can tell which device buffers are stale.
#[derive(Debug, Clone)]
pub struct BufferEntry {
    pub usage: BufferUsage,
    pub label: String,
    pub bytes: Vec<u8>,
    pub revision: u64,
}

#[derive(Debug)]
struct ContextState {
    next_id: u64,
    current: bool,
    lost: bool,
    max_buffer_size: u64,
    buffers: BTreeMap<BufferId, BufferEntry>,
}

#[derive(Debug)]
struct Shared {
    state: RefCell<ContextState>,
    /// Buffers whose handles were dropped while `state` was borrowed.
    orphans: RefCell<Vec<BufferId>>,
}

impl Shared {
    fn sweep(&self) {
        let mut orphans = self.orphans.borrow_mut();
        if orphans.is_empty() {
            return;
        }
        if let Ok(mut state) = self.state.try_borrow_mut() {
            for id in orphans.drain(..) {
                state.buffers.remove(&id);
                trace!("released deferred buffer {id:?}");
            }
        }
    }

    fn read(&self) -> Ref<'_, ContextState> {
        self.sweep();
        self.state.borrow()
    }

    fn write(&self) -> RefMut<'_, ContextState> {
        self.sweep();
        self.state.borrow_mut()
    }
}

/// Owner of every buffer the drawable objects allocate.
///
/// Buffers are written host-side while the context is current; the renderer
/// mirrors them onto the device with [`GpuContext::for_each_buffer`].
/// Cloning yields another handle to the same context.
#[derive(Debug, Clone)]
pub struct GpuContext {
    shared: Rc<Shared>,
}

impl Default for GpuContext {
    fn default() -> Self {
        Self::new(u64::from(u32::MAX))
    }
}

impl GpuContext {
    pub fn new(max_buffer_size: u64) -> Self {
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(ContextState {
                    next_id: 1,
                    current: false,
                    lost: false,
                    max_buffer_size,
                    buffers: BTreeMap::new(),
                }),
                orphans: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Makes the context current for the lifetime of the returned guard.
    pub fn make_current(&self) -> Result<ContextGuard<'_>, GpuError> {
        let mut state = self.shared.write();
        if state.lost {
            return Err(GpuError::ContextLost);
        }
        if state.current {
            return Err(GpuError::AlreadyCurrent);
        }
        state.current = true;
        trace!("GPU context acquired");
        Ok(ContextGuard { context: self })
    }

    pub fn is_current(&self) -> bool {
        self.shared.read().current
    }

    /// Marks the context as lost; no buffer can be created until restored.
    pub fn mark_lost(&self) {
        self.shared.write().lost = true;
    }

    pub fn restore(&self) {
        self.shared.write().lost = false;
    }

    pub fn is_lost(&self) -> bool {
        self.shared.read().lost
    }

    pub fn set_max_buffer_size(&self, limit: u64) {
        self.shared.write().max_buffer_size = limit;
    }

    pub fn live_buffers(&self) -> usize {
        self.shared.read().buffers.len()
    }

    /// Returns a copy of the buffer's current contents.
    pub fn buffer_contents(&self, id: BufferId) -> Option<Vec<u8>> {
        self.shared
            .read()
            .buffers
            .get(&id)
            .map(|entry| entry.bytes.clone())
    }

    pub fn contains(&self, id: BufferId) -> bool {
        self.shared.read().buffers.contains_key(&id)
    }

    /// Visits every live buffer in creation order.
    pub fn for_each_buffer(&self, mut visit: impl FnMut(BufferId, &BufferEntry)) {
        for (id, entry) in self.shared.read().buffers.iter() {
            visit(*id, entry);
        }
    }

    fn release(&self) {
        self.shared.write().current = false;
        trace!("GPU context released");
    }
}

/// Proof that the GPU context is current. Dropping it releases the context.
#[derive(Debug)]
pub struct ContextGuard<'a> {
    context: &'a GpuContext,
}

impl<'a> ContextGuard<'a> {
    pub fn context(&self) -> &'a GpuContext {
        self.context
    }

    /// Creates an empty buffer owned by this context.
    pub fn create_buffer(&self, usage: BufferUsage, label: &str) -> Result<BufferHandle, GpuError> {
        let mut state = self.context.shared.write();
        if state.lost {
            return Err(GpuError::ContextLost);
        }
        let id = BufferId(state.next_id);
        state.next_id += 1;
        state.buffers.insert(
            id,
            BufferEntry {
                usage,
                label: label.to_string(),
                bytes: Vec::new(),
                revision: 0,
            },
        );
        debug!("created {usage:?} buffer {label} ({id:?})");
        Ok(BufferHandle {
            id,
            usage,
            shared: Rc::downgrade(&self.context.shared),
        })
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.context.release();
    }
}

/// Unique owner of one buffer. Dropping the handle frees the buffer.
#[derive(Debug)]
pub struct BufferHandle {
    id: BufferId,
    usage: BufferUsage,
    shared: Weak<Shared>,
}

impl BufferHandle {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Resizes the buffer to `size` zeroed bytes.
    pub fn allocate(&self, ctx: &ContextGuard<'_>, size: u64) -> Result<(), GpuError> {
        self.with_entry(ctx, |limit, entry| {
            if size > limit {
                return Err(GpuError::TooLarge {
                    requested: size,
                    limit,
                });
            }
            entry.bytes.clear();
            entry.bytes.resize(size as usize, 0);
            entry.revision += 1;
            Ok(())
        })
    }

    /// Copies `bytes` into the buffer at `offset`.
    pub fn write(&self, ctx: &ContextGuard<'_>, offset: u64, bytes: &[u8]) -> Result<(), GpuError> {
        self.with_entry(ctx, |_, entry| {
            let size = entry.bytes.len() as u64;
            let len = bytes.len() as u64;
            if offset.checked_add(len).map_or(true, |end| end > size) {
                return Err(GpuError::OutOfRange { offset, len, size });
            }
            let start = offset as usize;
            entry.bytes[start..start + bytes.len()].copy_from_slice(bytes);
            entry.revision += 1;
            Ok(())
        })
    }

    pub fn size(&self) -> u64 {
        self.shared
            .upgrade()
            .and_then(|shared| {
                shared
                    .read()
                    .buffers
                    .get(&self.id)
                    .map(|entry| entry.bytes.len() as u64)
            })
            .unwrap_or(0)
    }

    fn with_entry<R>(
        &self,
        ctx: &ContextGuard<'_>,
        apply: impl FnOnce(u64, &mut BufferEntry) -> Result<R, GpuError>,
    ) -> Result<R, GpuError> {
        let shared = self.shared.upgrade().ok_or(GpuError::ContextLost)?;
        if !Rc::ptr_eq(&shared, &ctx.context.shared) {
            return Err(GpuError::ForeignContext(self.id));
        }
        let mut state = shared.write();
        if state.lost {
            return Err(GpuError::ContextLost);
        }
        let limit = state.max_buffer_size;
        let entry = state
            .buffers
            .get_mut(&self.id)
            .ok_or(GpuError::Released(self.id))?;
        apply(limit, entry)
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        match shared.state.try_borrow_mut() {
            Ok(mut state) => {
                state.buffers.remove(&self.id);
                trace!("released buffer {:?}", self.id);
            }
            Err(_) => {
                debug!("context busy, deferring release of buffer {:?}", self.id);
                shared.orphans.borrow_mut().push(self.id);
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_context_on_drop() {
        let context = GpuContext::default();
        {
            let _guard = context.make_current().unwrap();
            assert!(context.is_current());
            assert_eq!(
                context.make_current().unwrap_err(),
                GpuError::AlreadyCurrent
            );
        }
        assert!(!context.is_current());
        assert!(context.make_current().is_ok());
    }

    #[test]
    fn guard_releases_on_error_path() {
        fn failing(context: &GpuContext) -> Result<(), GpuError> {
            let ctx = context.make_current()?;
            let buffer = ctx.create_buffer(BufferUsage::Vertex, "test")?;
            buffer.write(&ctx, 0, &[1, 2, 3])?;
            Ok(())
        }
        let context = GpuContext::default();
        assert!(matches!(
            failing(&context),
            Err(GpuError::OutOfRange { .. })
        ));
        assert!(!context.is_current());
    }

    #[test]
    fn dropping_handle_frees_buffer() {
        let context = GpuContext::default();
        let ctx = context.make_current().unwrap();
        let buffer = ctx.create_buffer(BufferUsage::Index, "indices").unwrap();
        buffer.allocate(&ctx, 8).unwrap();
        buffer.write(&ctx, 4, &[9, 9, 9, 9]).unwrap();
        assert_eq!(
            context.buffer_contents(buffer.id()),
            Some(vec![0, 0, 0, 0, 9, 9, 9, 9])
        );
        assert_eq!(context.live_buffers(), 1);
        drop(buffer);
        assert_eq!(context.live_buffers(), 0);
    }

    #[test]
    fn handle_dropped_during_visit_is_freed_afterwards() {
        let context = GpuContext::default();
        let mut buffer = {
            let ctx = context.make_current().unwrap();
            Some(ctx.create_buffer(BufferUsage::Vertex, "busy").unwrap())
        };
        let mut visited = 0;
        context.for_each_buffer(|_, _| {
            visited += 1;
            buffer.take();
        });
        assert_eq!(visited, 1);
        assert!(buffer.is_none());
        assert_eq!(context.live_buffers(), 0);

        let ctx = context.make_current().unwrap();
        let fresh = ctx.create_buffer(BufferUsage::Index, "fresh").unwrap();
        assert_eq!(context.live_buffers(), 1);
        assert!(context.contains(fresh.id()));
    }

    #[test]
    fn lost_context_refuses_buffers() {
        let context = GpuContext::default();
        context.mark_lost();
        assert_eq!(context.make_current().unwrap_err(), GpuError::ContextLost);
        context.restore();
        let ctx = context.make_current().unwrap();
        context.mark_lost();
        assert_eq!(
            ctx.create_buffer(BufferUsage::Vertex, "late").unwrap_err(),
            GpuError::ContextLost
        );
    }

    #[test]
    fn allocation_respects_limit() {
        let context = GpuContext::new(16);
        let ctx = context.make_current().unwrap();
        let buffer = ctx.create_buffer(BufferUsage::Vertex, "big").unwrap();
        assert_eq!(
            buffer.allocate(&ctx, 32).unwrap_err(),
            GpuError::TooLarge {
                requested: 32,
                limit: 16
            }
        );
    }

    #[test]
    fn foreign_guard_is_rejected() {
        let first = GpuContext::default();
        let second = GpuContext::default();
        let buffer = {
            let ctx = first.make_current().unwrap();
            ctx.create_buffer(BufferUsage::Vertex, "first").unwrap()
        };
        let other = second.make_current().unwrap();
        assert_eq!(
            buffer.allocate(&other, 4).unwrap_err(),
            GpuError::ForeignContext(buffer.id())
        );
    }
}
