use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::FrameHeader;

/// Callback invoked when a guard releases its page; receives the page id and
/// whether the page was written through the guard.
type ReleaseCallback = Box<dyn FnOnce(PageId, bool) + Send + Sync>;

/// Shared plumbing for both guard flavors
struct PageGuardBase {
    /// The page ID being guarded
    page_id: PageId,
    /// Reference to the frame header (kept alive for the guard's lifetime)
    _frame: Arc<FrameHeader>,
    /// Callback to release the guard
    release_callback: Option<ReleaseCallback>,
    /// Whether the page was marked dirty
    is_dirty: bool,
}

impl PageGuardBase {
    fn new(page_id: PageId, frame: Arc<FrameHeader>, release_callback: ReleaseCallback) -> Self {
        Self {
            page_id,
            _frame: frame,
            release_callback: Some(release_callback),
            is_dirty: false,
        }
    }

    fn drop_impl(&mut self) {
        if let Some(callback) = self.release_callback.take() {
            callback(self.page_id, self.is_dirty);
        }
    }
}

/// RAII guard for shared read access to a page. Holds the page latch in
/// shared mode and keeps the page pinned; dropping releases both.
pub struct ReadPageGuard {
    base: PageGuardBase,
    /// Read lock on the page data; released on drop before the unpin
    /// callback runs
    data_guard: Option<RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl ReadPageGuard {
    /// Creates a new ReadPageGuard.
    /// # Safety
    /// The caller must ensure that the frame outlives this guard; the Arc in
    /// the base takes care of that here.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.read();
        // Extend to 'static - the frame is kept alive via the Arc below
        let data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            base: PageGuardBase::new(page_id, frame, release_callback),
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }

    /// Drops this guard, releasing the page early.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Release the latch before unpinning
        self.data_guard.take();
        self.base.drop_impl();
    }
}

/// RAII guard for exclusive write access to a page. Holds the page latch in
/// exclusive mode and keeps the page pinned; dropping releases both and
/// carries the dirty bit back to the pool.
pub struct WritePageGuard {
    base: PageGuardBase,
    /// Write lock on the page data; taken out before the release callback
    /// runs on drop
    data_guard: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl WritePageGuard {
    /// Creates a new WritePageGuard.
    /// # Safety
    /// The caller must ensure that the frame outlives this guard; the Arc in
    /// the base takes care of that here.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.write();
        // Extend to 'static - the frame is kept alive via the Arc below
        let data_guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            base: PageGuardBase::new(page_id, frame, release_callback),
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }

    /// Returns a mutable reference to the page data and marks the page
    /// dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.base.is_dirty = true;
        &mut self.data_guard.as_mut().unwrap()[..]
    }

    /// Drops this guard, releasing the page early.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        // Release the latch before unpinning
        self.data_guard.take();
        self.base.drop_impl();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FrameId;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_read_page_guard() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 42;
        frame.copy_from(&data);

        let released = Arc::new(AtomicBool::new(false));
        let released_clone = released.clone();

        let guard = unsafe {
            ReadPageGuard::new(
                PageId::new(1),
                frame.clone(),
                Box::new(move |_, _| {
                    released_clone.store(true, Ordering::SeqCst);
                }),
            )
        };

        assert_eq!(guard.page_id(), PageId::new(1));
        assert_eq!(guard.data()[0], 42);
        assert!(!released.load(Ordering::SeqCst));

        drop(guard);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_write_page_guard() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));

        let released = Arc::new(AtomicBool::new(false));
        let dirty = Arc::new(AtomicBool::new(false));
        let released_clone = released.clone();
        let dirty_clone = dirty.clone();

        let mut guard = unsafe {
            WritePageGuard::new(
                PageId::new(1),
                frame.clone(),
                Box::new(move |_, is_dirty| {
                    released_clone.store(true, Ordering::SeqCst);
                    dirty_clone.store(is_dirty, Ordering::SeqCst);
                }),
            )
        };

        assert_eq!(guard.page_id(), PageId::new(1));

        guard.data_mut()[0] = 42;

        assert!(!released.load(Ordering::SeqCst));

        drop(guard);
        assert!(released.load(Ordering::SeqCst));
        assert!(dirty.load(Ordering::SeqCst));

        let mut read_data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut read_data);
        assert_eq!(read_data[0], 42);
    }
}
