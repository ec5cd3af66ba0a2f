use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::common::{FrameId, LarchError, PageId, Result, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{AccessType, FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// Internal state shared with guard release callbacks
struct BufferPoolState {
    /// The buffer pool frames
    frames: Vec<Arc<FrameHeader>>,
    /// Page table: maps resident page IDs to frame IDs
    page_table: Mutex<HashMap<PageId, FrameId>>,
    /// Frames not currently holding any page
    free_list: Mutex<VecDeque<FrameId>>,
    /// LRU-K replacer for eviction decisions
    replacer: LruKReplacer,
}

/// BufferPoolManager fetches database pages from disk and caches them in a
/// fixed set of in-memory frames, evicting by LRU-K when the pool is full.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// Shared state
    state: Arc<BufferPoolState>,
    /// Disk scheduler for I/O
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size, k value for
    /// LRU-K, and disk manager.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(BufferPoolState {
            frames,
            page_table: Mutex::new(HashMap::new()),
            free_list: Mutex::new(free_list),
            replacer: LruKReplacer::new(k, pool_size),
        });

        Self {
            pool_size,
            state,
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Allocates a new page on disk and installs it in a frame.
    /// The page starts out unpinned; acquire a guard to use it.
    pub fn new_page(&self) -> Result<PageId> {
        let mut page_table = self.state.page_table.lock();
        let frame_id = self.acquire_frame(&mut page_table)?;
        let frame = &self.state.frames[frame_id.as_usize()];

        let page_id = self.disk_scheduler.disk_manager().allocate_page()?;

        frame.reset();
        frame.set_page_id(page_id);

        page_table.insert(page_id, frame_id);

        self.state.replacer.record_access(frame_id, AccessType::Unknown);
        self.state.replacer.set_evictable(frame_id, true);

        trace!("allocated {} in {}", page_id, frame_id);
        Ok(page_id)
    }

    /// Drops a page from the buffer pool and deallocates it on disk.
    /// Returns false if the page was not resident.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut page_table = self.state.page_table.lock();

        if let Some(frame_id) = page_table.remove(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];

            if frame.pin_count() > 0 {
                page_table.insert(page_id, frame_id);
                return Err(LarchError::PageStillPinned(page_id));
            }

            frame.reset();
            self.state.replacer.remove(frame_id);
            self.state.free_list.lock().push_back(frame_id);

            self.disk_scheduler.disk_manager().deallocate_page(page_id)?;

            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Fetches a page and returns a shared read guard for it.
    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.pin_page(page_id)?;
        let state = Arc::clone(&self.state);

        let guard = unsafe {
            ReadPageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, is_dirty| Self::release_page(&state, pid, is_dirty)),
            )
        };

        Ok(guard)
    }

    /// Fetches a page and returns an exclusive write guard for it.
    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.pin_page(page_id)?;
        let state = Arc::clone(&self.state);

        let guard = unsafe {
            WritePageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, is_dirty| Self::release_page(&state, pid, is_dirty)),
            )
        };

        Ok(guard)
    }

    /// Guard release path: transfer the dirty bit, unpin, and mark the frame
    /// evictable once nothing references it.
    fn release_page(state: &BufferPoolState, page_id: PageId, is_dirty: bool) {
        let page_table = state.page_table.lock();
        if let Some(&frame_id) = page_table.get(&page_id) {
            let frame = &state.frames[frame_id.as_usize()];
            if is_dirty {
                frame.set_dirty(true);
            }
            if let Some(0) = frame.unpin() {
                state.replacer.set_evictable(frame_id, true);
            }
        }
    }

    /// Flushes a specific page to disk and clears its dirty bit.
    /// Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(LarchError::InvalidPageId(page_id));
        }

        let page_table = self.state.page_table.lock();

        if let Some(&frame_id) = page_table.get(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];

            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);

            self.disk_scheduler.schedule_write_sync(page_id, &data)?;
            frame.set_dirty(false);

            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Flushes every dirty resident page to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let page_table = self.state.page_table.lock();

        for (&page_id, &frame_id) in page_table.iter() {
            let frame = &self.state.frames[frame_id.as_usize()];

            if frame.is_dirty() {
                let mut data = [0u8; PAGE_SIZE];
                frame.copy_to(&mut data);

                self.disk_scheduler.schedule_write_sync(page_id, &data)?;
                frame.set_dirty(false);
            }
        }

        Ok(())
    }

    /// Returns the pin count for a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let page_table = self.state.page_table.lock();

        page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.free_list.lock().len()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    /// Pins the frame holding `page_id`, reading the page in from disk (and
    /// evicting a victim) if it is not resident. The page table lock is held
    /// across the whole miss path so that a concurrent eviction cannot grab
    /// a frame between lookup and pin.
    fn pin_page(&self, page_id: PageId) -> Result<Arc<FrameHeader>> {
        if page_id == INVALID_PAGE_ID {
            return Err(LarchError::InvalidPageId(page_id));
        }

        let mut page_table = self.state.page_table.lock();

        // Fast path: already resident
        if let Some(&frame_id) = page_table.get(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];
            frame.pin();
            self.state.replacer.record_access(frame_id, AccessType::Unknown);
            self.state.replacer.set_evictable(frame_id, false);
            return Ok(Arc::clone(frame));
        }

        // Miss: bring the page in from disk
        let frame_id = self.acquire_frame(&mut page_table)?;
        let frame = &self.state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        self.disk_scheduler.schedule_read_sync(page_id, &mut data)?;

        frame.set_page_id(page_id);
        frame.copy_from(&data);
        frame.set_dirty(false);
        frame.pin();

        page_table.insert(page_id, frame_id);

        self.state.replacer.record_access(frame_id, AccessType::Unknown);
        self.state.replacer.set_evictable(frame_id, false);

        Ok(Arc::clone(frame))
    }

    /// Gets a usable frame, either from the free list or by evicting.
    /// Called with the page table locked; evicted pages leave the table
    /// before the lock is released.
    fn acquire_frame(&self, page_table: &mut HashMap<PageId, FrameId>) -> Result<FrameId> {
        {
            let mut free_list = self.state.free_list.lock();
            if let Some(frame_id) = free_list.pop_front() {
                return Ok(frame_id);
            }
        }

        if let Some(frame_id) = self.state.replacer.evict() {
            let frame = &self.state.frames[frame_id.as_usize()];
            let old_page_id = frame.page_id();

            if frame.is_dirty() {
                debug!("evicting dirty {} from {}", old_page_id, frame_id);
                let mut data = [0u8; PAGE_SIZE];
                frame.copy_to(&mut data);
                self.disk_scheduler.schedule_write_sync(old_page_id, &data)?;
            }

            page_table.remove(&old_page_id);
            frame.reset();

            Ok(frame_id)
        } else {
            Err(LarchError::BufferPoolFull)
        }
    }
}
