use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{BirchError, FrameId, PageId, Result, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{AccessType, FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// Page table and free list. Kept under one mutex so a page lookup and the
/// subsequent miss handling are atomic with respect to other fetches.
struct PoolInner {
    /// Maps page IDs to frame IDs
    page_table: HashMap<PageId, FrameId>,
    /// Frames that are not currently holding any page
    free_list: VecDeque<FrameId>,
}

/// State shared with page-guard release callbacks
struct BufferPoolState {
    /// The buffer pool frames
    frames: Vec<Arc<FrameHeader>>,
    /// Page table and free list
    inner: Mutex<PoolInner>,
    /// LRU-K replacer for eviction decisions
    replacer: LruKReplacer,
}

/// BufferPoolManager caches disk pages in a fixed number of in-memory
/// frames. Callers access pages through RAII guards that pin the frame and
/// hold its latch; the LRU-K replacement policy decides which unpinned frame
/// to spill when the pool is full.
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
        let mut free_list = VecDeque::new();

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(BufferPoolState {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
            }),
            replacer: LruKReplacer::new(k, pool_size),
        });

        Self {
            pool_size,
            state,
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Allocates a new page and brings it into the buffer pool.
    /// The returned page id has never been handed out before. The page is
    /// not pinned until a guard is acquired for it.
    pub fn new_page(&self) -> Result<PageId> {
        let mut inner = self.state.inner.lock();
        let frame_id = self.take_free_frame(&mut inner)?;
        let frame = &self.state.frames[frame_id.as_usize()];

        let page_id = self.disk_scheduler.disk_manager().allocate_page()?;

        frame.reset();
        frame.set_page_id(page_id);

        inner.page_table.insert(page_id, frame_id);

        self.state.replacer.record_access(frame_id, AccessType::Unknown);
        self.state.replacer.set_evictable(frame_id, true);

        Ok(page_id)
    }

    /// Drops a page from the buffer pool, freeing its frame.
    /// Returns false if the page is not resident; errors if it is pinned.
    /// The page id is never reused.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.state.inner.lock();

        if let Some(frame_id) = inner.page_table.remove(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];

            if frame.pin_count() > 0 {
                inner.page_table.insert(page_id, frame_id);
                return Err(BirchError::PageStillPinned(page_id));
            }

            // A concurrent guard release may have unpinned the frame without
            // having flipped it evictable yet; force the flag so the history
            // removal below cannot trip its precondition.
            self.state.replacer.set_evictable(frame_id, true);
            self.state.replacer.remove(frame_id);

            frame.reset();
            inner.free_list.push_back(frame_id);

            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Acquires a shared (read) guard on the given page, fetching it from
    /// disk if necessary. Blocks while the page is write-latched.
    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        if page_id == INVALID_PAGE_ID {
            return Err(BirchError::InvalidPageId(page_id));
        }

        let frame_id = self.fetch_page(page_id)?;
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        let state = Arc::clone(&self.state);

        let guard = unsafe {
            ReadPageGuard::new(
                page_id,
                frame,
                Box::new(move |is_dirty| {
                    let frm = &state.frames[frame_id.as_usize()];
                    if is_dirty {
                        frm.set_dirty(true);
                    }
                    if let Some(0) = frm.unpin() {
                        state.replacer.set_evictable(frame_id, true);
                    }
                }),
            )
        };

        Ok(guard)
    }

    /// Acquires an exclusive (write) guard on the given page, fetching it
    /// from disk if necessary. Blocks while any other guard is held.
    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        if page_id == INVALID_PAGE_ID {
            return Err(BirchError::InvalidPageId(page_id));
        }

        let frame_id = self.fetch_page(page_id)?;
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        let state = Arc::clone(&self.state);

        let guard = unsafe {
            WritePageGuard::new(
                page_id,
                frame,
                Box::new(move |is_dirty| {
                    let frm = &state.frames[frame_id.as_usize()];
                    if is_dirty {
                        frm.set_dirty(true);
                    }
                    if let Some(0) = frm.unpin() {
                        state.replacer.set_evictable(frame_id, true);
                    }
                }),
            )
        };

        Ok(guard)
    }

    /// Flushes a specific page to disk, clearing its dirty flag.
    /// Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(BirchError::InvalidPageId(page_id));
        }

        // Snapshot the frame under the pool mutex, but copy its data
        // outside of it: copying waits on the frame latch, and a writer
        // holding that latch may itself be waiting on the pool mutex.
        let frame = {
            let inner = self.state.inner.lock();
            match inner.page_table.get(&page_id) {
                Some(&frame_id) => Arc::clone(&self.state.frames[frame_id.as_usize()]),
                None => return Ok(false),
            }
        };

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        if frame.page_id() != page_id {
            // Evicted and remapped while we copied; eviction flushed it.
            return Ok(false);
        }

        self.disk_scheduler.schedule_write_sync(page_id, &data)?;
        frame.set_dirty(false);
        Ok(true)
    }

    /// Flushes all dirty pages in the buffer pool to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let resident: Vec<(PageId, Arc<FrameHeader>)> = {
            let inner = self.state.inner.lock();
            inner
                .page_table
                .iter()
                .map(|(&page_id, &frame_id)| {
                    (page_id, Arc::clone(&self.state.frames[frame_id.as_usize()]))
                })
                .collect()
        };

        for (page_id, frame) in resident {
            if !frame.is_dirty() {
                continue;
            }
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            if frame.page_id() != page_id {
                continue;
            }
            self.disk_scheduler.schedule_write_sync(page_id, &data)?;
            frame.set_dirty(false);
        }

        Ok(())
    }

    /// Returns the pin count for a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.state.inner.lock();

        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    /// Returns the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.state.inner.lock().free_list.len()
    }

    /// Returns the underlying disk manager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    /// Pins the frame holding `page_id`, loading the page from disk (and
    /// possibly evicting a victim) on a miss. Runs entirely under the pool
    /// mutex so that no two frames ever hold the same page.
    fn fetch_page(&self, page_id: PageId) -> Result<FrameId> {
        let mut inner = self.state.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];
            frame.pin();
            self.state.replacer.record_access(frame_id, AccessType::Unknown);
            self.state.replacer.set_evictable(frame_id, false);
            return Ok(frame_id);
        }

        let frame_id = self.take_free_frame(&mut inner)?;
        let frame = &self.state.frames[frame_id.as_usize()];

        let data = self.disk_scheduler.schedule_read_sync(page_id)?;

        frame.set_page_id(page_id);
        frame.copy_from(&data[..]);
        frame.set_dirty(false);
        frame.pin();

        inner.page_table.insert(page_id, frame_id);

        self.state.replacer.record_access(frame_id, AccessType::Unknown);
        self.state.replacer.set_evictable(frame_id, false);

        Ok(frame_id)
    }

    /// Produces an empty frame, either from the free list or by evicting a
    /// victim chosen by the replacer. Caller must hold the pool mutex.
    fn take_free_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        if let Some(frame_id) = self.state.replacer.evict() {
            let frame = &self.state.frames[frame_id.as_usize()];
            let old_page_id = frame.page_id();

            if frame.is_dirty() {
                let mut data = [0u8; PAGE_SIZE];
                frame.copy_to(&mut data);
                self.disk_scheduler.schedule_write_sync(old_page_id, &data)?;
            }

            debug!(page_id = old_page_id.as_u32(), frame_id = frame_id.as_u32(), "bufferpool.evict");

            inner.page_table.remove(&old_page_id);
            frame.reset();

            Ok(frame_id)
        } else {
            Err(BirchError::BufferPoolFull)
        }
    }
}
