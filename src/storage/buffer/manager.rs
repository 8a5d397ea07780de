use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use parking_lot::Mutex;
use anyhow::Result;

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;

/// Per-frame bookkeeping, owned by the pool and mutated only under its mutex.
/// Pin count and dirty flag deliberately live here rather than on `Page`:
/// the page's own lock is the page latch, and latch holders must never race
/// the pool over metadata.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.pin_count = 0;
        self.is_dirty = false;
    }
}

struct PoolInner {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    meta: Vec<FrameMeta>,
}

/// Bounded page cache arbitrating all disk I/O.
///
/// Invariants:
/// - a page ID maps to at most one frame;
/// - every frame is free-listed, or mapped and pinned, or mapped and a
///   replacer candidate;
/// - a frame returned by `fetch_page`/`new_page` has `pin_count == 1` and is
///   not a replacer candidate.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<PagePtr>,
    inner: Mutex<PoolInner>,
    replacer: LruReplacer,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, disk_manager))
    }

    pub fn with_disk_manager(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut meta = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for frame_id in 0..pool_size {
            frames.push(Arc::new(parking_lot::RwLock::new(Page::new(INVALID_PAGE_ID))));
            meta.push(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
                meta,
            }),
            replacer: LruReplacer::new(pool_size),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Fetch a page, reading it from disk if it is not resident.
    /// The returned page is pinned; every successful fetch must be paired
    /// with exactly one `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            if inner.meta[frame_id].pin_count == 0 {
                self.replacer.pin(frame_id);
            }
            inner.meta[frame_id].pin_count += 1;
            return Ok(self.frames[frame_id].clone());
        }

        let frame_id = self.allocate_frame(&mut inner)?;

        {
            let mut page = self.frames[frame_id].write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page) {
                // Frame stays usable: hand it back before surfacing the error
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }

        inner.meta[frame_id].page_id = page_id;
        inner.meta[frame_id].pin_count = 1;
        inner.meta[frame_id].is_dirty = false;
        inner.page_table.insert(page_id, frame_id);

        Ok(self.frames[frame_id].clone())
    }

    /// Allocate a fresh page on disk and pin it in a zeroed frame
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = self.allocate_frame(&mut inner)?;

        let page_id = match self.disk_manager.allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
        };

        {
            let mut page = self.frames[frame_id].write();
            page.reset();
            page.page_id = page_id;
        }

        inner.meta[frame_id].page_id = page_id;
        inner.meta[frame_id].pin_count = 1;
        inner.meta[frame_id].is_dirty = false;
        inner.page_table.insert(page_id, frame_id);

        Ok((self.frames[frame_id].clone(), page_id))
    }

    /// Drop one pin on a page, marking it dirty if the caller modified it.
    /// When the pin count reaches zero the frame becomes an eviction candidate.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let meta = &mut inner.meta[frame_id];
        meta.is_dirty |= is_dirty;

        if meta.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a page to disk regardless of its dirty bit, then clear the bit.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        // Pin first so the frame cannot be evicted while the pool mutex is
        // released; blocking on the page latch under the mutex would deadlock
        // against a latch holder waiting on the pool.
        let ptr = {
            let mut inner = self.inner.lock();
            let frame_id = match inner.page_table.get(&page_id) {
                Some(&frame_id) => frame_id,
                None => return Err(BufferPoolError::PageNotFound(page_id)),
            };
            if inner.meta[frame_id].pin_count == 0 {
                self.replacer.pin(frame_id);
            }
            inner.meta[frame_id].pin_count += 1;
            self.frames[frame_id].clone()
        };

        let result = {
            let page = ptr.read();
            let write_result = self.disk_manager.write_page(&page);
            if write_result.is_ok() {
                // Still under the read latch: no writer can slip in between
                // the disk write and the dirty-bit clear
                let mut inner = self.inner.lock();
                if let Some(&frame_id) = inner.page_table.get(&page_id) {
                    inner.meta[frame_id].is_dirty = false;
                }
            }
            write_result
        };

        self.unpin_page(page_id, false)?;
        result.map_err(Into::into)
    }

    /// Flush every resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let page_ids: Vec<PageId> = {
            let inner = self.inner.lock();
            inner.page_table.keys().copied().collect()
        };

        for page_id in page_ids {
            match self.flush_page(page_id) {
                Ok(()) | Err(BufferPoolError::PageNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Remove a page from the pool and hand it back to the disk allocator.
    /// Succeeds trivially when the page is not resident; fails while pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(()),
        };

        if inner.meta[frame_id].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        self.frames[frame_id].write().reset();
        inner.meta[frame_id].reset();
        inner.page_table.remove(&page_id);
        self.replacer.pin(frame_id);
        inner.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);

        Ok(())
    }

    /// Current pin count of a resident page (`None` if not resident)
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| inner.meta[frame_id].pin_count)
    }

    /// Take a frame from the free list, or evict the LRU victim. A dirty
    /// victim is written back first. The caller installs new metadata.
    fn allocate_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = match self.replacer.victim() {
            Some(frame_id) => frame_id,
            None => return Err(BufferPoolError::PoolExhausted),
        };

        let victim_pid = inner.meta[frame_id].page_id;
        debug_assert_eq!(inner.meta[frame_id].pin_count, 0);

        if inner.meta[frame_id].is_dirty {
            // pin_count == 0 means no latch holder; safe under the pool mutex
            let page = self.frames[frame_id].read();
            if let Err(e) = self.disk_manager.write_page(&page) {
                // Victim keeps its data; put it back on the candidate list
                self.replacer.unpin(frame_id);
                return Err(e.into());
            }
        }

        inner.page_table.remove(&victim_pid);
        inner.meta[frame_id].reset();
        Ok(frame_id)
    }
}
