use parking_lot::{ArcRwLockWriteGuard, RawRwLock};

use crate::common::types::{Page, PageId};
use crate::storage::buffer::BufferPoolManager;

/// A page held under an owned write latch during a crabbing descent
pub(crate) struct LatchedPage {
    pub page_id: PageId,
    pub guard: ArcRwLockWriteGuard<RawRwLock, Page>,
}

/// The ordered set of write-latched pages an insert or remove carries from
/// the root toward the leaf. The back is the deepest node; once a safe node
/// is latched, the ancestor prefix is released.
///
/// Structural changes reach back into retained ancestors through
/// `page_mut`, so a thread never re-latches a page it already holds.
/// Dropping the set releases every remaining latch and pin (clean), which
/// keeps the pin/unpin discipline exact on error paths.
pub(crate) struct WriteSet<'a> {
    pool: &'a BufferPoolManager,
    pages: Vec<LatchedPage>,
}

impl<'a> WriteSet<'a> {
    pub fn new(pool: &'a BufferPoolManager) -> Self {
        Self {
            pool,
            pages: Vec::new(),
        }
    }

    pub fn push(&mut self, page_id: PageId, guard: ArcRwLockWriteGuard<RawRwLock, Page>) {
        self.pages.push(LatchedPage { page_id, guard });
    }

    pub fn last_page_id(&self) -> Option<PageId> {
        self.pages.last().map(|p| p.page_id)
    }

    /// Mutable access to a retained page's bytes
    pub fn page_mut(&mut self, page_id: PageId) -> Option<&mut Page> {
        self.pages
            .iter_mut()
            .find(|p| p.page_id == page_id)
            .map(|p| &mut *p.guard)
    }

    /// Unlatch and unpin every held page, marking each dirty or clean
    pub fn release_all(&mut self, is_dirty: bool) {
        for latched in self.pages.drain(..) {
            let page_id = latched.page_id;
            drop(latched.guard);
            // The pin is ours by construction; a failure here is a leak in
            // the pool itself
            if let Err(e) = self.pool.unpin_page(page_id, is_dirty) {
                log::error!("failed to unpin page {} from latch set: {}", page_id, e);
            }
        }
    }

    /// Release one specific page (used before a merged-away page is deleted)
    pub fn release_page(&mut self, page_id: PageId, is_dirty: bool) {
        if let Some(idx) = self.pages.iter().position(|p| p.page_id == page_id) {
            let latched = self.pages.remove(idx);
            drop(latched.guard);
            if let Err(e) = self.pool.unpin_page(page_id, is_dirty) {
                log::error!("failed to unpin page {} from latch set: {}", page_id, e);
            }
        }
    }
}

impl Drop for WriteSet<'_> {
    fn drop(&mut self) {
        self.release_all(false);
    }
}
