use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use parking_lot::{ArcRwLockReadGuard, Mutex, RawRwLock};
use anyhow::Result;

use crate::common::types::{Page, PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::latch::WriteSet;
use crate::index::btree::node::{BTreeNode, NodeType};
use crate::index::btree::serialization::{deserialize_node, max_entries_for, write_parent_page_id};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::page::HeaderPage;

/// Page backing the index directory on a fresh database file
const HEADER_PAGE_ID: PageId = 1;

/// Backoff before a descent retries after losing the root race
const ROOT_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Which structural change a write descent must guard against
#[derive(Clone, Copy)]
pub(crate) enum TreeOp {
    Insert,
    Remove,
}

pub(crate) enum LeafSearch<'k, K> {
    Leftmost,
    Key(&'k K),
}

/// A leaf reached by a read descent, still pinned and read-latched
pub(crate) struct LeafRead<K> {
    pub page_id: PageId,
    pub guard: ArcRwLockReadGuard<RawRwLock, Page>,
    pub node: BTreeNode<K>,
}

enum ReadDescent<K> {
    Found(LeafRead<K>),
    Empty,
    RootMoved,
}

enum WriteDescent<'a> {
    Found(WriteSet<'a>),
    Empty,
    RootMoved,
}

/// Disk-resident B+Tree with unique keys. Nodes live in buffer-pool pages;
/// concurrent access uses latch crabbing over the per-page rwlocks.
pub struct BPlusTree<K> {
    index_name: String,
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    /// Guards every root transition. The header page record is rewritten
    /// before this lock is released.
    pub(crate) root_page_id: Mutex<PageId>,
    header_page_id: PageId,
    pub(crate) leaf_max_size: u32,
    pub(crate) internal_max_size: u32,
    _phantom: PhantomData<K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Open (or register) the named index. On a fresh database file this
    /// claims page 1 for the index directory; on an existing file the
    /// persisted root is recovered from it.
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self, BTreeError> {
        let index_name = index_name.into();

        if leaf_max_size < 3 || leaf_max_size > max_entries_for::<K>(NodeType::Leaf) {
            return Err(BTreeError::NodeCapacityExceeded(leaf_max_size));
        }
        if internal_max_size < 3 || internal_max_size > max_entries_for::<K>(NodeType::Internal) {
            return Err(BTreeError::NodeCapacityExceeded(internal_max_size));
        }

        let fresh = buffer_pool
            .disk_manager()
            .num_pages()
            .map_err(BufferPoolError::from)?
            == 0;
        let header_page_id = if fresh {
            let (page, page_id) = buffer_pool.new_page()?;
            HeaderPage::init(&mut page.write());
            buffer_pool.unpin_page(page_id, true)?;
            debug_assert_eq!(page_id, HEADER_PAGE_ID);
            page_id
        } else {
            HEADER_PAGE_ID
        };

        let header = buffer_pool.fetch_page(header_page_id)?;
        let root_page_id = match HeaderPage::get_root(&header.read(), &index_name) {
            Some(root) => {
                buffer_pool.unpin_page(header_page_id, false)?;
                root
            }
            None => {
                let inserted =
                    HeaderPage::insert_record(&mut header.write(), &index_name, INVALID_PAGE_ID);
                buffer_pool.unpin_page(header_page_id, inserted.is_ok())?;
                inserted?;
                INVALID_PAGE_ID
            }
        };

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: Mutex::new(root_page_id),
            header_page_id,
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.lock() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.lock()
    }

    /// Root page ID as recorded on the header page
    pub fn persisted_root(&self) -> Result<Option<PageId>, BTreeError> {
        let header = self.buffer_pool.fetch_page(self.header_page_id)?;
        let root = HeaderPage::get_root(&header.read(), &self.index_name);
        self.buffer_pool.unpin_page(self.header_page_id, false)?;
        Ok(root)
    }

    /// Point lookup
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        match self.find_leaf_read(LeafSearch::Key(key))? {
            None => Ok(None),
            Some(leaf) => {
                let result = leaf.node.lookup(key);
                drop(leaf.guard);
                self.buffer_pool.unpin_page(leaf.page_id, false)?;
                Ok(result)
            }
        }
    }

    /// Rewrite the header record for this index. Callers hold the root
    /// mutex across the update.
    pub(crate) fn update_root_record(&self, root: PageId) -> Result<(), BTreeError> {
        let header = self.buffer_pool.fetch_page(self.header_page_id)?;
        let updated = HeaderPage::update_record(&mut header.write(), &self.index_name, root);
        self.buffer_pool.unpin_page(self.header_page_id, updated.is_ok())?;
        updated?;
        Ok(())
    }

    /// Repoint a child node at a new parent. Goes through the latch set
    /// when the child is already held by this descent; otherwise takes the
    /// child's latch briefly.
    pub(crate) fn set_parent(
        &self,
        ws: &mut WriteSet<'_>,
        child: PageId,
        parent: PageId,
    ) -> Result<(), BTreeError> {
        if let Some(page) = ws.page_mut(child) {
            write_parent_page_id(page, parent);
            return Ok(());
        }
        let ptr = self.buffer_pool.fetch_page(child)?;
        write_parent_page_id(&mut ptr.write(), parent);
        self.buffer_pool.unpin_page(child, true)?;
        Ok(())
    }

    pub(crate) fn discard_page(&self, page_id: PageId) {
        match self.buffer_pool.delete_page(page_id) {
            Ok(()) => {}
            Err(BufferPoolError::PagePinned(_)) => {
                // A late reader still holds a pin; it will re-descend once
                // it sees the structure moved on
                log::debug!("page {} still pinned, not reclaimed", page_id);
            }
            Err(e) => log::error!("failed to delete page {}: {}", page_id, e),
        }
    }

    fn unpin_quietly(&self, page_id: PageId) {
        if let Err(e) = self.buffer_pool.unpin_page(page_id, false) {
            log::error!("failed to unpin page {}: {}", page_id, e);
        }
    }

    /// Read-crabbing descent: latch the child, then release the parent.
    /// Restarts (with a short sleep) when the root moves between reading
    /// `root_page_id` and latching the presumed root.
    pub(crate) fn find_leaf_read(
        &self,
        target: LeafSearch<'_, K>,
    ) -> Result<Option<LeafRead<K>>, BTreeError> {
        loop {
            match self.try_find_leaf_read(&target)? {
                ReadDescent::Found(leaf) => return Ok(Some(leaf)),
                ReadDescent::Empty => return Ok(None),
                ReadDescent::RootMoved => {
                    log::trace!("root moved during read descent, retrying");
                    thread::sleep(ROOT_RETRY_BACKOFF);
                }
            }
        }
    }

    fn try_find_leaf_read(&self, target: &LeafSearch<'_, K>) -> Result<ReadDescent<K>, BTreeError> {
        let mut page_id = *self.root_page_id.lock();
        if page_id == INVALID_PAGE_ID {
            return Ok(ReadDescent::Empty);
        }

        let mut held: Option<(PageId, ArcRwLockReadGuard<RawRwLock, Page>)> = None;
        let mut first = true;
        loop {
            let ptr = match self.buffer_pool.fetch_page(page_id) {
                Ok(ptr) => ptr,
                Err(e) => {
                    if let Some((parent_id, parent_guard)) = held.take() {
                        drop(parent_guard);
                        self.unpin_quietly(parent_id);
                    }
                    return Err(e.into());
                }
            };
            let guard = ptr.read_arc();

            if first {
                first = false;
                if *self.root_page_id.lock() != page_id {
                    drop(guard);
                    self.unpin_quietly(page_id);
                    return Ok(ReadDescent::RootMoved);
                }
            }

            let node = match deserialize_node::<K>(&guard) {
                Ok(node) => node,
                Err(e) => {
                    drop(guard);
                    self.unpin_quietly(page_id);
                    if let Some((parent_id, parent_guard)) = held.take() {
                        drop(parent_guard);
                        self.unpin_quietly(parent_id);
                    }
                    return Err(e);
                }
            };

            if let Some((parent_id, parent_guard)) = held.take() {
                drop(parent_guard);
                self.unpin_quietly(parent_id);
            }

            if node.is_leaf() {
                return Ok(ReadDescent::Found(LeafRead {
                    page_id,
                    guard,
                    node,
                }));
            }

            let next = match target {
                LeafSearch::Leftmost => node.children[0],
                LeafSearch::Key(key) => node.child_for(key),
            };
            held = Some((page_id, guard));
            page_id = next;
        }
    }

    /// Write-crabbing descent. Every node on the path is write-latched and
    /// recorded; once a safe node is latched the retained ancestors are
    /// released. Returns `None` on an empty tree.
    pub(crate) fn find_leaf_write(
        &self,
        key: &K,
        op: TreeOp,
    ) -> Result<Option<WriteSet<'_>>, BTreeError> {
        loop {
            match self.try_find_leaf_write(key, op)? {
                WriteDescent::Found(ws) => return Ok(Some(ws)),
                WriteDescent::Empty => return Ok(None),
                WriteDescent::RootMoved => {
                    log::trace!("root moved during write descent, retrying");
                    thread::sleep(ROOT_RETRY_BACKOFF);
                }
            }
        }
    }

    fn try_find_leaf_write(&self, key: &K, op: TreeOp) -> Result<WriteDescent<'_>, BTreeError> {
        let mut page_id = *self.root_page_id.lock();
        if page_id == INVALID_PAGE_ID {
            return Ok(WriteDescent::Empty);
        }

        let mut ws = WriteSet::new(&self.buffer_pool);
        let mut first = true;
        loop {
            let ptr = self.buffer_pool.fetch_page(page_id)?;
            let guard = ptr.write_arc();

            if first {
                first = false;
                if *self.root_page_id.lock() != page_id {
                    drop(guard);
                    self.unpin_quietly(page_id);
                    return Ok(WriteDescent::RootMoved);
                }
            }

            let node = match deserialize_node::<K>(&guard) {
                Ok(node) => node,
                Err(e) => {
                    drop(guard);
                    self.unpin_quietly(page_id);
                    return Err(e);
                }
            };

            // A safe node confines the structural change below it; the
            // ancestors can go.
            let safe = match op {
                TreeOp::Insert => node.size() < (node.max_size as usize).saturating_sub(2),
                TreeOp::Remove => node.size() > node.min_size(),
            };
            if safe {
                ws.release_all(false);
            }

            let child = if node.is_leaf() {
                None
            } else {
                Some(node.child_for(key))
            };
            ws.push(page_id, guard);

            match child {
                None => return Ok(WriteDescent::Found(ws)),
                Some(child) => page_id = child,
            }
        }
    }
}
