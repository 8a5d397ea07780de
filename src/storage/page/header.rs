use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};
use crate::storage::page::error::PageError;

// Record layout, little-endian:
//   record count: u32 at offset 0
//   records of RECORD_SIZE bytes: name (zero-padded) + root page id (u32)
const COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const MAX_NAME_LEN: usize = 32;
const RECORD_SIZE: usize = MAX_NAME_LEN + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// Codec for the index directory page: a flat table of
/// `(index name -> root page id)` records. The page is rewritten through the
/// buffer pool every time an index's root moves.
pub struct HeaderPage;

impl HeaderPage {
    /// Initialize an empty header on a zeroed page
    pub fn init(page: &mut Page) {
        page.data[..RECORDS_OFFSET + 4].fill(0);
        LittleEndian::write_u32(&mut page.data[COUNT_OFFSET..COUNT_OFFSET + 4], 0);
    }

    pub fn record_count(page: &Page) -> usize {
        LittleEndian::read_u32(&page.data[COUNT_OFFSET..COUNT_OFFSET + 4]) as usize
    }

    /// Register a new index. Fails if the name is taken or the page is full.
    pub fn insert_record(page: &mut Page, name: &str, root: PageId) -> Result<(), PageError> {
        if name.len() > MAX_NAME_LEN {
            return Err(PageError::NameTooLong(name.to_string()));
        }
        if Self::find(page, name).is_some() {
            return Err(PageError::RecordExists(name.to_string()));
        }
        let count = Self::record_count(page);
        if count >= MAX_RECORDS {
            return Err(PageError::PageFull);
        }

        let offset = RECORDS_OFFSET + count * RECORD_SIZE;
        page.data[offset..offset + MAX_NAME_LEN].fill(0);
        page.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_u32(
            &mut page.data[offset + MAX_NAME_LEN..offset + RECORD_SIZE],
            root,
        );
        LittleEndian::write_u32(
            &mut page.data[COUNT_OFFSET..COUNT_OFFSET + 4],
            (count + 1) as u32,
        );
        Ok(())
    }

    /// Point an existing index at a new root page
    pub fn update_record(page: &mut Page, name: &str, root: PageId) -> Result<(), PageError> {
        match Self::find(page, name) {
            Some(slot) => {
                let offset = RECORDS_OFFSET + slot * RECORD_SIZE;
                LittleEndian::write_u32(
                    &mut page.data[offset + MAX_NAME_LEN..offset + RECORD_SIZE],
                    root,
                );
                Ok(())
            }
            None => Err(PageError::RecordNotFound(name.to_string())),
        }
    }

    /// Look up the persisted root page ID of an index
    pub fn get_root(page: &Page, name: &str) -> Option<PageId> {
        Self::find(page, name).map(|slot| {
            let offset = RECORDS_OFFSET + slot * RECORD_SIZE;
            LittleEndian::read_u32(&page.data[offset + MAX_NAME_LEN..offset + RECORD_SIZE])
        })
    }

    fn find(page: &Page, name: &str) -> Option<usize> {
        if name.len() > MAX_NAME_LEN {
            return None;
        }
        let count = Self::record_count(page);
        (0..count).find(|&slot| {
            let offset = RECORDS_OFFSET + slot * RECORD_SIZE;
            let stored = &page.data[offset..offset + MAX_NAME_LEN];
            let len = stored.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
            &stored[..len] == name.as_bytes()
        })
    }
}
