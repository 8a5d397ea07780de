use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::buffer::BufferPoolError;
use crate::storage::page::PageError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Page {0} does not hold a valid tree node")]
    InvalidPageFormat(PageId),

    #[error("{0} entries of this key type do not fit in a page")]
    NodeCapacityExceeded(u32),

    #[error("Tree structure corrupted: {0}")]
    Corrupted(String),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),

    #[error("Header page error: {0}")]
    HeaderError(#[from] PageError),
}
