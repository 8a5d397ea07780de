use anyhow::Result;

use kestreldb::common::types::PAGE_SIZE;
use kestreldb::BufferPoolError;

mod common;
use common::create_test_buffer_pool;

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;
    assert!(page_id > 0);

    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
        assert!(page_guard.data.iter().all(|&b| b == 0));
    }
    assert_eq!(buffer_pool.pin_count(page_id), Some(1));

    buffer_pool.unpin_page(page_id, false)?;
    assert_eq!(buffer_pool.pin_count(page_id), Some(0));

    Ok(())
}

#[test]
fn test_fetch_pins_resident_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false)?;

    let fetched = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched.read();
        assert_eq!(page_guard.page_id, page_id);
    }
    assert_eq!(buffer_pool.pin_count(page_id), Some(1));

    // Two pins, two unpins
    let _second = buffer_pool.fetch_page(page_id)?;
    assert_eq!(buffer_pool.pin_count(page_id), Some(2));
    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.unpin_page(page_id, false)?;
    assert_eq!(buffer_pool.pin_count(page_id), Some(0));

    Ok(())
}

#[test]
fn test_lru_eviction_order() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    // Fill the pool and unpin everything clean
    let (_, p0) = buffer_pool.new_page()?;
    let (_, p1) = buffer_pool.new_page()?;
    let (_, p2) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(p0, false)?;
    buffer_pool.unpin_page(p1, false)?;
    buffer_pool.unpin_page(p2, false)?;

    // p0 is the LRU victim for the next allocation
    let (_, p3) = buffer_pool.new_page()?;
    assert_eq!(buffer_pool.pin_count(p0), None);
    assert_eq!(buffer_pool.pin_count(p3), Some(1));

    // Re-fetching p0 evicts p1 (now at the back)
    let fetched = buffer_pool.fetch_page(p0)?;
    assert_eq!(buffer_pool.pin_count(p1), None);

    // p1 was never dirtied, so it reads back zeroed
    {
        let page_guard = fetched.read();
        assert!(page_guard.data.iter().all(|&b| b == 0));
    }
    buffer_pool.unpin_page(p0, false)?;

    let p1_again = buffer_pool.fetch_page(p1)?;
    {
        let page_guard = p1_again.read();
        assert_eq!(page_guard.page_id, p1);
        assert!(page_guard.data.iter().all(|&b| b == 0));
    }
    buffer_pool.unpin_page(p1, false)?;
    buffer_pool.unpin_page(p3, false)?;

    Ok(())
}

#[test]
fn test_dirty_page_written_back_on_eviction() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (page, p0) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data.fill(0xAB);
    }
    buffer_pool.unpin_page(p0, true)?;

    // Cycle enough pages through the pool to evict p0
    for _ in 0..3 {
        let (_, pid) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(pid, false)?;
    }
    assert_eq!(buffer_pool.pin_count(p0), None);

    let fetched = buffer_pool.fetch_page(p0)?;
    {
        let page_guard = fetched.read();
        assert_eq!(page_guard.data, [0xAB; PAGE_SIZE]);
    }
    buffer_pool.unpin_page(p0, false)?;

    Ok(())
}

#[test]
fn test_pool_exhausted_when_all_pinned() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let mut pinned = Vec::new();
    for _ in 0..3 {
        let (_, pid) = buffer_pool.new_page()?;
        pinned.push(pid);
    }

    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::PoolExhausted)
    ));

    // Releasing one pin makes allocation possible again
    buffer_pool.unpin_page(pinned[0], false)?;
    let (_, pid) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(pid, false)?;

    for &pid in &pinned[1..] {
        buffer_pool.unpin_page(pid, false)?;
    }
    Ok(())
}

#[test]
fn test_unpin_errors() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4)?;

    assert!(matches!(
        buffer_pool.unpin_page(99, false),
        Err(BufferPoolError::PageNotFound(99))
    ));

    let (_, pid) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(pid, false)?;
    assert!(matches!(
        buffer_pool.unpin_page(pid, false),
        Err(BufferPoolError::PageNotPinned(_))
    ));

    Ok(())
}

#[test]
fn test_flush_then_refetch_preserves_bytes() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4)?;

    let (page, pid) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[100..108].copy_from_slice(b"kestrel!");
    }
    buffer_pool.unpin_page(pid, false)?;

    // Flush writes regardless of the dirty bit
    buffer_pool.flush_all_pages()?;

    // Force the page out of the pool, then re-read it from disk
    for _ in 0..4 {
        let (_, other) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(other, false)?;
    }
    let fetched = buffer_pool.fetch_page(pid)?;
    {
        let page_guard = fetched.read();
        assert_eq!(&page_guard.data[100..108], b"kestrel!");
    }
    buffer_pool.unpin_page(pid, false)?;

    Ok(())
}

#[test]
fn test_flush_page_clears_dirty_bit() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4)?;

    let (page, pid) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[0] = 0x5A;
    }
    buffer_pool.unpin_page(pid, true)?;
    buffer_pool.flush_page(pid)?;

    assert!(matches!(
        buffer_pool.flush_page(12345),
        Err(BufferPoolError::PageNotFound(_))
    ));

    let fetched = buffer_pool.fetch_page(pid)?;
    assert_eq!(fetched.read().data[0], 0x5A);
    buffer_pool.unpin_page(pid, false)?;

    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4)?;

    let (_, pid) = buffer_pool.new_page()?;

    // Pinned pages cannot be deleted
    assert!(matches!(
        buffer_pool.delete_page(pid),
        Err(BufferPoolError::PagePinned(_))
    ));

    buffer_pool.unpin_page(pid, false)?;
    buffer_pool.delete_page(pid)?;
    assert_eq!(buffer_pool.pin_count(pid), None);

    // Deleting a non-resident page succeeds trivially
    buffer_pool.delete_page(7777)?;

    Ok(())
}

#[test]
fn test_page_modification_survives_eviction_round_trip() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        let test_data = b"Test Data";
        page_guard.data[100..100 + test_data.len()].copy_from_slice(test_data);
    }
    buffer_pool.unpin_page(page_id, true)?;

    let fetched = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched.read();
        assert_eq!(&page_guard.data[100..109], b"Test Data");
    }
    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}
