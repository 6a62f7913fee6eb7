use std::sync::Mutex;

use bfs_ds::{DataStorage, Error, IoError, Result};

/// A block device backed by an in-memory buffer.
///
/// Used by the core filesystem's own test suite so that the round-trip
/// invariants of the VCB/FAT/directory/I/O engine can be exercised without
/// touching the filesystem the test process itself runs on.
pub struct DataStorageServer {
    blocks: Mutex<Vec<u8>>,
    block_size: u32,
    num_blocks: u64,
}

impl DataStorageServer {
    pub fn new(num_blocks: u64, block_size: u32) -> Self {
        Self {
            blocks: Mutex::new(vec![0u8; (num_blocks * block_size as u64) as usize]),
            block_size,
            num_blocks,
        }
    }
}

impl DataStorage for DataStorageServer {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    fn lba_read(&self, buffer: &mut [u8], count: u64, start: u64) -> Result<u64> {
        let backing = self.blocks.lock().unwrap();
        let available = self.num_blocks.saturating_sub(start).min(count);
        let offset = (start * self.block_size as u64) as usize;
        let len = (available * self.block_size as u64) as usize;
        buffer[..len].copy_from_slice(&backing[offset..offset + len]);
        if available != count {
            return Err(Error::Io(IoError::ShortTransfer {
                expected: count,
                actual: available,
            }));
        }
        Ok(available)
    }

    fn lba_write(&self, buffer: &[u8], count: u64, start: u64) -> Result<u64> {
        let mut backing = self.blocks.lock().unwrap();
        let available = self.num_blocks.saturating_sub(start).min(count);
        let offset = (start * self.block_size as u64) as usize;
        let len = (available * self.block_size as u64) as usize;
        backing[offset..offset + len].copy_from_slice(&buffer[..len]);
        if available != count {
            return Err(Error::Io(IoError::ShortTransfer {
                expected: count,
                actual: available,
            }));
        }
        Ok(available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_block() {
        let ds = DataStorageServer::new(8, 512);
        let mut write_buf = vec![0u8; 512];
        write_buf[..5].copy_from_slice(b"hello");
        assert_eq!(ds.lba_write(&write_buf, 1, 3).unwrap(), 1);

        let mut read_buf = vec![0u8; 512];
        assert_eq!(ds.lba_read(&mut read_buf, 1, 3).unwrap(), 1);
        assert_eq!(&read_buf[..5], b"hello");
    }

    #[test]
    fn short_transfer_past_the_end_is_reported() {
        let ds = DataStorageServer::new(4, 512);
        let mut read_buf = vec![0u8; 512 * 4];
        let err = ds.lba_read(&mut read_buf, 4, 2).unwrap_err();
        match err {
            Error::Io(IoError::ShortTransfer { expected, actual }) => {
                assert_eq!(expected, 4);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
