use super::Storage;

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;
use std::slice;

/// A file mapped shared and read-write into memory.
///
/// Writes go straight to the page cache and become visible to every other
/// mapping of the same file; [`flush`](Storage::flush) forces them to disk
/// with `msync(2)`. The mapping is removed when the value is dropped.
///
/// Several processes may map the same file, but the heap living inside it has
/// no locking of its own: coordinate writers with a file lock or similar.
#[derive(Debug)]
pub struct MmapFile {
    ptr: NonNull<u8>,
    len: usize,
    _file: File,
}

// SAFETY: the mapping is owned exclusively by this value and only reachable
// through `&self`/`&mut self`, exactly like a `Box<[u8]>`.
unsafe impl Send for MmapFile {}
// SAFETY: shared access only hands out `&[u8]`.
unsafe impl Sync for MmapFile {}

impl MmapFile {
    /// Create (or truncate) the file at `path`, size it to `len` bytes and
    /// map it.
    ///
    /// The new file reads as zeros.
    pub fn create<P: AsRef<Path>>(path: P, len: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len as u64)?;
        Self::map(file, len)
    }

    /// Map an existing file at its full length.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = usize::try_from(file.metadata()?.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file too large to map"))?;
        Self::map(file, len)
    }

    fn map(file: File, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot map an empty file",
            ));
        }

        // SAFETY: a fresh shared mapping of an open file descriptor; the
        // kernel picks the address and validates length and permissions.
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;

        Ok(Self {
            ptr,
            len,
            _file: file,
        })
    }
}

impl Storage for MmapFile {
    fn bytes(&self) -> &[u8] {
        // SAFETY: `ptr` is a live mapping of exactly `len` readable bytes for
        // the lifetime of `self`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, the mapping is writable and `&mut self` makes the
        // borrow unique within this process.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    fn flush(&mut self) -> io::Result<()> {
        // SAFETY: flushing the exact range this value mapped.
        let result = unsafe { libc::msync(self.ptr.as_ptr().cast(), self.len, libc::MS_SYNC) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MmapFile {
    fn drop(&mut self) {
        // SAFETY: unmapping the range mapped in `map()`; nothing can borrow
        // the bytes anymore. A failure leaves nothing to recover.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}
