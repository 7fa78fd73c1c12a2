use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicU64, Ordering};

use perf_event_open_sys::bindings::perf_event_mmap_page;

use crate::decode::{decode_ring, DecodedSamples};
use crate::Error;

/// The ring buffer the kernel fills for a sampling counter: one metadata
/// page followed by a power-of-two number of data pages.
pub struct SamplingBuffer {
    base: *mut u8,
    len: usize,
    page_size: usize,
}

impl SamplingBuffer {
    pub(super) fn map(fd: &OwnedFd, data_pages: usize) -> Result<Self, std::io::Error> {
        let page_size = page_size();
        let len = (1 + data_pages) * page_size;

        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }

        Ok(SamplingBuffer {
            base: addr as *mut u8,
            len,
            page_size,
        })
    }

    fn metadata(&self) -> *mut perf_event_mmap_page {
        self.base as *mut perf_event_mmap_page
    }

    /// Bytes written by the kernel so far. The acquire load orders every
    /// subsequent read of the data area after it.
    pub fn head(&self) -> u64 {
        unsafe {
            let atomic = AtomicU64::from_ptr(std::ptr::addr_of_mut!((*self.metadata()).data_head));
            atomic.load(Ordering::Acquire)
        }
    }

    fn data_offset(&self) -> usize {
        match unsafe { (*self.metadata()).data_offset } {
            0 => self.page_size,
            offset => offset as usize,
        }
    }

    /// Size of the data area in bytes.
    pub fn capacity(&self) -> u64 {
        match unsafe { (*self.metadata()).data_size } {
            0 => (self.len - self.page_size) as u64,
            size => size,
        }
    }

    /// Decodes everything up to the current head. Must only be called once
    /// the owning counter is disabled. A ring the kernel filled up is a
    /// [`Error::CaptureOverflow`].
    pub fn decode(&self) -> Result<DecodedSamples, Error> {
        let head = self.head();
        let capacity = self.capacity() as usize;

        let data = unsafe { std::slice::from_raw_parts(self.base.add(self.data_offset()), capacity) };

        decode_ring(data, head)
    }
}

impl Drop for SamplingBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
        }
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
