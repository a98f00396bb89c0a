use std::io::{self, Error};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_vendor = "apple",
    target_os = "netbsd",
    target_os = "solaris",
    target_os = "illumos",
))]
const MAP_NORESERVE: libc::c_int = libc::MAP_NORESERVE;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_vendor = "apple",
    target_os = "netbsd",
    target_os = "solaris",
    target_os = "illumos",
)))]
const MAP_NORESERVE: libc::c_int = 0;

pub fn page_size() -> usize {
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            // SAFETY: sysconf has no preconditions.
            let size = usize::try_from(unsafe { libc::sysconf(libc::_SC_PAGESIZE) }).unwrap_or(4096);
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

pub struct MmapInner {
    ptr: *mut libc::c_void,
    len: usize,
}

impl MmapInner {
    /// Maps `len` bytes of private anonymous memory. With `no_reserve` no swap
    /// is accounted, so a large heap reservation costs nothing until touched.
    pub fn map_anon(len: usize, no_reserve: bool) -> io::Result<Self> {
        let flags = libc::MAP_PRIVATE
            | libc::MAP_ANON
            | if no_reserve { MAP_NORESERVE } else { 0 };
        // SAFETY: a null hint lets the kernel pick a fresh range.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::last_os_error());
        }
        Ok(Self { ptr, len })
    }

    pub fn ptr(&self) -> *mut u8 {
        self.ptr.cast::<u8>()
    }

    /// Unmaps everything outside `[head, head + len)` and returns the kept
    /// mapping together with the offset of the usable range inside it.
    ///
    /// # Safety
    ///
    /// `head + len` must not exceed the mapping length.
    pub unsafe fn trim(self, head: usize, len: usize) -> (MmapInner, usize) {
        let base = self.ptr.cast::<u8>();
        let total = self.len;
        std::mem::forget(self);
        unsafe {
            if head > 0 {
                libc::munmap(base.cast(), head);
            }
            let tail = total - head - len;
            if tail > 0 {
                libc::munmap(base.add(head + len).cast(), tail);
            }
        }
        let ptr = unsafe { base.add(head) }.cast::<libc::c_void>();
        (MmapInner { ptr, len }, 0)
    }
}

/// Anonymous private mappings are committed lazily by the kernel on first touch.
pub unsafe fn commit(_ptr: *mut u8, _len: usize) -> io::Result<()> {
    Ok(())
}

/// Drops the physical pages of a range while keeping it mapped.
pub unsafe fn decommit(ptr: *mut u8, len: usize) -> io::Result<()> {
    let rc = unsafe { libc::madvise(ptr.cast(), len, libc::MADV_DONTNEED) };
    if rc != 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

impl Drop for MmapInner {
    fn drop(&mut self) {
        if self.len > 0 {
            unsafe {
                libc::munmap(self.ptr, self.len);
            }
        }
    }
}

unsafe impl Send for MmapInner {}
unsafe impl Sync for MmapInner {}
