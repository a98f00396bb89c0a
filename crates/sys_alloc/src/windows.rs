use std::io::{self, Error};
use std::mem;
use std::ptr;

#[cfg(not(miri))]
use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE, MEM_RESERVE,
    PAGE_READWRITE,
};
#[cfg(not(miri))]
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

/// Returns the system allocation granularity.
///
/// On Windows, `VirtualAlloc` address must be aligned to this value (typically 64KB),
/// which is often larger than the page size (typically 4KB).
pub fn allocation_granularity() -> usize {
    #[cfg(miri)]
    {
        65536
    }
    #[cfg(not(miri))]
    unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        let gran = info.dwAllocationGranularity as usize;
        if gran == 0 {
            65536
        } else {
            gran
        }
    }
}

pub fn page_size() -> usize {
    #[cfg(miri)]
    {
        4096
    }
    #[cfg(not(miri))]
    unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        let size = info.dwPageSize as usize;
        if size == 0 {
            4096
        } else {
            size
        }
    }
}

pub struct MmapInner {
    ptr: *mut std::ffi::c_void,
    len: usize,
}

impl MmapInner {
    /// Reserves `len` bytes. Unless `no_reserve` is set the range is also
    /// committed; otherwise pages are committed per region through [`commit`].
    pub fn map_anon(len: usize, no_reserve: bool) -> io::Result<Self> {
        #[cfg(miri)]
        {
            use std::alloc::{alloc, Layout};
            let _ = no_reserve;
            let layout = Layout::from_size_align(len, allocation_granularity())
                .map_err(|_| Error::from(io::ErrorKind::InvalidInput))?;
            // SAFETY: `len` is non-zero, checked by `MmapOptions::map_anon`.
            let ptr = unsafe { alloc(layout) };
            if ptr.is_null() {
                return Err(Error::from(io::ErrorKind::OutOfMemory));
            }
            Ok(Self {
                ptr: ptr.cast(),
                len,
            })
        }
        #[cfg(not(miri))]
        {
            let kind = if no_reserve {
                MEM_RESERVE
            } else {
                MEM_COMMIT | MEM_RESERVE
            };
            // SAFETY: a null address lets the OS pick a fresh range.
            let ptr = unsafe { VirtualAlloc(ptr::null(), len, kind, PAGE_READWRITE) };
            if ptr.is_null() {
                return Err(Error::last_os_error());
            }
            Ok(Self { ptr, len })
        }
    }

    pub const fn ptr(&self) -> *mut u8 {
        self.ptr.cast::<u8>()
    }

    /// `VirtualFree` cannot release part of a reservation, so the whole
    /// mapping is kept and the usable range starts `head` bytes in.
    pub unsafe fn trim(self, head: usize, _len: usize) -> (Self, usize) {
        (self, head)
    }
}

pub unsafe fn commit(ptr: *mut u8, len: usize) -> io::Result<()> {
    #[cfg(miri)]
    {
        let _ = (ptr, len);
        Ok(())
    }
    #[cfg(not(miri))]
    {
        let res = unsafe { VirtualAlloc(ptr.cast(), len, MEM_COMMIT, PAGE_READWRITE) };
        if res.is_null() {
            return Err(Error::last_os_error());
        }
        Ok(())
    }
}

pub unsafe fn decommit(ptr: *mut u8, len: usize) -> io::Result<()> {
    #[cfg(miri)]
    {
        let _ = (ptr, len);
        Ok(())
    }
    #[cfg(not(miri))]
    {
        if unsafe { VirtualFree(ptr.cast(), len, MEM_DECOMMIT) } == 0 {
            return Err(Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for MmapInner {
    fn drop(&mut self) {
        if self.len > 0 {
            unsafe {
                #[cfg(miri)]
                {
                    use std::alloc::{dealloc, Layout};
                    let align = allocation_granularity();
                    let layout = Layout::from_size_align(self.len, align).unwrap();
                    dealloc(self.ptr.cast::<u8>(), layout);
                }
                #[cfg(not(miri))]
                {
                    // MEM_RELEASE requires dwSize to be 0
                    VirtualFree(self.ptr, 0, MEM_RELEASE);
                }
            }
        }
    }
}

unsafe impl Send for MmapInner {}
unsafe impl Sync for MmapInner {}
