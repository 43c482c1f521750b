use std::ptr::NonNull;

/// Maps `size` bytes of zero-filled, process-private anonymous memory.
///
/// The mapping is page aligned, which keeps every cache-line offset computed
/// by [`crate::layout`] cache-line aligned in memory as well.
pub(crate) fn map_anonymous_memory(size: usize) -> Result<NonNull<u8>, std::io::Error> {
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if addr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }

    NonNull::new(addr as *mut u8)
        .ok_or_else(|| std::io::Error::other("mmap returned a null mapping"))
}

pub(crate) unsafe fn unmap_memory(ptr: NonNull<u8>, size: usize) -> Result<(), std::io::Error> {
    unsafe {
        if libc::munmap(ptr.as_ptr().cast(), size) == -1 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Owner of the single backing allocation shared by all partitions.
///
/// Releasing is idempotent: the first [`MappedRegion::release`] unmaps the
/// memory, later calls (including the one from `Drop`) do nothing.
#[derive(Debug)]
pub(crate) struct MappedRegion {
    ptr: Option<NonNull<u8>>,
    len: usize,
}

unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    pub(crate) fn new(len: usize) -> Result<Self, std::io::Error> {
        let ptr = map_anonymous_memory(len)?;
        Ok(Self {
            ptr: Some(ptr),
            len,
        })
    }

    /// Base address of the mapping.
    ///
    /// # Panics
    ///
    /// Panics if the region was already released.
    pub(crate) fn as_ptr(&self) -> NonNull<u8> {
        match self.ptr {
            Some(ptr) => ptr,
            None => panic!("mapped region used after release"),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub(crate) fn is_released(&self) -> bool {
        self.ptr.is_none()
    }

    pub(crate) fn release(&mut self) -> Result<(), std::io::Error> {
        match self.ptr.take() {
            Some(ptr) => unsafe { unmap_memory(ptr, self.len) },
            None => Ok(()),
        }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!(len = self.len, error = %err, "failed to unmap log buffer memory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_zeroed_and_writable() {
        let region = MappedRegion::new(4096).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts_mut(region.as_ptr().as_ptr(), region.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
        bytes[0] = 42;
        bytes[4095] = 7;
        assert_eq!(bytes[0], 42);
        assert_eq!(bytes[4095], 7);
    }

    #[test]
    fn mapping_is_page_aligned() {
        let region = MappedRegion::new(64 * 1024).unwrap();
        assert_eq!(region.as_ptr().as_ptr() as usize % 4096, 0);
    }

    #[test]
    fn release_is_idempotent() {
        let mut region = MappedRegion::new(4096).unwrap();
        assert!(!region.is_released());
        region.release().unwrap();
        assert!(region.is_released());
        region.release().unwrap();
        assert!(region.is_released());
    }

    #[test]
    #[should_panic(expected = "used after release")]
    fn use_after_release_panics() {
        let mut region = MappedRegion::new(4096).unwrap();
        region.release().unwrap();
        let _ = region.as_ptr();
    }
}
