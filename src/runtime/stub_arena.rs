//! Executable memory for trampoline stubs
//!
//! Stubs are encoded up front, written into an anonymous mapping while it
//! is still writable, and the mapping is then switched to read+execute.
//! The memory is never written again, so no page is ever both writable
//! and executable.

use memmap2::{Mmap, MmapMut};
use tracing::debug;

use crate::arch::STUB_SIZE;
use crate::ffi::{FfiError, FfiResult};

/// A sealed, read+execute block of fixed-size stubs
pub struct StubArena {
    map: Mmap,
    count: usize,
}

impl StubArena {
    /// Write `stubs` into fresh executable memory
    pub fn build(stubs: &[[u8; STUB_SIZE]]) -> FfiResult<Self> {
        let size = (stubs.len() * STUB_SIZE).max(STUB_SIZE);
        let mut map = MmapMut::map_anon(size).map_err(|e| FfiError::StubAllocation(e.to_string()))?;

        for (i, stub) in stubs.iter().enumerate() {
            map[i * STUB_SIZE..(i + 1) * STUB_SIZE].copy_from_slice(stub);
        }
        flush_icache(map.as_mut_ptr(), size)?;

        let map = map
            .make_exec()
            .map_err(|e| FfiError::StubAllocation(e.to_string()))?;
        debug!(stubs = stubs.len(), bytes = size, base = ?map.as_ptr(), "sealed stub arena");

        Ok(Self {
            map,
            count: stubs.len(),
        })
    }

    /// Native address of stub `index`
    pub fn stub_address(&self, index: usize) -> Option<usize> {
        (index < self.count).then(|| self.map.as_ptr() as usize + index * STUB_SIZE)
    }

    /// Bytes of stub `index`, as the processor will fetch them
    pub fn stub_bytes(&self, index: usize) -> Option<&[u8]> {
        (index < self.count).then(|| &self.map[index * STUB_SIZE..(index + 1) * STUB_SIZE])
    }

    /// Number of stubs
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if the arena holds no stubs
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

// Platform-specific instruction cache maintenance

#[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
fn flush_icache(_start: *mut u8, _len: usize) -> FfiResult<()> {
    // x86 keeps instruction fetch coherent with data writes
    Ok(())
}

#[cfg(all(
    any(target_arch = "aarch64", target_arch = "riscv64"),
    unix,
    not(target_vendor = "apple")
))]
fn flush_icache(start: *mut u8, len: usize) -> FfiResult<()> {
    extern "C" {
        fn __clear_cache(start: *mut libc::c_char, end: *mut libc::c_char);
    }
    unsafe {
        let start = start as *mut libc::c_char;
        __clear_cache(start, start.add(len));
    }
    Ok(())
}

#[cfg(all(target_arch = "aarch64", target_vendor = "apple"))]
fn flush_icache(start: *mut u8, len: usize) -> FfiResult<()> {
    extern "C" {
        fn sys_icache_invalidate(start: *mut libc::c_void, len: usize);
    }
    unsafe { sys_icache_invalidate(start as *mut libc::c_void, len) };
    Ok(())
}

#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "x86",
    all(
        any(target_arch = "aarch64", target_arch = "riscv64"),
        unix,
        not(target_vendor = "apple")
    ),
    all(target_arch = "aarch64", target_vendor = "apple")
)))]
fn flush_icache(_start: *mut u8, _len: usize) -> FfiResult<()> {
    Err(FfiError::UnsupportedPlatform(format!(
        "no instruction cache maintenance for {} on {}",
        crate::arch::detect_arch(),
        std::env::consts::OS
    )))
}
