//! Page allocation stress.
//!
//! Maps anonymous private pages one at a time, optionally dirtying each so
//! the VM has to back it, and holds them until the [`PageSet`] is dropped.

use std::io;
use std::ptr::NonNull;

use crate::gate::MemoryPressureGate;
use crate::stats::RunStats;
use crate::telemetry::MemoryTelemetry;

/// Byte written over every touched page.
pub const FILL_BYTE: u8 = 44;

/// Pages mapped by [`allocate_pages`]; unmapped on drop.
#[derive(Debug)]
pub struct PageSet {
    pages: Vec<NonNull<u8>>,
    page_size: usize,
}

impl PageSet {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Contents of the `i`th mapped page.
    pub fn page(&self, i: usize) -> Option<&[u8]> {
        let page = self.pages.get(i)?;
        // SAFETY: every stored pointer is a live PROT_READ|PROT_WRITE mapping
        // of `page_size` bytes owned by this set.
        Some(unsafe { std::slice::from_raw_parts(page.as_ptr(), self.page_size) })
    }
}

impl Drop for PageSet {
    fn drop(&mut self) {
        for page in self.pages.drain(..) {
            // SAFETY: `page` came from mmap with this length and is unmapped once.
            let rc = unsafe { libc::munmap(page.as_ptr().cast(), self.page_size) };
            if rc == -1 {
                tracing::warn!(error = %io::Error::last_os_error(), "munmap failed");
            }
        }
    }
}

fn map_page(page_size: usize) -> io::Result<NonNull<u8>> {
    // SAFETY: anonymous private mapping, no fd or fixed address involved.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            page_size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_ANON | libc::MAP_PRIVATE,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(ptr.cast::<u8>()).ok_or_else(|| io::Error::from_raw_os_error(libc::ENOMEM))
}

/// Map `count` pages of `page_size` bytes, polling `gate` before each.
///
/// A page that fails to map is logged, counted in `stats.failures` and
/// skipped; the returned set holds only the pages that mapped.
pub fn allocate_pages<M: MemoryTelemetry>(
    count: u64,
    page_size: usize,
    touch: bool,
    veto_pages: u64,
    gate: &mut MemoryPressureGate<M>,
    stats: &mut RunStats,
) -> PageSet {
    let mut set = PageSet {
        pages: Vec::with_capacity(usize::try_from(count).unwrap_or(0)),
        page_size,
    };

    for i in 0..count {
        gate.should_veto(veto_pages, stats);

        let page = match map_page(page_size) {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(page = i, error = %e, "page allocation failed");
                stats.failures += 1;
                continue;
            }
        };
        if touch {
            // SAFETY: freshly mapped writable region of `page_size` bytes.
            unsafe { std::ptr::write_bytes(page.as_ptr(), FILL_BYTE, page_size) };
        }
        set.pages.push(page);
        stats.pages_mapped += 1;
    }

    tracing::debug!(mapped = set.len(), requested = count, "pages allocated");
    set
}
