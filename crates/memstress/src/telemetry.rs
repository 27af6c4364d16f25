//! Free-memory telemetry.
//!
//! On FreeBSD the counters come straight from the VM sysctls the kernel
//! exports (`vm.stats.vm.v_free_count` and friends). Elsewhere `sysinfo`
//! supplies free and total memory, converted to pages; the pageout targets
//! have no portable equivalent and are reported as `None`.

use std::io;

use serde::Serialize;

const MIB: u64 = 1_048_576;

/// Source of free-page counts, polled on demand.
pub trait MemoryTelemetry {
    /// Pages currently free.
    fn free_pages(&mut self) -> io::Result<u64>;

    /// Size of one page in bytes.
    fn page_size(&self) -> u64;

    /// Every counter at once, for start-up logging and defaults.
    fn snapshot(&mut self) -> io::Result<MemorySnapshot>;
}

/// VM counters at one instant, in pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub free_count: u64,
    /// Pageout daemon's severe threshold (`vm.v_free_severe`).
    pub free_severe: Option<u64>,
    /// Pageout daemon's target (`vm.v_free_target`).
    pub free_target: Option<u64>,
    pub page_count: u64,
    pub page_size: u64,
}

impl MemorySnapshot {
    fn mb(&self, pages: u64) -> u64 {
        pages.saturating_mul(self.page_size) / MIB
    }

    pub fn free_count_mb(&self) -> u64 {
        self.mb(self.free_count)
    }

    pub fn free_severe_mb(&self) -> Option<u64> {
        self.free_severe.map(|p| self.mb(p))
    }

    pub fn free_target_mb(&self) -> Option<u64> {
        self.free_target.map(|p| self.mb(p))
    }

    pub fn page_count_mb(&self) -> u64 {
        self.mb(self.page_count)
    }

    /// Emit the counters as `info` events.
    pub fn log(&self) {
        tracing::info!(
            pages = self.free_count,
            mb = self.free_count_mb(),
            "v_free_count at start"
        );
        match self.free_severe {
            Some(pages) => tracing::info!(pages, mb = self.mb(pages), "v_free_severe"),
            None => tracing::info!("v_free_severe unavailable on this platform"),
        }
        match self.free_target {
            Some(pages) => tracing::info!(pages, mb = self.mb(pages), "v_free_target"),
            None => tracing::info!("v_free_target unavailable on this platform"),
        }
        tracing::info!(
            pages = self.page_count,
            mb = self.page_count_mb(),
            "v_page_count"
        );
    }
}

/// System page size from `sysconf`, 4 KiB if the call fails.
pub fn system_page_size() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}

/// Telemetry backed by the running system.
#[derive(Debug)]
pub struct SystemTelemetry {
    page_size: u64,
    #[cfg(not(target_os = "freebsd"))]
    sys: sysinfo::System,
}

impl SystemTelemetry {
    pub fn new() -> Self {
        Self {
            page_size: system_page_size(),
            #[cfg(not(target_os = "freebsd"))]
            sys: sysinfo::System::new(),
        }
    }
}

impl Default for SystemTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "freebsd")]
mod sysctl {
    use std::ffi::CStr;
    use std::io;

    /// Read an unsigned integer sysctl (`u_int` or `u_long`).
    pub fn read_uint(name: &CStr) -> io::Result<u64> {
        let mut value = [0u8; 8];
        let mut len = value.len();
        // SAFETY: `value` is writable for `len` bytes and the kernel updates
        // `len` to the number of bytes written.
        let rc = unsafe {
            libc::sysctlbyname(
                name.as_ptr(),
                value.as_mut_ptr().cast(),
                &mut len,
                std::ptr::null(),
                0,
            )
        };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        match len {
            4 => Ok(u64::from(u32::from_ne_bytes([
                value[0], value[1], value[2], value[3],
            ]))),
            8 => Ok(u64::from_ne_bytes(value)),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("sysctl {name:?} returned {len} bytes"),
            )),
        }
    }
}

#[cfg(target_os = "freebsd")]
impl MemoryTelemetry for SystemTelemetry {
    fn free_pages(&mut self) -> io::Result<u64> {
        sysctl::read_uint(c"vm.stats.vm.v_free_count")
    }

    fn page_size(&self) -> u64 {
        self.page_size
    }

    fn snapshot(&mut self) -> io::Result<MemorySnapshot> {
        Ok(MemorySnapshot {
            free_count: self.free_pages()?,
            free_severe: Some(sysctl::read_uint(c"vm.v_free_severe")?),
            free_target: Some(sysctl::read_uint(c"vm.v_free_target")?),
            page_count: sysctl::read_uint(c"vm.stats.vm.v_page_count")?,
            page_size: self.page_size,
        })
    }
}

#[cfg(not(target_os = "freebsd"))]
impl MemoryTelemetry for SystemTelemetry {
    fn free_pages(&mut self) -> io::Result<u64> {
        self.sys.refresh_memory();
        Ok(self.sys.free_memory() / self.page_size)
    }

    fn page_size(&self) -> u64 {
        self.page_size
    }

    fn snapshot(&mut self) -> io::Result<MemorySnapshot> {
        self.sys.refresh_memory();
        Ok(MemorySnapshot {
            free_count: self.sys.free_memory() / self.page_size,
            free_severe: None,
            free_target: None,
            page_count: self.sys.total_memory() / self.page_size,
            page_size: self.page_size,
        })
    }
}

/// Telemetry with a settable free-page count, for tests and dry runs.
#[derive(Debug, Clone)]
pub struct FixedTelemetry {
    pub free_pages: u64,
    pub page_size: u64,
    /// Make every read fail with this errno.
    pub fail_with: Option<i32>,
    /// Number of `free_pages` reads so far.
    pub reads: u64,
}

impl FixedTelemetry {
    pub fn new(free_pages: u64) -> Self {
        Self {
            free_pages,
            page_size: 4096,
            fail_with: None,
            reads: 0,
        }
    }

    pub fn failing(errno: i32) -> Self {
        Self {
            fail_with: Some(errno),
            ..Self::new(0)
        }
    }
}

impl MemoryTelemetry for FixedTelemetry {
    fn free_pages(&mut self) -> io::Result<u64> {
        self.reads += 1;
        match self.fail_with {
            Some(errno) => Err(io::Error::from_raw_os_error(errno)),
            None => Ok(self.free_pages),
        }
    }

    fn page_size(&self) -> u64 {
        self.page_size
    }

    fn snapshot(&mut self) -> io::Result<MemorySnapshot> {
        Ok(MemorySnapshot {
            free_count: self.free_pages()?,
            free_severe: None,
            free_target: None,
            page_count: self.free_pages,
            page_size: self.page_size,
        })
    }
}
