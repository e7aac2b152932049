// SPDX-License-Identifier: AGPL-3.0-only

//! Memory-mapped FPGA resource window
//!
//! The FPGA BAR is exposed as a sysfs resource file. It is opened once per
//! process (`O_RDWR | O_SYNC`) and cached; registers are reached by mapping
//! the 4 KiB page that contains them.
//!
//! Mapped pages are kept for the lifetime of the backend, keyed by page
//! base. The bridge touches two pages per port group (control page and
//! shadow window), so the set stays small. Offset arithmetic is identical to
//! a map-per-access scheme: `page_base(offset)` is mapped and the register
//! sits at `page_offset(offset)` inside it.

use crate::backend::{BackendType, RegisterBackend};
use crate::error::{BridgeError, Result};
use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use sfp_fpga_chip::bar::{page_base, page_offset, PAGE_SIZE};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

#[allow(clippy::cast_possible_truncation)]
const PAGE_LEN: usize = PAGE_SIZE as usize;

static RESOURCES: OnceLock<Mutex<HashMap<PathBuf, Arc<File>>>> = OnceLock::new();

/// Open the resource file at `path`, once per process.
///
/// Later calls with the same path return the cached handle.
///
/// # Errors
///
/// Returns [`BridgeError::ResourceUnavailable`] if the file cannot be opened
/// for read/write.
pub fn open_resource(path: &Path) -> Result<Arc<File>> {
    let registry = RESOURCES.get_or_init(|| Mutex::new(HashMap::new()));
    let mut open = registry.lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(file) = open.get(path) {
        return Ok(Arc::clone(file));
    }

    #[allow(clippy::cast_possible_wrap)]
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(OFlags::SYNC.bits() as i32)
        .open(path)
        .map_err(|e| BridgeError::resource_unavailable(path, e))?;

    tracing::info!("Opened FPGA resource {}", path.display());

    let file = Arc::new(file);
    open.insert(path.to_path_buf(), Arc::clone(&file));
    Ok(file)
}

/// One mapped 4 KiB page of the resource window.
///
/// Unmapped on drop.
#[derive(Debug)]
pub struct MappedPage {
    ptr: NonNull<u8>,
    base: u64,
}

impl MappedPage {
    /// Map the page starting at page-aligned `base`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MapFailed`] if `base` is not page aligned or
    /// `mmap` fails.
    pub fn map(file: &File, base: u64) -> Result<Self> {
        if page_offset(base) != 0 {
            return Err(BridgeError::map_failed(base, "offset is not page aligned"));
        }

        // SAFETY: mmap of one page of the FPGA resource file.
        // Invariants that must hold:
        // - file is open read/write (open_resource) and outlives the mapping
        //   through the Arc held by MmapBackend
        // - base is page aligned (checked above), length is exactly one page
        // - PROT_READ|PROT_WRITE, MAP_SHARED: device memory, writes must reach
        //   the FPGA; MAP_NORESERVE: no swap reservation for MMIO
        // - rustix returns Result, so failure is handled below
        // - the page is unmapped exactly once, in Drop
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                PAGE_LEN,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED | MapFlags::NORESERVE,
                file.as_fd(),
                base,
            )
        }
        .map_err(|e| BridgeError::map_failed(base, e.to_string()))?;

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| BridgeError::map_failed(base, "mmap returned null"))?;

        tracing::debug!("Mapped FPGA page {base:#010x} at {ptr:p}");
        Ok(Self { ptr, base })
    }

    fn check(&self, offset: usize) -> Result<()> {
        if offset % 4 != 0 || offset + 4 > PAGE_LEN {
            return Err(BridgeError::map_failed(
                self.base,
                format!("dword access at {offset:#x} outside page or unaligned"),
            ));
        }
        Ok(())
    }

    /// Volatile read of the dword at `offset` within the page.
    ///
    /// # Errors
    ///
    /// Returns error if `offset` is unaligned or outside the page.
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        self.check(offset)?;

        // SAFETY: Volatile read from a memory-mapped FPGA register.
        // Invariants that must hold:
        // - offset is 4-byte aligned and offset + 4 <= PAGE_LEN (checked above)
        // - ptr is valid for PAGE_LEN bytes (successful mmap in map())
        // - read_volatile is required: the FPGA changes status registers and
        //   shadow memory behind the compiler's back
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };
        Ok(value)
    }

    /// Volatile write of the dword at `offset` within the page.
    ///
    /// # Errors
    ///
    /// Returns error if `offset` is unaligned or outside the page.
    pub fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.check(offset)?;

        // SAFETY: Volatile write to a memory-mapped FPGA register.
        // Invariants that must hold:
        // - offset is 4-byte aligned and offset + 4 <= PAGE_LEN (checked above)
        // - ptr is valid for PAGE_LEN bytes (successful mmap in map())
        // - write_volatile is required: the write triggers FPGA side effects
        //   (writing the command register starts an I2C transaction)
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value);
        }
        Ok(())
    }
}

impl Drop for MappedPage {
    fn drop(&mut self) {
        // SAFETY: munmap of the page mapped in map().
        // Invariants that hold:
        // - ptr and PAGE_LEN are exactly what mmap returned / was given
        // - Drop runs once, and no reference into the page outlives self
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), PAGE_LEN) {
                tracing::error!("munmap of FPGA page {:#010x} failed: {e}", self.base);
            }
        }
        tracing::trace!("Unmapped FPGA page {:#010x}", self.base);
    }
}

// SAFETY: Send is safe because:
// - MappedPage owns its mapping exclusively; no other in-process reference
//   to the same virtual range exists
// - mmap'd memory is valid from any thread of the process
// - writes need &mut self, and the bridge serialises all access behind its lock
unsafe impl Send for MappedPage {}

/// Register backend over the sysfs resource file.
#[derive(Debug)]
pub struct MmapBackend {
    file: Arc<File>,
    path: PathBuf,
    pages: HashMap<u64, MappedPage>,
}

impl MmapBackend {
    /// Open (or reuse) the resource file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ResourceUnavailable`] if the resource cannot be
    /// opened.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            file: open_resource(path)?,
            path: path.to_path_buf(),
            pages: HashMap::new(),
        })
    }

    /// Resource file this backend maps.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of pages currently mapped.
    pub fn mapped_pages(&self) -> usize {
        self.pages.len()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn page(&mut self, offset: u64) -> Result<(&mut MappedPage, usize)> {
        let base = page_base(offset);
        let page = match self.pages.entry(base) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => e.insert(MappedPage::map(&self.file, base)?),
        };
        Ok((page, page_offset(offset) as usize))
    }
}

impl RegisterBackend for MmapBackend {
    fn read_dword(&mut self, offset: u64) -> Result<u32> {
        let (page, within) = self.page(offset)?;
        let value = page.read_u32(within)?;
        tracing::trace!("mmap read {offset:#010x} = {value:#010x}");
        Ok(value)
    }

    fn write_dword(&mut self, offset: u64, value: u32) -> Result<()> {
        tracing::trace!("mmap write {offset:#010x} = {value:#010x}");
        let (page, within) = self.page(offset)?;
        page.write_u32(within, value)
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Mmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    /// A regular file stands in for the resource: MAP_SHARED writes land in it.
    fn fake_resource(pages: u64) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(pages * PAGE_SIZE).unwrap();
        file.seek(SeekFrom::Start(PAGE_SIZE + 8)).unwrap();
        file.write_all(&0xCAFE_F00Du32.to_le_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn open_is_memoized() {
        let res = fake_resource(1);
        let a = open_resource(res.path()).unwrap();
        let b = open_resource(res.path()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn missing_resource_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_resource(&dir.path().join("resource4")).unwrap_err();
        assert!(matches!(err, BridgeError::ResourceUnavailable { .. }));
    }

    #[test]
    fn reads_and_writes_through_mapping() {
        let res = fake_resource(2);
        let mut backend = MmapBackend::open(res.path()).unwrap();

        assert_eq!(backend.read_dword(PAGE_SIZE + 8).unwrap(), 0xCAFE_F00D);
        backend.write_dword(0x10, 0x1234_5678).unwrap();
        assert_eq!(backend.read_dword(0x10).unwrap(), 0x1234_5678);
        assert_eq!(backend.mapped_pages(), 2);

        drop(backend);
        let bytes = std::fs::read(res.path()).unwrap();
        assert_eq!(&bytes[0x10..0x14], &0x1234_5678u32.to_le_bytes());
    }

    #[test]
    fn unaligned_page_rejected() {
        let res = fake_resource(1);
        let file = open_resource(res.path()).unwrap();
        assert!(matches!(
            MappedPage::map(&file, 0x10),
            Err(BridgeError::MapFailed { .. })
        ));
    }

    #[test]
    #[ignore] // Requires hardware
    fn maps_fpga_control_page() {
        let mut backend = MmapBackend::open(Path::new(sfp_fpga_chip::pcie::FPGA_RESOURCE)).unwrap();
        let status = sfp_fpga_chip::bar::ctrl_register_offset(0x1000, sfp_fpga_chip::regs::INTERRUPT_STATUS);
        println!("status: {:#x}", backend.read_dword(status).unwrap());
    }
}
