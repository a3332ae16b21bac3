//! Memory planning and installation.
//!
//! An installation needs one contiguous region. When executing in place the
//! region holds only the RAM image; when copying it holds the code prefix
//! followed by the RAM image:
//!
//! ```text
//! ExecuteInPlace:  [ .data | .bss | context ]
//! CopyAll:         [ header + code + rodata | .data | .bss | context ]
//! ```

use core::ptr::NonNull;

use crate::address::{align_ptr_up, is_ptr_aligned, DeviceAddress};
use crate::binary::Descriptor;
use crate::compat::{self, Processor};
use crate::config::LoaderConfig;
use crate::context::{Handle, RuntimeContext, EXECUTE_IN_PLACE, INITIALIZED};
use crate::error::{BinaryFault, LoaderError, LoaderResult, ParameterFault};
use crate::log::TaggedLogger;
use crate::relocation::{self, Bases, Limits};

const LOGGER: TaggedLogger = TaggedLogger::new("NETLOAD", 36);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadMode {
    /// Code runs from the image; only data is placed in RAM
    ExecuteInPlace,
    /// Code and data are both copied to RAM
    CopyAll,
}

/// Source of memory for installations that are not given a buffer
pub trait Allocator {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>>;

    /// # Safety
    /// `ptr` must have been returned by `alloc` on this allocator and not
    /// freed since
    unsafe fn free(&self, ptr: NonNull<u8>);
}

/// For boards that always supply buffers
#[derive(Copy, Clone, Debug, Default)]
pub struct NoAllocator;

impl Allocator for NoAllocator {
    fn alloc(&self, _size: usize) -> Option<NonNull<u8>> {
        None
    }

    unsafe fn free(&self, _ptr: NonNull<u8>) {}
}

/// Bytes a region must have for `mode`.
///
/// On the device this is `ram_size_xip`, plus `code_size` when copying. Hosts
/// with 64-bit pointers lay the runtime context out larger than the reserve
/// an image makes for it, and the region grows to hold it.
pub fn required_size(desc: &Descriptor, mode: LoadMode) -> usize {
    code_len(desc, mode) + ram_len(desc)
}

/// Bytes of code placed ahead of the RAM image
fn code_len(desc: &Descriptor, mode: LoadMode) -> usize {
    match mode {
        LoadMode::ExecuteInPlace => 0,
        LoadMode::CopyAll => desc.code_size() as usize,
    }
}

fn ram_len(desc: &Descriptor) -> usize {
    let context_end = desc.context_offset() as usize + core::mem::size_of::<RuntimeContext>();
    let context_end = (context_end + 3) & !3;
    context_end.max(desc.ram_size_xip() as usize)
}

/// Offsets a relocated word may name in each domain
pub fn limits(desc: &Descriptor, mode: LoadMode) -> Limits {
    let rom = match mode {
        LoadMode::ExecuteInPlace => desc.image().len() as u32,
        LoadMode::CopyAll => desc.code_size(),
    };
    Limits {
        ram: desc.ram_size_xip(),
        rom,
    }
}

struct Region {
    base: NonNull<u8>,
    /// Allocation backing the region, when the loader made it
    owned: Option<NonNull<u8>>,
}

impl Region {
    /// `context_at` is the offset of the runtime context from the region
    /// base, which an owned region keeps aligned for the context
    fn obtain(
        buffer: Option<&mut [u8]>,
        required: usize,
        context_at: usize,
        allocator: &dyn Allocator,
    ) -> LoaderResult<Self> {
        match buffer {
            Some(buffer) => {
                if !is_ptr_aligned(buffer.as_ptr(), 4) {
                    return Err(LoaderError::InvalidParameter(
                        ParameterFault::MisalignedBuffer,
                    ));
                }
                if buffer.len() < required {
                    return Err(LoaderError::OutOfMemory {
                        required,
                        available: Some(buffer.len()),
                    });
                }
                let base = NonNull::new(buffer.as_mut_ptr()).ok_or(LoaderError::OutOfMemory {
                    required,
                    available: Some(0),
                })?;
                Ok(Self { base, owned: None })
            }
            None => {
                // allocators are only asked for byte alignment
                let align = core::mem::align_of::<RuntimeContext>().max(4);
                let ptr = allocator
                    .alloc(required + align)
                    .ok_or(LoaderError::OutOfMemory {
                        required,
                        available: None,
                    })?;
                let context = align_ptr_up(ptr.as_ptr().wrapping_add(context_at), align);
                let base = context.wrapping_sub(context_at);
                Ok(Self {
                    base: NonNull::new(base).unwrap_or(ptr),
                    owned: Some(ptr),
                })
            }
        }
    }

    unsafe fn release(self, allocator: &dyn Allocator) {
        if let Some(ptr) = self.owned {
            allocator.free(ptr);
        }
    }
}

/// Check, copy and relocate an image into a fresh region, and write its
/// runtime context.
///
/// # Safety
/// When a buffer is given, it must stay valid and untouched by anything but
/// the returned handle until the network is destroyed.
pub unsafe fn install<P: Processor + ?Sized>(
    desc: &Descriptor,
    buffer: Option<&mut [u8]>,
    mode: LoadMode,
    allocator: &dyn Allocator,
    processor: &P,
    config: &LoaderConfig,
) -> LoaderResult<Handle> {
    compat::check(desc.flags(), processor, config)?;

    let required = required_size(desc, mode);
    let context_at = code_len(desc, mode) + desc.context_offset() as usize;
    let region = Region::obtain(buffer, required, context_at, allocator)?;
    match write_image(desc, &region, required, mode, config) {
        Ok(handle) => Ok(handle),
        Err(err) => {
            LOGGER.log(format_args!("install of \"{}\" failed: {}", desc.name(), err));
            region.release(allocator);
            Err(err)
        }
    }
}

unsafe fn write_image(
    desc: &Descriptor,
    region: &Region,
    required: usize,
    mode: LoadMode,
    config: &LoaderConfig,
) -> LoaderResult<Handle> {
    let bytes = core::slice::from_raw_parts_mut(region.base.as_ptr(), required);
    let code_len = code_len(desc, mode);
    let context_offset = desc.context_offset() as usize;

    // Nothing is written until every check has passed
    let context_ptr = bytes.as_mut_ptr().wrapping_add(code_len + context_offset);
    if !is_ptr_aligned(context_ptr, core::mem::align_of::<RuntimeContext>()) {
        return Err(LoaderError::InvalidBinary(BinaryFault::BadContext));
    }
    let limits = limits(desc, mode);
    relocation::verify(desc, &limits)?;

    let image = desc.image();
    let (code, ram) = bytes.split_at_mut(code_len);
    let rom_base = match mode {
        LoadMode::ExecuteInPlace => image.as_ptr(),
        LoadMode::CopyAll => {
            let copied = code_len.min(image.len());
            code[..copied].copy_from_slice(&image[..copied]);
            code[copied..].fill(0);
            code.as_ptr()
        }
    };

    ram.fill(0);
    let data = desc.data_image();
    let data_start = desc.sections().data_start as usize;
    ram[data_start..data_start + data.len()].copy_from_slice(data);

    let bases = Bases {
        ram: DeviceAddress::from_ptr(ram.as_ptr()),
        rom: DeviceAddress::from_ptr(rom_base),
    };
    let stats = relocation::apply(desc, ram, &bases, &limits, config.trace_relocations)?;

    let state = match mode {
        LoadMode::ExecuteInPlace => INITIALIZED | EXECUTE_IN_PLACE,
        LoadMode::CopyAll => INITIALIZED,
    };
    let mut context = RuntimeContext::new(desc, ram.as_ptr() as usize, rom_base as usize, state);
    context.owned = region.owned;
    let context_ptr = ram.as_mut_ptr().add(context_offset) as *mut RuntimeContext;
    core::ptr::write(context_ptr, context);

    LOGGER.log(format_args!(
        "installed \"{}\" ({:?}): RAM {:?}, ROM {:?}, {} GOT slots, {} relocations",
        desc.name(),
        mode,
        bases.ram,
        bases.rom,
        stats.got,
        stats.relocations,
    ));

    let context_ptr =
        NonNull::new(context_ptr).ok_or(LoaderError::InvalidBinary(BinaryFault::BadContext))?;
    Ok(Handle::from_ptr(context_ptr))
}
