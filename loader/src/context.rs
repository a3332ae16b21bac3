//! Per-instance bookkeeping, stored inside the instance's own RAM image.
//!
//! The context sits at the offset named in the image header, so a network
//! needs no memory beyond the region it was installed into. A `Handle` is
//! nothing more than the address of this record.

use core::ptr::NonNull;

use netload_api::entry::Entry;
use netload_api::image::{CONTEXT_ALIGN, CONTEXT_SIZE, MAGIC};
use netload_api::observer::ObserverSlot;

use crate::binary::{Descriptor, EntryVector};

pub const NAME_LEN: usize = 32;

/// The module's `create` entry has run and `destroy` has not
pub const INITIALIZED: u32 = 1 << 0;
/// Code runs from the original image rather than a RAM copy
pub const EXECUTE_IN_PLACE: u32 = 1 << 1;

#[repr(C)]
pub struct RuntimeContext {
    pub state: u32,
    /// Opaque instance pointer written by the module's `create`
    pub network: usize,
    /// Base of the relocated RAM image, loaded into the global-base register
    pub ram_base: usize,
    /// Base of the code the entry offsets refer to
    pub rom_base: usize,
    pub ram_size: usize,
    /// Allocation to release on destroy, when the loader made one
    pub owned: Option<NonNull<u8>>,
    pub activations_size: u32,
    pub weights_size: u32,
    pub entries: EntryVector,
    pub name: [u8; NAME_LEN],
    pub observer: ObserverSlot,
}

// images reserve the context as laid out on the device
#[cfg(target_pointer_width = "32")]
const _: () = assert!(
    core::mem::size_of::<RuntimeContext>() <= CONTEXT_SIZE as usize
        && core::mem::align_of::<RuntimeContext>() <= CONTEXT_ALIGN as usize
);

impl RuntimeContext {
    pub fn new(desc: &Descriptor, ram_base: usize, rom_base: usize, state: u32) -> Self {
        let mut name = [0; NAME_LEN];
        // keep the final byte as a terminator
        let len = desc.name().len().min(NAME_LEN - 1);
        name[..len].copy_from_slice(&desc.name().as_bytes()[..len]);
        Self {
            state,
            network: 0,
            ram_base,
            rom_base,
            ram_size: desc.ram_size_xip() as usize,
            owned: None,
            activations_size: desc.activations_size(),
            weights_size: desc.weights().len() as u32,
            entries: *desc.entries(),
            name,
            observer: ObserverSlot::empty(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state & INITIALIZED != 0
    }

    pub fn executes_in_place(&self) -> bool {
        self.state & EXECUTE_IN_PLACE != 0
    }

    /// Address to branch to for an entry point, with the Thumb bit kept
    pub fn entry_address(&self, entry: Entry) -> Option<usize> {
        self.entries
            .offset(entry)
            .map(|offset| self.rom_base + offset as usize)
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|b| *b == 0).unwrap_or(NAME_LEN);
        // the bytes were copied from a validated &str, possibly cut mid-character
        match core::str::from_utf8(&self.name[..len]) {
            Ok(name) => name,
            Err(err) => core::str::from_utf8(&self.name[..err.valid_up_to()]).unwrap_or(""),
        }
    }
}

/// Identifies an installed network
#[derive(Copy, Clone, PartialEq, Eq)]
#[repr(transparent)]
pub struct Handle(NonNull<RuntimeContext>);

impl Handle {
    /// # Safety
    /// `ptr` must point at a context written by the planner
    pub unsafe fn from_ptr(ptr: NonNull<RuntimeContext>) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(&self) -> *mut RuntimeContext {
        self.0.as_ptr()
    }

    pub fn address(&self) -> usize {
        self.0.as_ptr() as usize
    }

    /// # Safety
    /// The memory holding the context must still be valid
    pub unsafe fn context<'c>(&self) -> &'c RuntimeContext {
        &*self.0.as_ptr()
    }

    /// # Safety
    /// The memory holding the context must still be valid, and no other
    /// reference to it may be live
    pub unsafe fn context_mut<'c>(&mut self) -> &'c mut RuntimeContext {
        &mut *self.0.as_ptr()
    }

    /// A network is live while its context is marked initialized and the
    /// code it points at still starts with a valid header.
    ///
    /// # Safety
    /// The memory holding the context must still be valid
    pub unsafe fn is_live(&self) -> bool {
        let ctx = self.context();
        if !ctx.is_initialized() || ctx.rom_base == 0 || ctx.rom_base % 4 != 0 {
            return false;
        }
        u32::from_le(core::ptr::read_volatile(ctx.rom_base as *const u32)) == MAGIC
    }
}

impl core::fmt::Debug for Handle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Handle({:#X})", self.address())
    }
}
