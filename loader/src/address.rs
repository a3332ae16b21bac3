use core::ops::Add;

/// A 32-bit address as seen by code running inside an installed module.
///
/// Relocated words are always 32 bits wide. On the device this is the same
/// value as the pointer it came from; host builds keep only the low 32 bits.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DeviceAddress(u32);

impl DeviceAddress {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u32)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn is_aligned(&self, align: u32) -> bool {
        self.0 % align == 0
    }
}

impl From<DeviceAddress> for u32 {
    fn from(addr: DeviceAddress) -> Self {
        addr.as_u32()
    }
}

impl From<u32> for DeviceAddress {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Add<u32> for DeviceAddress {
    type Output = DeviceAddress;

    fn add(self, rhs: u32) -> Self::Output {
        Self::new(self.0.wrapping_add(rhs))
    }
}

impl core::fmt::Debug for DeviceAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "DeviceAddress({:#010X})", self.0)
    }
}

/// Round a pointer up to the next multiple of `align`, which must be a power
/// of two
pub fn align_ptr_up(ptr: *mut u8, align: usize) -> *mut u8 {
    let misalignment = (ptr as usize) & (align - 1);
    if misalignment == 0 {
        ptr
    } else {
        ptr.wrapping_add(align - misalignment)
    }
}

pub fn is_ptr_aligned<T>(ptr: *const T, align: usize) -> bool {
    (ptr as usize) & (align - 1) == 0
}
