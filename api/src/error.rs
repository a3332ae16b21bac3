/// Error word returned by a module's `create` and `error` entries.
///
/// The word packs an 8-bit type in the low byte and a 24-bit code above it.
/// The loader never interprets either half; it hands them back to the caller
/// as they were reported.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModuleError {
    pub kind: u8,
    pub code: u32,
}

impl ModuleError {
    pub const NONE: ModuleError = ModuleError::new(0x00, 0x00);

    // A few well-known values that module runtimes report. The loader only
    // produces CREATE_FAILED, for a `create` that returns success without a
    // network.
    pub const INVALID_HANDLE: u8 = 0x10;
    pub const INVALID_STATE: u8 = 0x11;
    pub const INVALID_INPUT: u8 = 0x12;
    pub const INVALID_OUTPUT: u8 = 0x13;
    pub const INIT_FAILED: u8 = 0x30;
    pub const ALLOCATION_FAILED: u8 = 0x31;
    pub const CREATE_FAILED: u8 = 0x33;

    pub const fn new(kind: u8, code: u32) -> Self {
        Self {
            kind,
            code: code & 0x00ff_ffff,
        }
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self {
            kind: (raw & 0xff) as u8,
            code: raw >> 8,
        }
    }

    pub const fn into_raw(self) -> u32 {
        (self.code << 8) | self.kind as u32
    }

    pub const fn is_none(&self) -> bool {
        self.kind == 0
    }
}
