use netload_api::entry::Entry;
use netload_api::error::ModuleError;

/// Why an image was rejected. None of these are ever safe to execute.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum BinaryFault {
    // No value should be backed by 0
    BadMagic = 1,
    /// The image base is not 4-byte aligned
    Misaligned,
    /// The image is shorter than its header or one of its sections
    Truncated,
    /// A section has inverted bounds or lies outside its region
    BadSection,
    /// A required entry point is missing from the entry vector
    MissingEntry,
    /// An entry point lies outside the code section
    BadEntry,
    /// The model name is not a terminated UTF-8 string inside the image
    BadName,
    /// The runtime context does not fit, or is misaligned, in RAM
    BadContext,
    /// An address word carries an unknown domain tag or an offset outside
    /// its region, or a relocation names an invalid slot
    BadRelocation,
    /// Built for a different processor
    CpuMismatch,
    /// Uses the FPU, which is not enabled on this processor
    FpuUnavailable,
    /// Built against an incompatible loader ABI
    VersionMismatch,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ParameterFault {
    /// A caller-supplied buffer is not 4-byte aligned
    MisalignedBuffer = 1,
    /// No weight buffers were passed to a module that has weights
    MissingWeights,
    /// No activation buffers were passed to a module that needs them
    MissingActivations,
    /// Observer flags are empty or contain unknown events
    BadObserverFlags,
    /// Unregistering an observer that is not the registered one
    UnknownObserver,
}

/// Error category reported to callers alongside a numeric code
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorKind {
    InvalidBinary = 1,
    OutOfMemory,
    InvalidParameter,
    InvalidHandle,
    Unsupported,
    Module,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoaderError {
    InvalidBinary(BinaryFault),
    /// `available` is None when the allocator could not supply memory, or
    /// the size of a caller buffer that was too small
    OutOfMemory {
        required: usize,
        available: Option<usize>,
    },
    InvalidParameter(ParameterFault),
    /// The network is not installed, was destroyed, or its image no longer
    /// shows a valid header
    InvalidHandle,
    /// The module does not export this optional entry point
    Unsupported(Entry),
    /// Reported by the module itself, passed through untouched
    Module(ModuleError),
}

pub type LoaderResult<T> = Result<T, LoaderError>;

impl LoaderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoaderError::InvalidBinary(_) => ErrorKind::InvalidBinary,
            LoaderError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            LoaderError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            LoaderError::InvalidHandle => ErrorKind::InvalidHandle,
            LoaderError::Unsupported(_) => ErrorKind::Unsupported,
            LoaderError::Module(_) => ErrorKind::Module,
        }
    }

    /// Numeric detail for the error's kind. Module errors return the module's
    /// packed error word.
    pub fn code(&self) -> u32 {
        match self {
            LoaderError::InvalidBinary(fault) => *fault as u32,
            LoaderError::OutOfMemory {
                available: None, ..
            } => 1,
            LoaderError::OutOfMemory { .. } => 2,
            LoaderError::InvalidParameter(fault) => *fault as u32,
            LoaderError::InvalidHandle => 1,
            LoaderError::Unsupported(entry) => entry.index() as u32,
            LoaderError::Module(err) => err.into_raw(),
        }
    }

    /// The `(kind, code)` pair handed across the scripting boundary
    pub fn pair(&self) -> (ErrorKind, u32) {
        (self.kind(), self.code())
    }

    /// Whether retrying with a larger buffer could succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LoaderError::OutOfMemory { .. })
    }

    pub fn message(&self) -> &'static str {
        match self {
            LoaderError::InvalidBinary(fault) => match fault {
                BinaryFault::BadMagic => "image has a bad magic number",
                BinaryFault::Misaligned => "image is not 4-byte aligned",
                BinaryFault::Truncated => "image is truncated",
                BinaryFault::BadSection => "image has an invalid section table",
                BinaryFault::MissingEntry => "image lacks a required entry point",
                BinaryFault::BadEntry => "entry point lies outside the code section",
                BinaryFault::BadName => "model name is malformed",
                BinaryFault::BadContext => "runtime context does not fit in RAM",
                BinaryFault::BadRelocation => "relocation data is corrupt",
                BinaryFault::CpuMismatch => "image was built for another processor",
                BinaryFault::FpuUnavailable => "image requires the FPU",
                BinaryFault::VersionMismatch => "image was built for another loader ABI",
            },
            LoaderError::OutOfMemory {
                available: None, ..
            } => "allocation failed",
            LoaderError::OutOfMemory { .. } => "buffer is too small",
            LoaderError::InvalidParameter(fault) => match fault {
                ParameterFault::MisalignedBuffer => "buffer is not 4-byte aligned",
                ParameterFault::MissingWeights => "no weight buffers were given",
                ParameterFault::MissingActivations => "no activation buffers were given",
                ParameterFault::BadObserverFlags => "observer flags are invalid",
                ParameterFault::UnknownObserver => "observer is not registered",
            },
            LoaderError::InvalidHandle => "network handle is not valid",
            LoaderError::Unsupported(_) => "entry point is not provided by the module",
            LoaderError::Module(_) => "module reported an error",
        }
    }
}

impl core::fmt::Display for LoaderError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LoaderError::OutOfMemory {
                required,
                available: Some(available),
            } => write!(f, "{} ({:#x} < {:#x})", self.message(), available, required),
            LoaderError::OutOfMemory { required, .. } => {
                write!(f, "{} ({:#x} bytes)", self.message(), required)
            }
            LoaderError::Unsupported(entry) => write!(f, "{}: {}", self.message(), entry.name()),
            LoaderError::Module(err) => write!(
                f,
                "{} (type {:#04x}, code {:#x})",
                self.message(),
                err.kind,
                err.code
            ),
            _ => f.write_str(self.message()),
        }
    }
}
