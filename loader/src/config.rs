use netload_api::flags::AbiVersion;

/// Board-level settings for a `Loader`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LoaderConfig {
    /// ABI implemented by this loader; modules built for a newer minor or a
    /// different major are rejected
    pub version: AbiVersion,
    /// Reject modules that use the FPU when the processor reports it
    /// disabled. Boards that enable the FPU lazily, after loading, clear this.
    pub enforce_fpu: bool,
    /// Log every rewritten slot while relocating
    pub trace_relocations: bool,
}

impl LoaderConfig {
    pub const fn new() -> Self {
        Self {
            version: AbiVersion::CURRENT,
            enforce_fpu: true,
            trace_relocations: false,
        }
    }

    pub const fn with_version(mut self, version: AbiVersion) -> Self {
        self.version = version;
        self
    }

    pub const fn with_fpu_check(mut self, enforce: bool) -> Self {
        self.enforce_fpu = enforce;
        self
    }

    pub const fn with_relocation_trace(mut self, trace: bool) -> Self {
        self.trace_relocations = trace;
        self
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::new()
    }
}
