use netload_api::build::ImageBuilder;
use netload_api::entry::Entry;
use netload_api::flags::{cpu, AbiVersion, FpAbi, ImageFlags};

/// Byte storage with 8-byte alignment, standing in for flash or a RAM buffer
pub struct AlignedBytes {
    words: Vec<u64>,
    len: usize,
}

impl AlignedBytes {
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0; (len + 7) / 8],
            len,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, self.len) }
    }
}

impl From<Vec<u8>> for AlignedBytes {
    fn from(bytes: Vec<u8>) -> Self {
        let mut out = Self::zeroed(bytes.len());
        out.as_mut_slice().copy_from_slice(&bytes);
        out
    }
}

pub fn sample_flags() -> ImageFlags {
    ImageFlags::new(AbiVersion::CURRENT, cpu::CORTEX_M7, true, FpAbi::Hard)
}

/// Builder preloaded with every required entry point
pub fn sample_builder() -> ImageBuilder {
    let mut builder = ImageBuilder::new(sample_flags());
    for (i, entry) in Entry::ALL.iter().enumerate() {
        if entry.is_required() {
            builder.entry(*entry, &(0xf00d_0000u32 | i as u32).to_le_bytes());
        }
    }
    builder.name("sample");
    builder.activations(0x400);
    builder
}
