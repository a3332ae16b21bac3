//! Fixed layout of a relocatable network binary.
//!
//! All fields are little-endian 32-bit words. The header is followed directly
//! by code and read-only data; the initial image of `.data`, the relocation
//! table and the weights follow at the offsets recorded in the section table.
//!
//! ```text
//! 0x00  magic
//! 0x04  flags
//! 0x08  section table (11 words)
//! 0x34  entry vector (11 words)
//! 0x60  runtime context offset (RAM)
//! 0x64  model name offset (ROM, 0 if unnamed)
//! 0x68  activation bytes required
//! 0x6C  code + rodata ...
//! ```

/// Every valid image starts with this word
pub const MAGIC: u32 = 0xA1FA_CADE;

/// Required alignment of the image base and of every installation buffer
pub const IMAGE_ALIGNMENT: usize = 4;

pub const MAGIC_OFFSET: usize = 0x00;
pub const FLAGS_OFFSET: usize = 0x04;
pub const SECTIONS_OFFSET: usize = 0x08;
pub const SECTION_WORDS: usize = 11;
pub const ENTRIES_OFFSET: usize = SECTIONS_OFFSET + SECTION_WORDS * 4;
pub const CONTEXT_OFFSET: usize = ENTRIES_OFFSET + crate::entry::ENTRY_COUNT * 4;
pub const MODEL_NAME_OFFSET: usize = CONTEXT_OFFSET + 4;
pub const ACTIVATIONS_OFFSET: usize = MODEL_NAME_OFFSET + 4;

/// Size of the fixed header; code begins here
pub const HEADER_SIZE: usize = ACTIVATIONS_OFFSET + 4;

/// Bytes an image must reserve at its context offset. This is the size of
/// the loader's runtime context on a 32-bit device.
pub const CONTEXT_SIZE: u32 = 120;
/// Required alignment of the context offset within RAM
pub const CONTEXT_ALIGN: u32 = 4;

/// Index of each word within the section table
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum Section {
    DataStart = 0,
    DataEnd,
    DataData,
    BssStart,
    BssEnd,
    GotStart,
    GotEnd,
    RelStart,
    RelEnd,
    WeightsStart,
    WeightsEnd,
}

impl Section {
    pub const ALL: [Section; SECTION_WORDS] = [
        Section::DataStart,
        Section::DataEnd,
        Section::DataData,
        Section::BssStart,
        Section::BssEnd,
        Section::GotStart,
        Section::GotEnd,
        Section::RelStart,
        Section::RelEnd,
        Section::WeightsStart,
        Section::WeightsEnd,
    ];

    /// Byte offset of this word within the image
    pub const fn header_offset(self) -> usize {
        SECTIONS_OFFSET + (self as usize) * 4
    }

    pub const fn name(self) -> &'static str {
        match self {
            Section::DataStart => "data_start",
            Section::DataEnd => "data_end",
            Section::DataData => "data_data",
            Section::BssStart => "bss_start",
            Section::BssEnd => "bss_end",
            Section::GotStart => "got_start",
            Section::GotEnd => "got_end",
            Section::RelStart => "rel_start",
            Section::RelEnd => "rel_end",
            Section::WeightsStart => "weights_start",
            Section::WeightsEnd => "weights_end",
        }
    }

    /// Whether the offset stored in this word is relative to the RAM region.
    /// The rest are relative to the image itself.
    pub const fn is_ram_relative(self) -> bool {
        matches!(
            self,
            Section::DataStart
                | Section::DataEnd
                | Section::BssStart
                | Section::BssEnd
                | Section::GotStart
                | Section::GotEnd
        )
    }
}

/// Read a little-endian word at a byte offset, if it lies entirely inside
/// `bytes`.
pub fn read_word(bytes: &[u8], offset: usize) -> Option<u32> {
    let end = offset.checked_add(4)?;
    let raw = bytes.get(offset..end)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Write a little-endian word at a byte offset. Returns false if the word
/// would not fit.
pub fn write_word(bytes: &mut [u8], offset: usize, value: u32) -> bool {
    let end = match offset.checked_add(4) {
        Some(end) => end,
        None => return false,
    };
    match bytes.get_mut(offset..end) {
        Some(slot) => {
            slot.copy_from_slice(&value.to_le_bytes());
            true
        }
        None => false,
    }
}

/// Round up to the next multiple of four
pub const fn align4(value: u32) -> u32 {
    (value + 3) & !3
}
