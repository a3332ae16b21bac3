//! Binary descriptor: header and section table of a network image.
//!
//! Everything here reads the image through its slice; nothing is installed or
//! executed. The sizes reported by `ModelInfo` are what a caller needs to
//! pick a buffer before calling `Loader::load`.

use core::ffi::CStr;

use netload_api::entry::{Entry, ENTRY_COUNT};
use netload_api::flags::ImageFlags;
use netload_api::image::{
    self, align4, Section, CONTEXT_ALIGN, CONTEXT_SIZE, HEADER_SIZE, IMAGE_ALIGNMENT, MAGIC,
};
use netload_api::tag;

use crate::address::is_ptr_aligned;
use crate::error::{BinaryFault, LoaderError, LoaderResult};

/// Section offsets with their domain tags removed
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SectionTable {
    pub data_start: u32,
    pub data_end: u32,
    pub data_data: u32,
    pub bss_start: u32,
    pub bss_end: u32,
    pub got_start: u32,
    pub got_end: u32,
    pub rel_start: u32,
    pub rel_end: u32,
    pub weights_start: u32,
    pub weights_end: u32,
}

impl SectionTable {
    fn read(image: &[u8]) -> Self {
        let field = |section: Section| {
            tag::offset_of(image::read_word(image, section.header_offset()).unwrap_or(0))
        };
        Self {
            data_start: field(Section::DataStart),
            data_end: field(Section::DataEnd),
            data_data: field(Section::DataData),
            bss_start: field(Section::BssStart),
            bss_end: field(Section::BssEnd),
            got_start: field(Section::GotStart),
            got_end: field(Section::GotEnd),
            rel_start: field(Section::RelStart),
            rel_end: field(Section::RelEnd),
            weights_start: field(Section::WeightsStart),
            weights_end: field(Section::WeightsEnd),
        }
    }

    pub fn get(&self, section: Section) -> u32 {
        match section {
            Section::DataStart => self.data_start,
            Section::DataEnd => self.data_end,
            Section::DataData => self.data_data,
            Section::BssStart => self.bss_start,
            Section::BssEnd => self.bss_end,
            Section::GotStart => self.got_start,
            Section::GotEnd => self.got_end,
            Section::RelStart => self.rel_start,
            Section::RelEnd => self.rel_end,
            Section::WeightsStart => self.weights_start,
            Section::WeightsEnd => self.weights_end,
        }
    }

    pub fn data_len(&self) -> u32 {
        self.data_end - self.data_start
    }

    pub fn bss_len(&self) -> u32 {
        self.bss_end - self.bss_start
    }

    pub fn got_len(&self) -> u32 {
        self.got_end - self.got_start
    }

    pub fn rel_len(&self) -> u32 {
        self.rel_end - self.rel_start
    }

    pub fn weights_len(&self) -> u32 {
        self.weights_end - self.weights_start
    }
}

/// ROM offsets of the module's entry points; 0 marks an absent entry
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct EntryVector {
    offsets: [u32; ENTRY_COUNT],
}

impl EntryVector {
    pub const fn empty() -> Self {
        Self {
            offsets: [0; ENTRY_COUNT],
        }
    }

    fn read(image: &[u8]) -> Self {
        let mut offsets = [0; ENTRY_COUNT];
        for entry in Entry::ALL {
            let word = image::read_word(image, entry.header_offset()).unwrap_or(0);
            offsets[entry.index()] = tag::offset_of(word);
        }
        Self { offsets }
    }

    pub fn offset(&self, entry: Entry) -> Option<u32> {
        match self.offsets[entry.index()] {
            0 => None,
            offset => Some(offset),
        }
    }
}

/// Sizing and identification of a module, available before installation
#[derive(Copy, Clone, Debug)]
pub struct ModelInfo<'a> {
    pub name: &'a str,
    /// Weights embedded in the image, passed back to `Network::init`
    pub weights: &'a [u8],
    pub activations_size: u32,
    pub code_size: u32,
    pub ram_size_xip: u32,
    pub ram_size_copy: u32,
    pub flags: ImageFlags,
}

impl<'a> ModelInfo<'a> {
    pub fn weights_address(&self) -> *const u8 {
        self.weights.as_ptr()
    }

    pub fn weights_size(&self) -> usize {
        self.weights.len()
    }
}

/// A parsed, structurally checked image
#[derive(Copy, Clone, Debug)]
pub struct Descriptor<'a> {
    image: &'a [u8],
    flags: ImageFlags,
    sections: SectionTable,
    entries: EntryVector,
    context: u32,
    name: &'a str,
    activations_size: u32,
}

/// Checks the magic word and the alignment of the image base
pub fn validate(image: &[u8]) -> bool {
    is_ptr_aligned(image.as_ptr(), IMAGE_ALIGNMENT)
        && image::read_word(image, image::MAGIC_OFFSET) == Some(MAGIC)
}

pub fn get_info(image: &[u8]) -> LoaderResult<ModelInfo<'_>> {
    Descriptor::parse(image).map(|desc| desc.info())
}

fn invalid(fault: BinaryFault) -> LoaderError {
    LoaderError::InvalidBinary(fault)
}

impl<'a> Descriptor<'a> {
    pub fn parse(image: &'a [u8]) -> LoaderResult<Self> {
        if !is_ptr_aligned(image.as_ptr(), IMAGE_ALIGNMENT) {
            return Err(invalid(BinaryFault::Misaligned));
        }
        match image::read_word(image, image::MAGIC_OFFSET) {
            None => return Err(invalid(BinaryFault::Truncated)),
            Some(MAGIC) => (),
            Some(_) => return Err(invalid(BinaryFault::BadMagic)),
        }
        if image.len() < HEADER_SIZE {
            return Err(invalid(BinaryFault::Truncated));
        }

        let word = |offset| image::read_word(image, offset).unwrap_or(0);
        let mut desc = Self {
            image,
            flags: ImageFlags::from_raw(word(image::FLAGS_OFFSET)),
            sections: SectionTable::read(image),
            entries: EntryVector::read(image),
            context: tag::offset_of(word(image::CONTEXT_OFFSET)),
            name: "",
            activations_size: word(image::ACTIVATIONS_OFFSET),
        };
        desc.check_sections()?;
        desc.check_entries()?;
        desc.check_context()?;
        desc.name = desc.read_name(word(image::MODEL_NAME_OFFSET))?;
        Ok(desc)
    }

    fn check_sections(&self) -> LoaderResult<()> {
        let s = &self.sections;
        let ordered = s.data_start <= s.data_end
            && s.bss_start <= s.bss_end
            && s.got_start <= s.got_end
            && s.rel_start <= s.rel_end
            && s.weights_start <= s.weights_end;
        if !ordered || (s.data_data as usize) < HEADER_SIZE {
            return Err(invalid(BinaryFault::BadSection));
        }

        let len = self.image.len();
        if (s.data_data + s.data_len()) as usize > len
            || s.rel_end as usize > len
            || s.weights_end as usize > len
        {
            return Err(invalid(BinaryFault::Truncated));
        }
        if s.rel_start % 4 != 0 || s.rel_len() % 4 != 0 {
            return Err(invalid(BinaryFault::BadSection));
        }

        let ram = self.ram_size_xip();
        if s.data_end > ram || s.got_end > ram {
            return Err(invalid(BinaryFault::BadSection));
        }
        if s.got_start % 4 != 0 || s.got_len() % 4 != 0 {
            return Err(invalid(BinaryFault::BadSection));
        }
        Ok(())
    }

    fn check_entries(&self) -> LoaderResult<()> {
        let code_size = self.code_size();
        for entry in Entry::ALL {
            match self.entries.offset(entry) {
                None if entry.is_required() => {
                    return Err(invalid(BinaryFault::MissingEntry));
                }
                None => (),
                Some(offset) => {
                    // the low bit is the Thumb state bit, not part of the address
                    let address = offset & !1;
                    if (address as usize) < HEADER_SIZE || address >= code_size {
                        return Err(invalid(BinaryFault::BadEntry));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_context(&self) -> LoaderResult<()> {
        let end = self.context as usize + CONTEXT_SIZE as usize;
        if self.context % CONTEXT_ALIGN != 0 || end > self.ram_size_xip() as usize {
            return Err(invalid(BinaryFault::BadContext));
        }
        Ok(())
    }

    fn read_name(&self, word: u32) -> LoaderResult<&'a str> {
        if word == 0 {
            return Ok("");
        }
        let image: &'a [u8] = self.image;
        let bytes = image
            .get(tag::offset_of(word) as usize..)
            .ok_or(invalid(BinaryFault::BadName))?;
        CStr::from_bytes_until_nul(bytes)
            .ok()
            .and_then(|name| name.to_str().ok())
            .ok_or(invalid(BinaryFault::BadName))
    }

    pub fn image(&self) -> &'a [u8] {
        self.image
    }

    pub fn flags(&self) -> ImageFlags {
        self.flags
    }

    pub fn sections(&self) -> &SectionTable {
        &self.sections
    }

    pub fn entries(&self) -> &EntryVector {
        &self.entries
    }

    /// RAM offset of the runtime context
    pub fn context_offset(&self) -> u32 {
        self.context
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn activations_size(&self) -> u32 {
        self.activations_size
    }

    /// Code and read-only data, header included, that a full copy moves to RAM
    pub fn code_size(&self) -> u32 {
        align4(self.sections.data_data)
    }

    /// RAM needed when code executes from the image
    pub fn ram_size_xip(&self) -> u32 {
        align4(self.sections.bss_end)
    }

    /// RAM needed when code and data are both copied
    pub fn ram_size_copy(&self) -> u32 {
        self.ram_size_xip() + self.code_size()
    }

    pub fn weights(&self) -> &'a [u8] {
        let image: &'a [u8] = self.image;
        &image[self.sections.weights_start as usize..self.sections.weights_end as usize]
    }

    /// Initial contents of .data, copied to RAM at `data_start`
    pub fn data_image(&self) -> &'a [u8] {
        let image: &'a [u8] = self.image;
        let start = self.sections.data_data as usize;
        &image[start..start + self.sections.data_len() as usize]
    }

    /// RAM offsets listed in the relocation table
    pub fn relocation_table(&self) -> impl Iterator<Item = u32> + 'a {
        let image: &'a [u8] = self.image;
        image[self.sections.rel_start as usize..self.sections.rel_end as usize]
            .chunks_exact(4)
            .map(|raw| tag::offset_of(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])))
    }

    /// Word found at a RAM offset right after installation and before
    /// relocation: .data comes from the image, everything else is zero.
    /// None if the word does not fit in RAM.
    pub fn initial_ram_word(&self, offset: u32) -> Option<u32> {
        let offset = offset as usize;
        if offset + 4 > self.ram_size_xip() as usize {
            return None;
        }
        let data = self.data_image();
        let data_start = self.sections.data_start as usize;
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let at = offset + i;
            if at >= data_start && at - data_start < data.len() {
                *byte = data[at - data_start];
            }
        }
        Some(u32::from_le_bytes(bytes))
    }

    pub fn info(&self) -> ModelInfo<'a> {
        ModelInfo {
            name: self.name,
            weights: self.weights(),
            activations_size: self.activations_size,
            code_size: self.code_size(),
            ram_size_xip: self.ram_size_xip(),
            ram_size_copy: self.ram_size_copy(),
            flags: self.flags,
        }
    }
}
