//! Host-side assembly of network images.
//!
//! Produces images with the same layout a module toolchain emits, which is
//! enough for tooling and for exercising the loader without a cross compiler.
//! The RAM image places initialized data words first and GOT words after
//! them, followed by .bss and finally the space reserved for the runtime
//! context.

use alloc::string::String;
use alloc::vec::Vec;

use crate::entry::{Entry, ENTRY_COUNT};
use crate::flags::ImageFlags;
use crate::image::{self, Section, HEADER_SIZE, MAGIC};
use crate::tag::Domain;

/// Default space reserved for the runtime context at the end of .bss
pub const DEFAULT_CONTEXT_RESERVE: u32 = 256;

pub struct ImageBuilder {
    flags: ImageFlags,
    code: Vec<u8>,
    entries: [u32; ENTRY_COUNT],
    name: Option<String>,
    data: Vec<u32>,
    got: Vec<u32>,
    relocations: Vec<u32>,
    bss: u32,
    context_reserve: u32,
    activations: u32,
    weights: Vec<u8>,
}

impl ImageBuilder {
    pub fn new(flags: ImageFlags) -> Self {
        Self {
            flags,
            code: Vec::new(),
            entries: [0; ENTRY_COUNT],
            name: None,
            data: Vec::new(),
            got: Vec::new(),
            relocations: Vec::new(),
            bss: 0,
            context_reserve: DEFAULT_CONTEXT_RESERVE,
            activations: 0,
            weights: Vec::new(),
        }
    }

    /// Append code for an entry point and record its offset in the vector.
    /// Returns the ROM offset of the entry.
    pub fn entry(&mut self, entry: Entry, code: &[u8]) -> u32 {
        let offset = self.code_offset();
        self.code.extend_from_slice(code);
        self.pad_code();
        self.entries[entry.index()] = offset;
        offset
    }

    /// Append bytes to the code/rodata section, returning their ROM offset
    pub fn code(&mut self, bytes: &[u8]) -> u32 {
        let offset = self.code_offset();
        self.code.extend_from_slice(bytes);
        self.pad_code();
        offset
    }

    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = Some(String::from(name));
        self
    }

    /// Append an initialized data word, returning its RAM offset
    pub fn data_word(&mut self, raw: u32) -> u32 {
        self.data.push(raw);
        (self.data.len() as u32 - 1) * 4
    }

    /// Append a data word and list it in the relocation table
    pub fn relocated_word(&mut self, raw: u32) -> u32 {
        let offset = self.data_word(raw);
        self.relocate(offset);
        offset
    }

    /// Append a GOT slot. GOT offsets depend on the final amount of data, so
    /// use `got_offset` once all data words have been added.
    pub fn got_word(&mut self, raw: u32) -> usize {
        self.got.push(raw);
        self.got.len() - 1
    }

    pub fn got_offset(&self, index: usize) -> u32 {
        (self.data.len() + index) as u32 * 4
    }

    /// List a RAM offset in the relocation table
    pub fn relocate(&mut self, ram_offset: u32) -> &mut Self {
        self.relocations.push(ram_offset);
        self
    }

    pub fn bss(&mut self, len: u32) -> &mut Self {
        self.bss = len;
        self
    }

    pub fn context_reserve(&mut self, len: u32) -> &mut Self {
        self.context_reserve = len;
        self
    }

    pub fn activations(&mut self, len: u32) -> &mut Self {
        self.activations = len;
        self
    }

    pub fn weights(&mut self, bytes: &[u8]) -> &mut Self {
        self.weights = Vec::from(bytes);
        self
    }

    /// RAM offset of the runtime context in the image that `build` produces
    pub fn context_offset(&self) -> u32 {
        align8(self.data_end() + image::align4(self.bss))
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();
        out.resize(HEADER_SIZE, 0);
        out.extend_from_slice(&self.code);

        let name_offset = match &self.name {
            Some(name) => {
                let offset = out.len() as u32;
                out.extend_from_slice(name.as_bytes());
                out.push(0);
                Domain::Rom.encode(offset)
            }
            None => 0,
        };

        // Keep the code prefix a multiple of 8 so that a copied RAM image
        // stays as aligned as its buffer.
        pad_to(&mut out, 8);
        let data_data = out.len() as u32;
        for word in self.data.iter().chain(self.got.iter()) {
            out.extend_from_slice(&word.to_le_bytes());
        }

        let rel_start = out.len() as u32;
        for offset in &self.relocations {
            out.extend_from_slice(&offset.to_le_bytes());
        }
        let rel_end = out.len() as u32;

        let weights_start = out.len() as u32;
        out.extend_from_slice(&self.weights);
        let weights_end = out.len() as u32;
        pad_to(&mut out, 4);

        let data_end = self.data_end();
        let context = self.context_offset();
        let bss_end = context + self.context_reserve;

        let ram = |offset| Domain::Ram.encode(offset);
        let rom = |offset| Domain::Rom.encode(offset);
        let sections = [
            (Section::DataStart, ram(0)),
            (Section::DataEnd, ram(data_end)),
            (Section::DataData, rom(data_data)),
            (Section::BssStart, ram(data_end)),
            (Section::BssEnd, ram(bss_end)),
            (Section::GotStart, ram(self.data.len() as u32 * 4)),
            (Section::GotEnd, ram(data_end)),
            (Section::RelStart, rom(rel_start)),
            (Section::RelEnd, rom(rel_end)),
            (Section::WeightsStart, rom(weights_start)),
            (Section::WeightsEnd, rom(weights_end)),
        ];

        image::write_word(&mut out, image::MAGIC_OFFSET, MAGIC);
        image::write_word(&mut out, image::FLAGS_OFFSET, self.flags.as_u32());
        for (section, value) in sections {
            image::write_word(&mut out, section.header_offset(), value);
        }
        for entry in Entry::ALL {
            let offset = self.entries[entry.index()];
            let value = if offset == 0 { 0 } else { rom(offset) };
            image::write_word(&mut out, entry.header_offset(), value);
        }
        image::write_word(&mut out, image::CONTEXT_OFFSET, ram(context));
        image::write_word(&mut out, image::MODEL_NAME_OFFSET, name_offset);
        image::write_word(&mut out, image::ACTIVATIONS_OFFSET, self.activations);
        out
    }

    fn code_offset(&self) -> u32 {
        (HEADER_SIZE + self.code.len()) as u32
    }

    fn pad_code(&mut self) {
        pad_to(&mut self.code, 4);
    }

    fn data_end(&self) -> u32 {
        (self.data.len() + self.got.len()) as u32 * 4
    }
}

fn pad_to(bytes: &mut Vec<u8>, align: usize) {
    while bytes.len() % align != 0 {
        bytes.push(0);
    }
}

const fn align8(value: u32) -> u32 {
    (value + 7) & !7
}
