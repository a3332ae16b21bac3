use std::io::{self, Write};
use std::sync::Mutex;

use netload::binary::Descriptor;
use netload::compat::{self, StaticProcessor};
use netload::log::{self, LogSink};
use netload::planner::{self, LoadMode, NoAllocator};
use netload::relocation::{self, SiteKind, Slot};
use netload::{LoaderConfig, LoaderError, RuntimeContext};
use netload_api::entry::Entry;
use netload_api::flags::cpu;
use netload_api::image::{self, Section, MAGIC};

use crate::parse::{parse_log_line, LogEntry};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Group {
    Header,
    Sections,
    Entries,
    Relocations,
    Target,
}

impl Group {
    pub const ALL: [Group; 5] = [
        Group::Header,
        Group::Sections,
        Group::Entries,
        Group::Relocations,
        Group::Target,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Group::Header => "Header",
            Group::Sections => "Sections",
            Group::Entries => "Entries",
            Group::Relocations => "Relocations",
            Group::Target => "Target",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    Note,
    Fault,
}

pub struct Row {
    pub group: Group,
    pub label: String,
    pub value: String,
    pub status: Status,
}

/// Processor to check the image against. Without a part number the image's
/// own is assumed, which leaves only the FPU and version checks.
pub struct Target {
    pub part: Option<u16>,
    pub fpu: bool,
}

pub struct Report {
    pub name: String,
    pub rows: Vec<Row>,
    pub log: Vec<LogEntry>,
    pub verdict: Result<(), LoaderError>,
}

/// Copy of an image at word alignment, as it would sit in flash
pub struct AlignedImage {
    words: Vec<u64>,
    len: usize,
}

impl AlignedImage {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut image = Self::zeroed(bytes.len());
        image.bytes_mut().copy_from_slice(bytes);
        image
    }

    fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(8)],
            len,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, self.len) }
    }
}

struct Capture;

static CAPTURED: Mutex<Vec<String>> = Mutex::new(Vec::new());
static CAPTURE: Capture = Capture;

impl LogSink for Capture {
    fn write_line(&self, args: std::fmt::Arguments) {
        if let Ok(mut lines) = CAPTURED.lock() {
            lines.push(args.to_string());
        }
    }
}

fn take_log() -> Vec<LogEntry> {
    match CAPTURED.lock() {
        Ok(mut lines) => lines.drain(..).map(|line| parse_log_line(&line)).collect(),
        Err(_) => Vec::new(),
    }
}

impl Report {
    fn push(&mut self, group: Group, label: impl Into<String>, value: impl Into<String>, status: Status) {
        self.rows.push(Row {
            group,
            label: label.into(),
            value: value.into(),
            status,
        });
    }

    pub fn rows_in(&self, group: Group) -> impl Iterator<Item = &Row> {
        self.rows.iter().filter(move |row| row.group == group)
    }

    pub fn faults(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| row.status == Status::Fault)
            .count()
    }

    pub fn summary(&self) -> String {
        match &self.verdict {
            Ok(()) => format!("{}: loadable", self.name),
            Err(err) => format!("{}: {} ({} faults)", self.name, err, self.faults()),
        }
    }

    pub fn write_plain<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", self.summary())?;
        for group in Group::ALL {
            let mut rows = self.rows_in(group).peekable();
            if rows.peek().is_none() {
                continue;
            }
            writeln!(out, "== {} ==", group.title())?;
            for row in rows {
                let mark = match row.status {
                    Status::Ok => ' ',
                    Status::Note => '~',
                    Status::Fault => '!',
                };
                writeln!(out, "{} {:<18} {}", mark, row.label, row.value)?;
            }
        }
        if !self.log.is_empty() {
            writeln!(out, "== Loader log ==")?;
            for entry in &self.log {
                writeln!(out, "  {:<8}: {}", entry.tag, entry.message)?;
            }
        }
        Ok(())
    }
}

pub fn inspect(image: &[u8], target: &Target, file_name: &str) -> Report {
    log::set_sink(&CAPTURE);
    take_log();

    let mut report = Report {
        name: file_name.to_string(),
        rows: Vec::new(),
        log: Vec::new(),
        verdict: Ok(()),
    };

    match image::read_word(image, image::MAGIC_OFFSET) {
        Some(MAGIC) => report.push(Group::Header, "magic", format!("{:#010x}", MAGIC), Status::Ok),
        Some(other) => report.push(Group::Header, "magic", format!("{:#010x}", other), Status::Fault),
        None => report.push(Group::Header, "magic", "missing", Status::Fault),
    }

    let desc = match Descriptor::parse(image) {
        Ok(desc) => desc,
        Err(err) => {
            report.push(Group::Header, "structure", err.to_string(), Status::Fault);
            report.verdict = Err(err);
            return report;
        }
    };
    if !desc.name().is_empty() {
        report.name = format!("{} ({})", file_name, desc.name());
    }

    describe_header(&mut report, &desc);
    describe_sections(&mut report, &desc);
    describe_entries(&mut report, &desc);
    describe_relocations(&mut report, &desc);
    report.verdict = check_target(&mut report, &desc, target);
    report.log = take_log();
    report
}

fn describe_header(report: &mut Report, desc: &Descriptor) {
    let flags = desc.flags();
    let info = desc.info();
    let part = flags.cpu_id();
    let cpu_name = cpu::name(part).unwrap_or("unknown core");
    report.push(Group::Header, "name", info.name, Status::Ok);
    report.push(Group::Header, "flags", format!("{:#010x}", flags.as_u32()), Status::Ok);
    report.push(Group::Header, "cpu", format!("{} ({:#05x})", cpu_name, part), Status::Ok);
    report.push(
        Group::Header,
        "fpu",
        format!("{} ({:?} ABI)", if flags.requires_fpu() { "required" } else { "unused" }, flags.fp_abi()),
        Status::Ok,
    );
    report.push(Group::Header, "toolchain", format!("{:?}", flags.toolchain()), Status::Ok);
    report.push(Group::Header, "abi version", flags.version().to_string(), Status::Ok);
    report.push(Group::Header, "code size", format!("{:#x}", info.code_size), Status::Ok);
    report.push(Group::Header, "ram (in place)", format!("{:#x}", info.ram_size_xip), Status::Ok);
    report.push(Group::Header, "ram (copied)", format!("{:#x}", info.ram_size_copy), Status::Ok);
    report.push(Group::Header, "weights", format!("{:#x} bytes", info.weights_size()), Status::Ok);
    report.push(Group::Header, "activations", format!("{:#x} bytes", info.activations_size), Status::Ok);
    report.push(Group::Header, "context", format!("RAM+{:#x}", desc.context_offset()), Status::Ok);
}

fn describe_sections(report: &mut Report, desc: &Descriptor) {
    for section in Section::ALL {
        let domain = if section.is_ram_relative() { "RAM" } else { "ROM" };
        report.push(
            Group::Sections,
            section.name(),
            format!("{}+{:#x}", domain, desc.sections().get(section)),
            Status::Ok,
        );
    }
}

fn describe_entries(report: &mut Report, desc: &Descriptor) {
    for entry in Entry::ALL {
        match desc.entries().offset(entry) {
            Some(offset) => report.push(Group::Entries, entry.name(), format!("ROM+{:#x}", offset), Status::Ok),
            None => report.push(Group::Entries, entry.name(), "not exported", Status::Note),
        }
    }
}

fn describe_relocations(report: &mut Report, desc: &Descriptor) {
    let limits = planner::limits(desc, LoadMode::ExecuteInPlace);
    for site in relocation::sites(desc) {
        let kind = match site.kind {
            SiteKind::Got => "GOT",
            SiteKind::Relocation => "REL",
        };
        let label = format!("{} RAM+{:#x}", kind, site.ram_offset);
        let raw = match desc.initial_ram_word(site.ram_offset) {
            Some(raw) if site.ram_offset % 4 == 0 => raw,
            _ => {
                report.push(Group::Relocations, label, "target outside RAM", Status::Fault);
                continue;
            }
        };
        match Slot::classify(raw, &limits) {
            Ok(Slot::Null) => report.push(Group::Relocations, label, "null", Status::Note),
            Ok(Slot::Ram(offset)) => {
                report.push(Group::Relocations, label, format!("{:#010x} -> RAM+{:#x}", raw, offset), Status::Ok)
            }
            Ok(Slot::Rom(offset)) => {
                report.push(Group::Relocations, label, format!("{:#010x} -> ROM+{:#x}", raw, offset), Status::Ok)
            }
            Err(_) => report.push(Group::Relocations, label, format!("{:#010x} -> bad tag or offset", raw), Status::Fault),
        }
    }
    if report.rows_in(Group::Relocations).next().is_none() {
        report.push(Group::Relocations, "(none)", "position independent without fixups", Status::Note);
    }
}

/// Run the compatibility check and a trial installation into a scratch
/// buffer. No module code is executed.
fn check_target(report: &mut Report, desc: &Descriptor, target: &Target) -> Result<(), LoaderError> {
    let part = target.part.unwrap_or(desc.flags().cpu_id());
    let processor = StaticProcessor::new(part, target.fpu);
    let config = LoaderConfig::new().with_relocation_trace(true);
    report.push(
        Group::Target,
        "processor",
        format!("{} ({:#05x}), FPU {}", cpu::name(part).unwrap_or("unknown core"), part, if target.fpu { "on" } else { "off" }),
        Status::Ok,
    );

    if let Err(err) = compat::check(desc.flags(), &processor, &config) {
        report.push(Group::Target, "compatibility", err.to_string(), Status::Fault);
        return Err(err);
    }
    report.push(Group::Target, "compatibility", "ok", Status::Ok);

    // start the scratch region where the host's runtime context lands aligned;
    // images only guarantee the device alignment
    let align = std::mem::align_of::<RuntimeContext>();
    let shift = (align - desc.context_offset() as usize % align) % align;
    let required = planner::required_size(desc, LoadMode::ExecuteInPlace);
    let mut scratch = AlignedImage::zeroed(required + shift);
    let installed = unsafe {
        planner::install(
            desc,
            Some(&mut scratch.bytes_mut()[shift..]),
            LoadMode::ExecuteInPlace,
            &NoAllocator,
            &processor,
            &config,
        )
    };
    match installed {
        Ok(handle) => {
            report.push(Group::Target, "trial install", format!("context at {:?}", handle), Status::Ok);
            Ok(())
        }
        Err(err) => {
            report.push(Group::Target, "trial install", err.to_string(), Status::Fault);
            Err(err)
        }
    }
}
