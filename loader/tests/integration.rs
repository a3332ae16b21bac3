use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::sync::Mutex;

use netload::address::DeviceAddress;
use netload::error::{BinaryFault, ParameterFault};
use netload::log::{self, LogSink};
use netload::{
    get_info, required_size, CallBridge, Descriptor, HeapAllocator, LoadMode, Loader,
    LoaderConfig, LoaderError, NoAllocator, StaticProcessor,
};
use netload_api::build::{ImageBuilder, DEFAULT_CONTEXT_RESERVE};
use netload_api::entry::{Entry, ENTRY_COUNT};
use netload_api::error::ModuleError;
use netload_api::flags::{cpu, AbiVersion, FpAbi, ImageFlags};
use netload_api::image::{read_word, Section};
use netload_api::observer::{ObserverSlot, EVENT_INIT, EVENT_NODE};
use netload_api::tag::{self, Domain};

/// Every entry point in a test image is a single marker word naming the
/// entry, so the fake module can tell which one it was asked to run
const MARKER: u32 = 0xf00d_0000;
const INSTANCE: usize = 0x5eed_0001;

fn marker(entry: Entry) -> [u8; 4] {
    (MARKER | entry.index() as u32).to_le_bytes()
}

/// CallBridge standing in for module code: records each call and answers
/// with configurable results
struct FakeModule {
    calls: [Cell<usize>; ENTRY_COUNT],
    log: RefCell<Vec<(Entry, usize, [usize; 3])>>,
    create_error: Cell<u32>,
    instance: Cell<usize>,
    init_ok: Cell<bool>,
    batches: Cell<i32>,
    error_word: Cell<u32>,
    destroy_result: Cell<usize>,
}

impl FakeModule {
    fn new() -> Self {
        Self {
            calls: Default::default(),
            log: RefCell::new(Vec::new()),
            create_error: Cell::new(0),
            instance: Cell::new(INSTANCE),
            init_ok: Cell::new(true),
            batches: Cell::new(1),
            error_word: Cell::new(0),
            destroy_result: Cell::new(0),
        }
    }

    fn count(&self, entry: Entry) -> usize {
        self.calls[entry.index()].get()
    }

    fn last(&self, entry: Entry) -> Option<(usize, [usize; 3])> {
        self.log
            .borrow()
            .iter()
            .rev()
            .find(|(called, _, _)| *called == entry)
            .map(|(_, base, args)| (*base, *args))
    }
}

impl CallBridge for FakeModule {
    unsafe fn call(&self, entry: usize, global_base: usize, args: [usize; 3]) -> usize {
        let word = std::ptr::read_unaligned((entry & !1) as *const u32);
        assert_eq!(word & 0xffff_0000, MARKER, "{:#x} is not an entry point", entry);
        let entry = Entry::ALL[(word & 0xffff) as usize];
        let count = &self.calls[entry.index()];
        count.set(count.get() + 1);
        self.log.borrow_mut().push((entry, global_base, args));

        match entry {
            Entry::Create => {
                *(args[0] as *mut usize) = self.instance.get();
                self.create_error.get() as usize
            }
            Entry::Init | Entry::InitV2 => self.init_ok.get() as usize,
            Entry::Run | Entry::Forward => self.batches.get() as u32 as usize,
            Entry::Error => self.error_word.get() as usize,
            Entry::Destroy => self.destroy_result.get(),
            Entry::Report
            | Entry::ObserverRegister
            | Entry::ObserverUnregister
            | Entry::ObserverNodeInfo => 1,
        }
    }
}

type TestLoader = Loader<FakeModule, StaticProcessor, HeapAllocator>;

fn loader() -> TestLoader {
    Loader::new(
        FakeModule::new(),
        StaticProcessor::new(cpu::CORTEX_M7, true),
        HeapAllocator::new(),
    )
}

fn flags() -> ImageFlags {
    ImageFlags::new(AbiVersion::CURRENT, cpu::CORTEX_M7, true, FpAbi::Hard)
}

/// A module exporting every entry point
fn module() -> ImageBuilder {
    let mut builder = ImageBuilder::new(flags());
    for entry in Entry::ALL {
        builder.entry(entry, &marker(entry));
    }
    builder.name("person_detect");
    builder.activations(0x800);
    builder.weights(&[0x11; 48]);
    builder
}

/// A module exporting only the required entry points
fn minimal_module() -> ImageBuilder {
    let mut builder = ImageBuilder::new(flags());
    for entry in Entry::ALL.into_iter().filter(|e| e.is_required()) {
        builder.entry(entry, &marker(entry));
    }
    builder
}

/// Byte storage aligned like flash or a linker-placed RAM buffer
struct Aligned {
    words: Vec<u64>,
    len: usize,
}

impl Aligned {
    fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0; (len + 7) / 8],
            len,
        }
    }

    fn filled(len: usize, byte: u8) -> Self {
        let mut out = Self::zeroed(len);
        out.bytes_mut().fill(byte);
        out
    }

    fn from_image(image: Vec<u8>) -> Self {
        let mut out = Self::zeroed(image.len());
        out.bytes_mut().copy_from_slice(&image);
        out
    }

    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, self.len) }
    }

    fn checksum(&self) -> u64 {
        // FNV-1a
        self.bytes().iter().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
            (hash ^ *b as u64).wrapping_mul(0x0000_0100_0000_01b3)
        })
    }
}

fn header_field(image: &[u8], section: Section) -> u32 {
    tag::offset_of(read_word(image, section.header_offset()).unwrap())
}

unsafe extern "C" fn observer(_cookie: usize, _flags: u32, _node: *const c_void) -> u32 {
    0
}

unsafe extern "C" fn other_observer(_cookie: usize, _flags: u32, _node: *const c_void) -> u32 {
    1
}

#[test]
fn info_is_pure_and_deterministic() {
    let image = Aligned::from_image(module().build());
    let before = image.checksum();
    let loader = loader();

    let first = loader.info(image.bytes()).unwrap();
    for _ in 0..8 {
        let again = get_info(image.bytes()).unwrap();
        assert_eq!(again.ram_size_xip, first.ram_size_xip);
        assert_eq!(again.ram_size_copy, first.ram_size_copy);
        assert_eq!(again.code_size, first.code_size);
        assert_eq!(again.activations_size, first.activations_size);
        assert_eq!(again.weights_address(), first.weights_address());
        assert_eq!(again.weights_size(), 48);
        assert_eq!(again.name, "person_detect");
        assert_eq!(again.flags, first.flags);
    }
    assert_eq!(image.checksum(), before);
    assert_eq!(loader.bridge().log.borrow().len(), 0);
}

#[test]
fn sizes_follow_the_section_table() {
    for data in 0..4u32 {
        for got in 0..3u32 {
            for bss in [0u32, 1, 7, 64] {
                for extra in [0u32, 1, 2, 3] {
                    let mut builder = minimal_module();
                    for i in 0..data {
                        builder.data_word(i);
                    }
                    for _ in 0..got {
                        builder.got_word(0);
                    }
                    builder.bss(bss);
                    builder.context_reserve(DEFAULT_CONTEXT_RESERVE + extra);
                    let image = Aligned::from_image(builder.build());

                    let info = get_info(image.bytes()).unwrap();
                    let bss_end = header_field(image.bytes(), Section::BssEnd);
                    let data_data = header_field(image.bytes(), Section::DataData);
                    assert_eq!(info.ram_size_xip, (bss_end + 3) & !3);
                    assert_eq!(info.code_size, (data_data + 3) & !3);
                    assert_eq!(info.ram_size_copy, info.ram_size_xip + info.code_size);
                }
            }
        }
    }
}

#[test]
fn one_byte_short_buffer_is_left_untouched() {
    let mut builder = module();
    builder.relocated_word(Domain::Ram.encode(4));
    builder.got_word(Domain::Rom.encode(0x70));
    let image = Aligned::from_image(builder.build());
    let desc = Descriptor::parse(image.bytes()).unwrap();
    let loader = loader();

    for mode in [LoadMode::ExecuteInPlace, LoadMode::CopyAll] {
        let required = required_size(&desc, mode);
        let mut buffer = Aligned::filled(required - 1, 0xa5);
        let before = buffer.checksum();
        let result = unsafe { loader.load(image.bytes(), Some(buffer.bytes_mut()), mode) };
        assert_eq!(
            result.err(),
            Some(LoaderError::OutOfMemory {
                required,
                available: Some(required - 1)
            })
        );
        assert_eq!(buffer.checksum(), before);
    }
    assert_eq!(loader.bridge().count(Entry::Create), 0);
}

#[test]
fn exact_buffer_with_null_tables_leaves_zeros() {
    let mut builder = module();
    let relocated: Vec<u32> = (0..3).map(|_| builder.relocated_word(0)).collect();
    let got: Vec<usize> = (0..4).map(|_| builder.got_word(0)).collect();
    let got: Vec<u32> = got.into_iter().map(|i| builder.got_offset(i)).collect();
    let image = Aligned::from_image(builder.build());
    let desc = Descriptor::parse(image.bytes()).unwrap();
    let required = required_size(&desc, LoadMode::ExecuteInPlace);
    let mut buffer = Aligned::filled(required, 0xff);
    let ram = buffer.bytes().as_ptr();
    let loader = loader();

    let mut net = unsafe {
        loader
            .load(image.bytes(), Some(buffer.bytes_mut()), LoadMode::ExecuteInPlace)
            .unwrap()
    };
    let ram = unsafe { std::slice::from_raw_parts(ram, required) };
    for offset in relocated.iter().chain(got.iter()) {
        assert_eq!(read_word(ram, *offset as usize), Some(0));
    }
    net.destroy().unwrap();
}

#[test]
fn ram_tagged_words_point_into_the_buffer() {
    let offsets = [0u32, 4, 0x10, 0x40];
    for mode in [LoadMode::ExecuteInPlace, LoadMode::CopyAll] {
        let mut builder = module();
        builder.bss(0x40);
        let relocated: Vec<u32> = offsets
            .iter()
            .map(|k| builder.relocated_word(Domain::Ram.encode(*k)))
            .collect();
        let got: Vec<usize> = offsets
            .iter()
            .map(|k| builder.got_word(Domain::Ram.encode(*k)))
            .collect();
        let got: Vec<u32> = got.into_iter().map(|i| builder.got_offset(i)).collect();
        let image = Aligned::from_image(builder.build());
        let desc = Descriptor::parse(image.bytes()).unwrap();
        let required = required_size(&desc, mode);
        let mut buffer = Aligned::zeroed(required);
        let start = buffer.bytes().as_ptr();
        let loader = loader();

        let net = unsafe {
            loader
                .load(image.bytes(), Some(buffer.bytes_mut()), mode)
                .unwrap()
        };
        let code_len = match mode {
            LoadMode::ExecuteInPlace => 0,
            LoadMode::CopyAll => desc.code_size() as usize,
        };
        let region = unsafe { std::slice::from_raw_parts(start, required) };
        let ram = &region[code_len..];
        let ram_base = DeviceAddress::from_ptr(ram.as_ptr());
        for (k, (rel, slot)) in offsets.iter().zip(relocated.iter().zip(got.iter())) {
            let expected = (ram_base + *k).as_u32();
            assert_eq!(read_word(ram, *rel as usize), Some(expected));
            assert_eq!(read_word(ram, *slot as usize), Some(expected));
        }

        // every call runs with the global base at the RAM image
        let (base, _) = loader.bridge().last(Entry::Create).unwrap();
        assert_eq!(base, ram.as_ptr() as usize);
        drop(net);
    }
}

#[test]
fn rom_tagged_words_point_at_the_code() {
    let mut builder = module();
    let slot = builder.got_word(Domain::Rom.encode(0x6c));
    let image = Aligned::from_image(builder.build());
    let slot = builder.got_offset(slot) as usize;
    let desc = Descriptor::parse(image.bytes()).unwrap();
    let loader = loader();

    let mut buffer = Aligned::zeroed(required_size(&desc, LoadMode::ExecuteInPlace));
    let ram = buffer.bytes().as_ptr();
    let net = unsafe {
        loader
            .load(image.bytes(), Some(buffer.bytes_mut()), LoadMode::ExecuteInPlace)
            .unwrap()
    };
    let word = unsafe { std::ptr::read(ram.add(slot) as *const u32) };
    assert_eq!(word, (DeviceAddress::from_ptr(image.bytes().as_ptr()) + 0x6c).as_u32());
    drop(net);

    let mut buffer = Aligned::zeroed(required_size(&desc, LoadMode::CopyAll));
    let start = buffer.bytes().as_ptr();
    let net = unsafe {
        loader
            .load(image.bytes(), Some(buffer.bytes_mut()), LoadMode::CopyAll)
            .unwrap()
    };
    let ram = unsafe { start.add(desc.code_size() as usize) };
    let word = unsafe { std::ptr::read(ram.add(slot) as *const u32) };
    assert_eq!(word, (DeviceAddress::from_ptr(start) + 0x6c).as_u32());
    drop(net);
}

#[test]
fn unknown_tag_never_reaches_create() {
    for tag in [0x1u32, 0x2, 0x7, 0xa, 0xb, 0xe, 0xf] {
        for in_got in [false, true] {
            let word = (tag << 28) | 0x10;
            let mut builder = module();
            if in_got {
                builder.got_word(word);
            } else {
                builder.relocated_word(word);
            }
            let image = Aligned::from_image(builder.build());
            let desc = Descriptor::parse(image.bytes()).unwrap();
            let mut buffer =
                Aligned::filled(required_size(&desc, LoadMode::ExecuteInPlace), 0x3c);
            let before = buffer.checksum();
            let loader = loader();

            let result = unsafe {
                loader.load(image.bytes(), Some(buffer.bytes_mut()), LoadMode::ExecuteInPlace)
            };
            assert_eq!(
                result.err(),
                Some(LoaderError::InvalidBinary(BinaryFault::BadRelocation))
            );
            assert_eq!(loader.bridge().count(Entry::Create), 0);
            assert_eq!(buffer.checksum(), before);
        }
    }
}

#[test]
fn incompatible_processor_writes_nothing() {
    let image = Aligned::from_image(module().build());
    let desc = Descriptor::parse(image.bytes()).unwrap();
    let cases = [
        (
            StaticProcessor::new(cpu::CORTEX_M4, true),
            BinaryFault::CpuMismatch,
        ),
        (
            StaticProcessor::new(cpu::CORTEX_M7, false),
            BinaryFault::FpuUnavailable,
        ),
    ];
    for (processor, fault) in cases {
        let loader = Loader::new(FakeModule::new(), processor, NoAllocator);
        let mut buffer = Aligned::filled(required_size(&desc, LoadMode::CopyAll), 0x77);
        let before = buffer.checksum();
        let result =
            unsafe { loader.load(image.bytes(), Some(buffer.bytes_mut()), LoadMode::CopyAll) };
        assert_eq!(result.err(), Some(LoaderError::InvalidBinary(fault)));
        assert_eq!(buffer.checksum(), before);
        assert_eq!(loader.bridge().count(Entry::Create), 0);
    }
}

#[test]
fn lazily_enabled_fpu_can_skip_the_check() {
    let image = Aligned::from_image(module().build());
    let loader = Loader::new(
        FakeModule::new(),
        StaticProcessor::new(cpu::CORTEX_M7, false),
        HeapAllocator::new(),
    )
    .with_config(LoaderConfig::new().with_fpu_check(false));
    let mut net = unsafe {
        loader
            .load(image.bytes(), None, LoadMode::ExecuteInPlace)
            .unwrap()
    };
    net.destroy().unwrap();
}

#[test]
fn run_after_destroy_fails_because_destroy_clears_initialized() {
    // Destroy here clears the Initialized bit as well as the network
    // pointer. A loader that only cleared the pointer would let this run
    // pass the liveness check and reach the module with a null network;
    // this loader refuses it up front instead.
    let image = Aligned::from_image(module().build());
    let desc = Descriptor::parse(image.bytes()).unwrap();
    let mut buffer = Aligned::zeroed(required_size(&desc, LoadMode::ExecuteInPlace));
    let loader = loader();
    let mut net = unsafe {
        loader
            .load(image.bytes(), Some(buffer.bytes_mut()), LoadMode::ExecuteInPlace)
            .unwrap()
    };
    let input = [0u8; 16];
    let mut output = [0u8; 16];
    assert_eq!(
        net.run(input.as_ptr().cast(), output.as_mut_ptr().cast()),
        Ok(1)
    );

    net.destroy().unwrap();
    let handle = net.handle().unwrap();
    let ctx = unsafe { handle.context() };
    assert_eq!(ctx.network, 0);
    assert!(!ctx.is_initialized());

    assert_eq!(
        net.run(input.as_ptr().cast(), output.as_mut_ptr().cast()),
        Err(LoaderError::InvalidHandle)
    );
    assert_eq!(net.destroy(), Err(LoaderError::InvalidHandle));
    assert_eq!(net.error(), Err(LoaderError::InvalidHandle));
    assert_eq!(loader.bridge().count(Entry::Run), 1);
    assert_eq!(loader.bridge().count(Entry::Destroy), 1);
}

#[test]
fn destroy_frees_owned_memory() {
    let image = Aligned::from_image(module().build());
    let loader = loader();
    let mut net = unsafe { loader.load(image.bytes(), None, LoadMode::CopyAll).unwrap() };
    let handle = net.handle().unwrap();
    let ctx = unsafe { handle.context() };
    assert!(ctx.owned.is_some());
    assert_eq!(ctx.ram_base % 4, 0);

    net.destroy().unwrap();
    assert_eq!(net.handle(), None);
    assert!(!net.is_live());
    assert_eq!(
        net.forward(std::ptr::null()),
        Err(LoaderError::InvalidHandle)
    );
}

#[test]
fn lifecycle_forwards_arguments() {
    let image = Aligned::from_image(module().build());
    let info = get_info(image.bytes()).unwrap();
    let loader = loader();
    let mut net = unsafe {
        loader
            .load(image.bytes(), None, LoadMode::ExecuteInPlace)
            .unwrap()
    };
    let fake = loader.bridge();
    let ram_base = unsafe { net.handle().unwrap().context() }.ram_base;
    assert_eq!(net.name(), Ok("person_detect"));

    let (_, args) = fake.last(Entry::Create).unwrap();
    assert_eq!(args[1], 0);

    let mut arena = vec![0u8; info.activations_size as usize];
    let weights = [info.weights_address()];
    let activations = [arena.as_mut_ptr()];
    net.init(&weights, &activations).unwrap();
    let (base, args) = fake.last(Entry::InitV2).unwrap();
    assert_eq!(base, ram_base);
    assert_eq!(args[0], INSTANCE);
    assert_eq!(args[1], weights.as_ptr() as usize);
    assert_eq!(args[2], activations.as_ptr() as usize);

    let input = [0u8; 8];
    let mut output = [0u8; 8];
    fake.batches.set(3);
    assert_eq!(
        net.run(input.as_ptr().cast(), output.as_mut_ptr().cast()),
        Ok(3)
    );
    let (_, args) = fake.last(Entry::Run).unwrap();
    assert_eq!(
        args,
        [
            INSTANCE,
            input.as_ptr() as usize,
            output.as_mut_ptr() as usize
        ]
    );

    assert_eq!(net.forward(input.as_ptr().cast()), Ok(3));
    let mut report = [0u32; 4];
    net.report(&mut report).unwrap();
    let (_, args) = fake.last(Entry::Report).unwrap();
    assert_eq!(args[1], report.as_mut_ptr() as usize);

    net.init_params(std::ptr::null()).unwrap();
    assert_eq!(fake.count(Entry::Init), 1);

    fake.error_word.set(ModuleError::new(0x12, 7).into_raw());
    assert_eq!(net.error(), Ok(ModuleError::new(0x12, 7)));

    net.destroy().unwrap();
    let (_, args) = fake.last(Entry::Destroy).unwrap();
    assert_eq!(args[0], INSTANCE);
    assert!(fake.log.borrow().iter().all(|(_, base, _)| *base == ram_base));
}

#[test]
fn failed_run_surfaces_module_error() {
    let image = Aligned::from_image(module().build());
    let loader = loader();
    let mut net = unsafe {
        loader
            .load(image.bytes(), None, LoadMode::ExecuteInPlace)
            .unwrap()
    };
    let fake = loader.bridge();
    let reported = ModuleError::new(ModuleError::INVALID_INPUT, 0x42);
    fake.error_word.set(reported.into_raw());

    for batches in [0, -1] {
        fake.batches.set(batches);
        let err = net
            .run(std::ptr::null(), std::ptr::null_mut())
            .unwrap_err();
        assert_eq!(err, LoaderError::Module(reported));
        assert_eq!(err.code(), reported.into_raw());
    }
    assert_eq!(fake.count(Entry::Error), 2);

    fake.init_ok.set(false);
    let weights = [std::ptr::null()];
    let activations = [std::ptr::null_mut()];
    assert_eq!(
        net.init(&weights, &activations),
        Err(LoaderError::Module(reported))
    );

    // a module that fails without saying why
    fake.error_word.set(0);
    assert_eq!(
        net.init(&weights, &activations),
        Err(LoaderError::Module(ModuleError::new(
            ModuleError::INIT_FAILED,
            0
        )))
    );
}

#[test]
fn init_requires_buffers_the_module_declares() {
    let image = Aligned::from_image(module().build());
    let loader = loader();
    let mut net = unsafe {
        loader
            .load(image.bytes(), None, LoadMode::ExecuteInPlace)
            .unwrap()
    };
    let mut arena = [0u8; 16];
    assert_eq!(
        net.init(&[], &[arena.as_mut_ptr()]),
        Err(LoaderError::InvalidParameter(ParameterFault::MissingWeights))
    );
    assert_eq!(
        net.init(&[std::ptr::null()], &[]),
        Err(LoaderError::InvalidParameter(
            ParameterFault::MissingActivations
        ))
    );
    assert_eq!(loader.bridge().count(Entry::InitV2), 0);

    // nothing declared, nothing required
    let image = Aligned::from_image(minimal_module().build());
    let mut net = unsafe {
        loader
            .load(image.bytes(), None, LoadMode::ExecuteInPlace)
            .unwrap()
    };
    net.init(&[], &[]).unwrap();
}

#[test]
fn create_failure_leaves_no_network() {
    let image = Aligned::from_image(module().build());
    let desc = Descriptor::parse(image.bytes()).unwrap();
    let loader = loader();
    let fake = loader.bridge();

    let refused = ModuleError::new(ModuleError::ALLOCATION_FAILED, 3);
    fake.create_error.set(refused.into_raw());
    let result = unsafe { loader.load(image.bytes(), None, LoadMode::CopyAll) };
    assert_eq!(result.err(), Some(LoaderError::Module(refused)));

    fake.create_error.set(0);
    fake.instance.set(0);
    let mut buffer = Aligned::zeroed(required_size(&desc, LoadMode::ExecuteInPlace));
    let start = buffer.bytes().as_ptr();
    let result = unsafe {
        loader.load(image.bytes(), Some(buffer.bytes_mut()), LoadMode::ExecuteInPlace)
    };
    assert_eq!(
        result.err(),
        Some(LoaderError::Module(ModuleError::new(
            ModuleError::CREATE_FAILED,
            0
        )))
    );
    // the context left in the buffer is marked dead
    let state = unsafe { std::ptr::read(start.add(desc.context_offset() as usize) as *const u32) };
    assert_eq!(state & 1, 0);
    assert_eq!(fake.count(Entry::Create), 2);
    // only the first attempt produced an instance to release
    assert_eq!(fake.count(Entry::Destroy), 1);
}

#[test]
fn failed_create_releases_the_instance() {
    let image = Aligned::from_image(module().build());
    let desc = Descriptor::parse(image.bytes()).unwrap();
    let loader = loader();
    let fake = loader.bridge();

    let refused = ModuleError::new(ModuleError::ALLOCATION_FAILED, 7);
    fake.create_error.set(refused.into_raw());
    let result = unsafe { loader.load(image.bytes(), None, LoadMode::CopyAll) };
    assert_eq!(result.err(), Some(LoaderError::Module(refused)));
    assert_eq!(fake.count(Entry::Destroy), 1);
    let (_, args) = fake.last(Entry::Destroy).unwrap();
    assert_eq!(args[0], INSTANCE);

    // a module that also refuses to tear down is still torn down, and the
    // create error is what the caller sees
    fake.destroy_result.set(INSTANCE);
    let mut buffer = Aligned::zeroed(required_size(&desc, LoadMode::ExecuteInPlace));
    let start = buffer.bytes().as_ptr();
    let result = unsafe {
        loader.load(image.bytes(), Some(buffer.bytes_mut()), LoadMode::ExecuteInPlace)
    };
    assert_eq!(result.err(), Some(LoaderError::Module(refused)));
    assert_eq!(fake.count(Entry::Destroy), 2);
    let state = unsafe { std::ptr::read(start.add(desc.context_offset() as usize) as *const u32) };
    assert_eq!(state & 1, 0);
}

#[test]
fn missing_optional_entries_are_unsupported() {
    let image = Aligned::from_image(minimal_module().build());
    let loader = loader();
    let mut net = unsafe {
        loader
            .load(image.bytes(), None, LoadMode::ExecuteInPlace)
            .unwrap()
    };
    assert_eq!(
        net.forward(std::ptr::null()),
        Err(LoaderError::Unsupported(Entry::Forward))
    );
    assert_eq!(
        net.init_params(std::ptr::null()),
        Err(LoaderError::Unsupported(Entry::Init))
    );
    let mut report = 0u32;
    assert_eq!(
        net.report(&mut report),
        Err(LoaderError::Unsupported(Entry::Report))
    );
    assert_eq!(
        net.register_observer(observer, 0, EVENT_NODE),
        Err(LoaderError::Unsupported(Entry::ObserverRegister))
    );
    let slot = unsafe { net.handle().unwrap().context() }.observer;
    assert!(!slot.is_registered());
    assert_eq!(net.name(), Ok(""));
}

#[test]
fn observer_registration() {
    let image = Aligned::from_image(module().build());
    let loader = loader();
    let mut net = unsafe {
        loader
            .load(image.bytes(), None, LoadMode::ExecuteInPlace)
            .unwrap()
    };
    let fake = loader.bridge();

    for flags in [0, 1 << 20] {
        assert_eq!(
            net.register_observer(observer, 9, flags),
            Err(LoaderError::InvalidParameter(
                ParameterFault::BadObserverFlags
            ))
        );
    }

    net.register_observer(observer, 9, EVENT_INIT | EVENT_NODE)
        .unwrap();
    let (_, args) = fake.last(Entry::ObserverRegister).unwrap();
    let slot = unsafe { &*(args[1] as *const ObserverSlot) };
    assert!(slot.is_registered());
    assert_eq!(slot.cookie, 9);
    assert_eq!(slot.flags, EVENT_INIT | EVENT_NODE);

    let mut node = [0u32; 2];
    net.node_info(&mut node).unwrap();
    assert_eq!(fake.count(Entry::ObserverNodeInfo), 1);

    assert_eq!(
        net.unregister_observer(observer, 10),
        Err(LoaderError::InvalidParameter(ParameterFault::UnknownObserver))
    );
    assert_eq!(
        net.unregister_observer(other_observer, 9),
        Err(LoaderError::InvalidParameter(ParameterFault::UnknownObserver))
    );
    net.unregister_observer(observer, 9).unwrap();
    let slot = unsafe { net.handle().unwrap().context() }.observer;
    assert!(!slot.is_registered());
}

#[test]
fn refused_destroy_keeps_the_network() {
    let image = Aligned::from_image(module().build());
    let loader = loader();
    let mut net = unsafe { loader.load(image.bytes(), None, LoadMode::CopyAll).unwrap() };
    let fake = loader.bridge();

    fake.destroy_result.set(INSTANCE);
    fake.error_word
        .set(ModuleError::new(ModuleError::INVALID_STATE, 1).into_raw());
    assert_eq!(
        net.destroy(),
        Err(LoaderError::Module(ModuleError::new(
            ModuleError::INVALID_STATE,
            1
        )))
    );
    assert!(net.is_live());
    assert!(unsafe { net.handle().unwrap().context() }.owned.is_some());

    fake.destroy_result.set(0);
    net.destroy().unwrap();
    assert!(!net.is_live());
    assert_eq!(fake.count(Entry::Destroy), 2);
}

#[test]
fn dropping_a_live_network_destroys_it() {
    let image = Aligned::from_image(module().build());
    let loader = loader();
    {
        let _net = unsafe {
            loader
                .load(image.bytes(), None, LoadMode::ExecuteInPlace)
                .unwrap()
        };
    }
    assert_eq!(loader.bridge().count(Entry::Destroy), 1);

    {
        let mut net = unsafe {
            loader
                .load(image.bytes(), None, LoadMode::ExecuteInPlace)
                .unwrap()
        };
        net.destroy().unwrap();
    }
    assert_eq!(loader.bridge().count(Entry::Destroy), 2);
}

#[test]
fn instances_keep_separate_state() {
    let mut builder = module();
    let slot = builder.got_word(Domain::Ram.encode(0));
    let image = Aligned::from_image(builder.build());
    let slot = builder.got_offset(slot) as usize;
    let desc = Descriptor::parse(image.bytes()).unwrap();
    let required = required_size(&desc, LoadMode::ExecuteInPlace);
    let mut first = Aligned::zeroed(required);
    let mut second = Aligned::zeroed(required);
    let (a, b) = (first.bytes().as_ptr(), second.bytes().as_ptr());
    let loader = loader();

    let mut one = unsafe {
        loader
            .load(image.bytes(), Some(first.bytes_mut()), LoadMode::ExecuteInPlace)
            .unwrap()
    };
    let mut two = unsafe {
        loader
            .load(image.bytes(), Some(second.bytes_mut()), LoadMode::ExecuteInPlace)
            .unwrap()
    };
    assert_ne!(one.handle(), two.handle());
    let word = |base: *const u8| unsafe { std::ptr::read(base.add(slot) as *const u32) };
    assert_eq!(word(a), DeviceAddress::from_ptr(a).as_u32());
    assert_eq!(word(b), DeviceAddress::from_ptr(b).as_u32());

    one.destroy().unwrap();
    assert!(two.is_live());
    two.run(std::ptr::null(), std::ptr::null_mut()).unwrap();
    let (base, _) = loader.bridge().last(Entry::Run).unwrap();
    assert_eq!(base, b as usize);
    two.destroy().unwrap();
}

#[test]
fn modules_for_a_newer_abi_are_rejected() {
    let newer = ImageFlags::new(AbiVersion::new(1, 3), cpu::CORTEX_M7, true, FpAbi::Hard);
    let mut image = module().build();
    image[4..8].copy_from_slice(&newer.as_u32().to_le_bytes());
    let image = Aligned::from_image(image);
    let loader = loader();
    let result = unsafe { loader.load(image.bytes(), None, LoadMode::ExecuteInPlace) };
    assert_eq!(
        result.err(),
        Some(LoaderError::InvalidBinary(BinaryFault::VersionMismatch))
    );

    let loader = loader.with_config(LoaderConfig::new().with_version(AbiVersion::new(1, 3)));
    let mut net = unsafe {
        loader
            .load(image.bytes(), None, LoadMode::ExecuteInPlace)
            .unwrap()
    };
    net.destroy().unwrap();
}

struct CaptureSink;

static LINES: Mutex<Vec<String>> = Mutex::new(Vec::new());
static CAPTURE: CaptureSink = CaptureSink;

impl LogSink for CaptureSink {
    fn write_line(&self, args: std::fmt::Arguments) {
        LINES.lock().unwrap().push(args.to_string());
    }
}

#[test]
fn lifecycle_is_logged() {
    log::set_sink(&CAPTURE);
    let mut builder = module();
    builder.name("logged_model");
    let image = Aligned::from_image(builder.build());
    let loader = loader().with_config(LoaderConfig::new().with_relocation_trace(true));
    let mut net = unsafe {
        loader
            .load(image.bytes(), None, LoadMode::ExecuteInPlace)
            .unwrap()
    };
    net.destroy().unwrap();

    let lines = LINES.lock().unwrap();
    let about = |tag: &str, text: &str| {
        lines
            .iter()
            .any(|line| line.contains(tag) && line.contains(text))
    };
    assert!(about("NETLOAD ", "installed \"logged_model\""));
    assert!(about("NETWORK ", "created \"logged_model\""));
    assert!(about("NETWORK ", "destroyed \"logged_model\""));
}
