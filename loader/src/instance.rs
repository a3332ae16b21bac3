//! Lifecycle of installed networks.
//!
//! `Loader` bundles the board's collaborators: how to call module code, what
//! processor is running, and where memory comes from. `Network` is one
//! installed module. It borrows the image and any caller buffer for as long
//! as it exists, and forwards each operation to the module's entry vector.

use core::ffi::c_void;
use core::marker::PhantomData;

use netload_api::entry::Entry;
use netload_api::error::ModuleError;
use netload_api::observer::{ObserverFn, ObserverSlot, EVENT_MASK};

use crate::binary::{get_info, Descriptor, ModelInfo};
use crate::bridge::CallBridge;
use crate::compat::Processor;
use crate::config::LoaderConfig;
use crate::context::{Handle, INITIALIZED};
use crate::error::{LoaderError, LoaderResult, ParameterFault};
use crate::log::TaggedLogger;
use crate::planner::{self, Allocator, LoadMode};

const LOGGER: TaggedLogger = TaggedLogger::new("NETWORK", 32);

pub struct Loader<B, P, A> {
    bridge: B,
    processor: P,
    allocator: A,
    config: LoaderConfig,
}

impl<B: CallBridge, P: Processor, A: Allocator> Loader<B, P, A> {
    pub const fn new(bridge: B, processor: P, allocator: A) -> Self {
        Self {
            bridge,
            processor,
            allocator,
            config: LoaderConfig::new(),
        }
    }

    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Sizing information for an image; nothing is installed
    pub fn info<'i>(&self, image: &'i [u8]) -> LoaderResult<ModelInfo<'i>> {
        get_info(image)
    }

    /// Install an image and run the module's `create` entry.
    ///
    /// With no buffer the loader allocates the region and frees it on
    /// destroy. A buffer must be 4-byte aligned and at least
    /// `required_size` bytes long.
    ///
    /// # Safety
    /// This runs code from the image. The image must be a trusted module
    /// built for this loader's ABI.
    pub unsafe fn load<'l, 'a>(
        &'l self,
        image: &'a [u8],
        buffer: Option<&'a mut [u8]>,
        mode: LoadMode,
    ) -> LoaderResult<Network<'l, 'a>> {
        let desc = Descriptor::parse(image)?;
        let handle = planner::install(
            &desc,
            buffer,
            mode,
            &self.allocator,
            &self.processor,
            &self.config,
        )?;
        let mut network = Network {
            bridge: &self.bridge,
            allocator: &self.allocator,
            handle: Some(handle),
            _region: PhantomData,
        };
        network.create()?;
        Ok(network)
    }
}

/// An installed module
pub struct Network<'l, 'a> {
    bridge: &'l dyn CallBridge,
    allocator: &'l dyn Allocator,
    /// None once the region backing the context has been freed
    handle: Option<Handle>,
    _region: PhantomData<&'a mut [u8]>,
}

impl<'l, 'a> Network<'l, 'a> {
    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    pub fn is_live(&self) -> bool {
        self.live().is_ok()
    }

    pub fn name(&self) -> LoaderResult<&str> {
        let handle = self.live()?;
        Ok(unsafe { handle.context() }.name())
    }

    fn live(&self) -> LoaderResult<Handle> {
        match self.handle {
            Some(handle) if unsafe { handle.is_live() } => Ok(handle),
            _ => Err(LoaderError::InvalidHandle),
        }
    }

    /// Call an entry with the module's instance pointer as the first argument
    fn call(&mut self, entry: Entry, args: [usize; 2]) -> LoaderResult<usize> {
        let handle = self.live()?;
        let (address, base, network) = {
            let ctx = unsafe { handle.context() };
            let address = ctx
                .entry_address(entry)
                .ok_or(LoaderError::Unsupported(entry))?;
            (address, ctx.ram_base, ctx.network)
        };
        Ok(unsafe { self.bridge.call(address, base, [network, args[0], args[1]]) })
    }

    /// Error reported by the module after a failed call, or `fallback` if
    /// the module reports none
    fn failure(&mut self, fallback: u8) -> LoaderError {
        match self.error() {
            Ok(err) if !err.is_none() => LoaderError::Module(err),
            Ok(_) => LoaderError::Module(ModuleError::new(fallback, 0)),
            Err(err) => err,
        }
    }

    fn create(&mut self) -> LoaderResult<()> {
        let handle = self.live()?;
        let (address, base) = {
            let ctx = unsafe { handle.context() };
            let address = ctx
                .entry_address(Entry::Create)
                .ok_or(LoaderError::Unsupported(Entry::Create))?;
            (address, ctx.ram_base)
        };
        // the module writes its instance pointer straight into the context
        let out = unsafe { core::ptr::addr_of_mut!((*handle.as_ptr()).network) } as usize;
        let raw = unsafe { self.bridge.call(address, base, [out, 0, 0]) };
        let err = ModuleError::from_raw(raw as u32);
        let network = unsafe { handle.context() }.network;
        if err.is_none() && network != 0 {
            LOGGER.log(format_args!(
                "created \"{}\" at {:?}",
                unsafe { handle.context() }.name(),
                handle
            ));
            return Ok(());
        }

        // a module that failed after handing out an instance still owns it
        if network != 0 {
            match self.call(Entry::Destroy, [0, 0]) {
                Ok(0) => (),
                Ok(remaining) => LOGGER.log(format_args!(
                    "failed create left instance {:#x} behind",
                    remaining
                )),
                Err(fault) => LOGGER.log(format_args!("failed create: {}", fault)),
            }
        }
        self.teardown();
        if err.is_none() {
            Err(LoaderError::Module(ModuleError::new(
                ModuleError::CREATE_FAILED,
                0,
            )))
        } else {
            Err(LoaderError::Module(err))
        }
    }

    /// Mark the context dead and give back owned memory
    fn teardown(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            let owned = unsafe {
                let ctx = handle.context_mut();
                ctx.network = 0;
                ctx.state &= !INITIALIZED;
                ctx.owned.take()
            };
            match owned {
                Some(ptr) => unsafe { self.allocator.free(ptr) },
                // the caller's buffer outlives us; keep the handle so later
                // calls are refused by the liveness check
                None => self.handle = Some(handle),
            }
        }
    }

    /// Hand weights and activation buffers to the module
    pub fn init(&mut self, weights: &[*const u8], activations: &[*mut u8]) -> LoaderResult<()> {
        let handle = self.live()?;
        let (weights_size, activations_size) = {
            let ctx = unsafe { handle.context() };
            (ctx.weights_size, ctx.activations_size)
        };
        if weights_size > 0 && weights.is_empty() {
            return Err(LoaderError::InvalidParameter(ParameterFault::MissingWeights));
        }
        if activations_size > 0 && activations.is_empty() {
            return Err(LoaderError::InvalidParameter(
                ParameterFault::MissingActivations,
            ));
        }
        let ok = self.call(
            Entry::InitV2,
            [weights.as_ptr() as usize, activations.as_ptr() as usize],
        )?;
        if ok == 0 {
            return Err(self.failure(ModuleError::INIT_FAILED));
        }
        Ok(())
    }

    /// Older initialization entry taking a single module-defined parameter
    /// block
    pub fn init_params(&mut self, params: *const c_void) -> LoaderResult<()> {
        let ok = self.call(Entry::Init, [params as usize, 0])?;
        if ok == 0 {
            return Err(self.failure(ModuleError::INIT_FAILED));
        }
        Ok(())
    }

    /// Run one inference, returning the number of batches processed
    pub fn run(&mut self, input: *const c_void, output: *mut c_void) -> LoaderResult<u32> {
        let batches = self.call(Entry::Run, [input as usize, output as usize])? as u32 as i32;
        if batches <= 0 {
            return Err(self.failure(ModuleError::INVALID_STATE));
        }
        Ok(batches as u32)
    }

    /// Run the network up to its output tensors without post-processing
    pub fn forward(&mut self, input: *const c_void) -> LoaderResult<u32> {
        let batches = self.call(Entry::Forward, [input as usize, 0])? as u32 as i32;
        if batches <= 0 {
            return Err(self.failure(ModuleError::INVALID_STATE));
        }
        Ok(batches as u32)
    }

    /// Let the module fill in its report structure
    pub fn report<R>(&mut self, out: &mut R) -> LoaderResult<()> {
        let ok = self.call(Entry::Report, [out as *mut R as usize, 0])?;
        if ok == 0 {
            return Err(self.failure(ModuleError::INVALID_OUTPUT));
        }
        Ok(())
    }

    /// The module's most recent error
    pub fn error(&mut self) -> LoaderResult<ModuleError> {
        let raw = self.call(Entry::Error, [0, 0])?;
        Ok(ModuleError::from_raw(raw as u32))
    }

    pub fn register_observer(
        &mut self,
        callback: ObserverFn,
        cookie: usize,
        flags: u32,
    ) -> LoaderResult<()> {
        if flags == 0 || flags & !EVENT_MASK != 0 {
            return Err(LoaderError::InvalidParameter(
                ParameterFault::BadObserverFlags,
            ));
        }
        let slot = self.observer_slot(Entry::ObserverRegister)?;
        unsafe {
            *slot = ObserverSlot {
                callback: Some(callback),
                cookie,
                flags,
            };
        }
        let ok = self.call(Entry::ObserverRegister, [slot as usize, 0])?;
        if ok == 0 {
            unsafe { *slot = ObserverSlot::empty() };
            return Err(self.failure(ModuleError::INVALID_STATE));
        }
        Ok(())
    }

    pub fn unregister_observer(&mut self, callback: ObserverFn, cookie: usize) -> LoaderResult<()> {
        let slot = self.observer_slot(Entry::ObserverUnregister)?;
        let registered = unsafe { *slot };
        let same_callback = registered
            .callback
            .map_or(false, |current| current as usize == callback as usize);
        if !same_callback || registered.cookie != cookie {
            return Err(LoaderError::InvalidParameter(
                ParameterFault::UnknownObserver,
            ));
        }
        let ok = self.call(Entry::ObserverUnregister, [slot as usize, 0])?;
        if ok == 0 {
            return Err(self.failure(ModuleError::INVALID_STATE));
        }
        unsafe { *slot = ObserverSlot::empty() };
        Ok(())
    }

    /// Describe the node currently being reported to an observer
    pub fn node_info<N>(&mut self, out: &mut N) -> LoaderResult<()> {
        let ok = self.call(Entry::ObserverNodeInfo, [out as *mut N as usize, 0])?;
        if ok == 0 {
            return Err(self.failure(ModuleError::INVALID_OUTPUT));
        }
        Ok(())
    }

    /// The observer slot in the context, once the module is known to
    /// support `entry`
    fn observer_slot(&self, entry: Entry) -> LoaderResult<*mut ObserverSlot> {
        let handle = self.live()?;
        let ctx = handle.as_ptr();
        if unsafe { (*ctx).entries.offset(entry) }.is_none() {
            return Err(LoaderError::Unsupported(entry));
        }
        Ok(unsafe { core::ptr::addr_of_mut!((*ctx).observer) })
    }

    /// Tear the module down. If the module refuses, nothing is released and
    /// the call can be retried. Afterwards every operation fails with
    /// `InvalidHandle`.
    pub fn destroy(&mut self) -> LoaderResult<()> {
        let handle = self.live()?;
        let remaining = self.call(Entry::Destroy, [0, 0])?;
        if remaining != 0 {
            return Err(self.failure(ModuleError::INVALID_STATE));
        }
        LOGGER.log(format_args!(
            "destroyed \"{}\" at {:?}",
            unsafe { handle.context() }.name(),
            handle
        ));
        self.teardown();
        Ok(())
    }
}

impl Drop for Network<'_, '_> {
    fn drop(&mut self) {
        if self.is_live() {
            if let Err(err) = self.destroy() {
                LOGGER.log(format_args!("dropped a live network: {}", err));
            }
        }
    }
}
