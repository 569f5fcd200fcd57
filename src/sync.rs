use alloc::{boxed::Box, vec::Vec};

use embedded_hal::{
    delay::DelayNs,
    i2c::{I2c, SevenBitAddress},
};
use spin::Mutex;

use crate::{
    common::RESET_SETTLE_MS,
    config::PlatformConfig,
    descriptor,
    expansion::{ExpansionId, ExpansionKind, ExpansionModule, ExpansionRegistry},
    function::{control, FunctionKind, InterruptAllocation},
    input::InputSink,
    registry::FunctionRegistry,
    transport::{RegisterAccess, RegisterTransport},
    DriverError, Identity,
};

/// An enumerated device.
struct Device {
    identity: Identity,
    registry: FunctionRegistry,
}

struct Inner<B: RegisterAccess, S> {
    bus: B,
    sink: S,
    config: PlatformConfig,
    device: Option<Device>,
    expansions: ExpansionRegistry<B>,
}

/// An RMI4 device.
///
/// This struct contains the full blocking interface to the protocol engine.
/// All state lives behind one lock that is held for a whole report cycle,
/// resync or expansion pass, so the methods take `&self` and the engine can
/// be shared between an interrupt handler and a housekeeping task.
pub struct Rmi4<B: RegisterAccess, S> {
    inner: Mutex<Inner<B, S>>,
}

impl<I2C, D, S> Rmi4<RegisterTransport<I2C, D>, S>
where
    I2C: I2c<SevenBitAddress>,
    D: DelayNs,
    S: InputSink,
{
    /// Create an engine on an I2C bus, at the address from `config`.
    pub fn new(i2c: I2C, delay: D, sink: S, config: PlatformConfig) -> Self {
        let bus = RegisterTransport::with_address(i2c, delay, config.i2c_address);
        Self::with_bus(bus, sink, config)
    }
}

impl<B: RegisterAccess, S: InputSink> Rmi4<B, S> {
    /// Create an engine on any register transport.
    ///
    /// Nothing is sent to the device until [`Rmi4::bring_up`].
    pub fn with_bus(bus: B, sink: S, config: PlatformConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                bus,
                sink,
                config,
                device: None,
                expansions: ExpansionRegistry::new(),
            }),
        }
    }

    /// Enumerate the device for the first time.
    ///
    /// Call once power to the device is stable.
    pub fn bring_up(&self) -> Result<Identity, DriverError<B::BusError>> {
        self.inner.lock().enumerate()
    }

    /// Reset the device and enumerate it from scratch.
    ///
    /// On error the engine is left without a device and every report cycle
    /// fails with [`DriverError::NoDevice`] until a resync succeeds.
    pub fn force_resync(&self) -> Result<Identity, DriverError<B::BusError>> {
        self.inner.lock().resync()
    }

    /// Run one report cycle for an asserted attention line.
    ///
    /// Returns the number of functions that had something to report.
    pub fn handle_attention(&self) -> Result<usize, DriverError<B::BusError>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let device = inner.device.as_mut().ok_or(DriverError::NoDevice)?;

        let dispatch = device.registry.dispatch(&mut inner.bus, &mut inner.sink)?;
        inner.expansions.attn(&mut inner.bus, dispatch.status);

        if dispatch.resync_requested {
            inner.resync()?;
        }
        Ok(dispatch.invoked)
    }

    /// Read the identity and status of the enumerated device.
    pub fn read_identity(&self) -> Result<Identity, DriverError<B::BusError>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let device = inner.device.as_mut().ok_or(DriverError::NoDevice)?;

        let identity = control::read_identity(&mut inner.bus, device.registry.control())?;
        device.identity = identity;
        Ok(identity)
    }

    /// Queue an expansion module. It is initialized by the next
    /// [`Rmi4::reconcile_expansions`] once a device is enumerated.
    pub fn register_expansion(
        &self,
        kind: ExpansionKind,
        module: Box<dyn ExpansionModule<B>>,
    ) -> Result<ExpansionId, DriverError<B::BusError>> {
        self.inner.lock().expansions.register(kind, module)
    }

    /// Withdraw an expansion module. It is removed by the next
    /// [`Rmi4::reconcile_expansions`].
    pub fn unregister_expansion(&self, kind: ExpansionKind) -> Result<(), DriverError<B::BusError>> {
        self.inner.lock().expansions.unregister(kind)
    }

    /// Insert pending and remove withdrawn expansion modules.
    pub fn reconcile_expansions(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let device_ready = inner.device.is_some();
        inner.expansions.reconcile(&mut inner.bus, device_ready);
    }

    /// Replace the platform configuration. Takes effect on the next resync.
    pub fn set_config(&self, config: PlatformConfig) {
        self.inner.lock().config = config;
    }

    /// Whether a device is enumerated.
    pub fn is_functional(&self) -> bool {
        self.inner.lock().device.is_some()
    }

    /// Whether the device is running its bootloader, with only device control
    /// available.
    pub fn in_bootloader(&self) -> bool {
        self.inner
            .lock()
            .device
            .as_ref()
            .is_some_and(|d| d.identity.firmware_status.flash_prog)
    }

    /// The identity read at the last enumeration.
    pub fn identity(&self) -> Option<Identity> {
        self.inner.lock().device.as_ref().map(|d| d.identity)
    }

    /// Number of interrupt status registers read on every attention.
    pub fn interrupt_register_count(&self) -> usize {
        self.inner
            .lock()
            .device
            .as_ref()
            .map_or(0, |d| d.registry.status_register_count())
    }

    /// The interrupt bits owned by each live function, in scan order.
    pub fn interrupt_allocations(&self) -> Vec<(FunctionKind, InterruptAllocation)> {
        self.inner.lock().device.as_ref().map_or_else(Vec::new, |d| {
            d.registry
                .handlers()
                .iter()
                .map(|h| (h.kind(), h.allocation()))
                .collect()
        })
    }

    /// The 2D sensor's maximum X and Y, if the device has one.
    pub fn touch_sensor_max(&self) -> Option<(u16, u16)> {
        let inner = self.inner.lock();
        let device = inner.device.as_ref()?;
        device.registry.touch().map(|touch| touch.sensor_max())
    }

    /// Safely clean up the engine, returning the bus and the input sink.
    ///
    /// Expansion modules still registered are dropped without `remove`.
    pub fn destroy(self) -> (B, S) {
        let inner = self.inner.into_inner();
        (inner.bus, inner.sink)
    }
}

impl<B: RegisterAccess, S: InputSink> Inner<B, S> {
    /// Drop the enumerated device, lifting whatever it still holds down.
    fn take_device(&mut self) -> Option<Device> {
        let mut device = self.device.take()?;
        device.registry.release_all(&mut self.sink);
        Some(device)
    }

    fn enumerate(&mut self) -> Result<Identity, DriverError<B::BusError>> {
        self.take_device();

        let scan = descriptor::scan(&mut self.bus)?;
        let mut registry = FunctionRegistry::build(&mut self.bus, &scan, &self.config)?;

        if self.config.swap_axes {
            if let Some(touch) = registry.touch() {
                touch.apply_axis_swap(&mut self.bus)?;
            }
        }
        registry.enable_interrupts(&mut self.bus)?;

        let mut identity = scan.identity;
        if !scan.in_bootloader {
            identity.firmware_status = control::mark_configured(&mut self.bus, &scan.control)?;
        }

        self.device = Some(Device { identity, registry });
        Ok(identity)
    }

    fn resync(&mut self) -> Result<Identity, DriverError<B::BusError>> {
        info!("resync started");

        match self.take_device() {
            Some(device) => {
                control::reset(&mut self.bus, device.registry.control())?;
                // The device comes back on page 0.
                self.bus.invalidate_page();
                self.bus.delay_ms(RESET_SETTLE_MS);
            }
            None => debug!("no device control function known, not resetting"),
        }

        let identity = self.enumerate()?;
        self.expansions.reset_all(&mut self.bus);

        info!("resync done");
        Ok(identity)
    }
}
