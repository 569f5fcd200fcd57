//! Function registry and interrupt dispatch.
//!
//! The registry turns a [`DescriptorScan`] into live handlers, programs the
//! interrupt enable registers and, on every attention, demultiplexes the
//! interrupt status bitmap onto the handlers that own the asserted bits.

use alloc::{vec, vec::Vec};

use crate::{
    common,
    config::PlatformConfig,
    descriptor::{DescriptorScan, FunctionDescriptor},
    function::{
        control, touch::TouchDecoder, FunctionHandler, FunctionKind, InterruptAllocation,
        ReportContext,
    },
    input::InputSink,
    transport::RegisterAccess,
    DriverError,
};

/// What one dispatch cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Dispatch {
    /// Number of handlers whose interrupt bits were asserted.
    pub invoked: usize,
    /// First interrupt status register, 0 when the device has none.
    pub status: u8,
    /// A handler found that the device needs a resync.
    pub resync_requested: bool,
}

/// The handlers of one enumeration, in scan order.
#[derive(Debug)]
pub struct FunctionRegistry {
    handlers: Vec<FunctionHandler>,
    control: FunctionDescriptor,
    interrupt_count: usize,
    fingers_on_surface: bool,
    status_buf: Vec<u8>,
}

impl FunctionRegistry {
    /// Build a handler for every supported function of `scan`.
    ///
    /// A function with an unusable layout is left out with a warning. Any
    /// transport error aborts the build.
    pub(crate) fn build<B: RegisterAccess>(
        bus: &mut B,
        scan: &DescriptorScan,
        config: &PlatformConfig,
    ) -> Result<Self, DriverError<B::BusError>> {
        let status = scan.identity.firmware_status;
        let mut handlers = Vec::with_capacity(scan.functions.len());

        for scanned in &scan.functions {
            let number = scanned.descriptor.function_number;
            if scan.in_bootloader && scanned.descriptor.kind() != FunctionKind::DeviceControl {
                debug!("skipping function {:#x} in flash programming mode", number);
                continue;
            }

            match FunctionHandler::create(bus, scanned, status, config) {
                Ok(Some(handler)) => handlers.push(handler),
                Ok(None) => {}
                Err(DriverError::Protocol(err)) => {
                    warn!("function {:#x} left out: {:?}", number, err);
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            "{} functions, {} interrupt sources",
            handlers.len(),
            scan.interrupt_count
        );

        Ok(Self {
            handlers,
            control: scan.control,
            interrupt_count: scan.interrupt_count,
            fingers_on_surface: false,
            status_buf: vec![0; scan.status_register_count()],
        })
    }

    /// Enable every handler's interrupt sources and drop anything pending.
    pub(crate) fn enable_interrupts<B: RegisterAccess>(
        &mut self,
        bus: &mut B,
    ) -> Result<(), DriverError<B::BusError>> {
        if self.status_buf.is_empty() {
            return Ok(());
        }

        let mut masks = vec![0u8; self.status_buf.len()];
        for allocation in self.allocations() {
            if let Some(mask) = masks.get_mut(allocation.register_index as usize) {
                *mask |= allocation.bit_mask;
            }
        }
        bus.write(control::interrupt_enable_base(&self.control), &masks)?;
        bus.read(control::interrupt_status_base(&self.control), &mut self.status_buf)
    }

    /// Read the interrupt status registers and run every handler whose bits
    /// are set.
    ///
    /// A handler that fails is logged and skipped; the others still run.
    /// Only the status read itself can fail the cycle.
    pub(crate) fn dispatch<B: RegisterAccess>(
        &mut self,
        bus: &mut B,
        sink: &mut dyn InputSink,
    ) -> Result<Dispatch, DriverError<B::BusError>> {
        if !self.status_buf.is_empty() {
            bus.read(control::interrupt_status_base(&self.control), &mut self.status_buf)?;
        }

        let mut cx = ReportContext {
            status: &self.status_buf,
            fingers_on_surface: self.fingers_on_surface,
            resync_requested: false,
            sink,
        };
        let mut invoked = 0;

        for index in 0..self.handlers.len() {
            if !self.handlers[index].allocation().is_asserted(cx.status) {
                continue;
            }
            invoked += 1;

            let fingers_before = cx.fingers_on_surface;
            if let Err(err) = self.handlers[index].report(bus, &mut cx) {
                warn!(
                    "function {:#x} report failed (transport: {})",
                    self.handlers[index].descriptor().function_number,
                    err.is_transport()
                );
            }

            if cx.fingers_on_surface != fingers_before {
                trace!("fingers on surface: {}", cx.fingers_on_surface);
                for handler in self.handlers.iter_mut() {
                    handler.surface_changed(cx.fingers_on_surface);
                }
            }
        }

        let dispatch = Dispatch {
            invoked,
            status: cx.status.first().copied().unwrap_or(0),
            resync_requested: cx.resync_requested,
        };
        self.fingers_on_surface = cx.fingers_on_surface;
        Ok(dispatch)
    }

    /// Release every contact and visible button before the handlers go away.
    pub(crate) fn release_all(&mut self, sink: &mut dyn InputSink) {
        for handler in self.handlers.iter_mut() {
            handler.release_all(sink);
        }
        self.fingers_on_surface = false;
    }

    pub fn handlers(&self) -> &[FunctionHandler] {
        &self.handlers
    }

    pub fn allocations(&self) -> impl Iterator<Item = InterruptAllocation> + '_ {
        self.handlers.iter().map(FunctionHandler::allocation)
    }

    pub fn handler(&self, kind: FunctionKind) -> Option<&FunctionHandler> {
        self.handlers.iter().find(|h| h.kind() == kind)
    }

    pub fn touch(&self) -> Option<&TouchDecoder> {
        self.handlers.iter().find_map(|h| match h {
            FunctionHandler::Touch2D(touch) => Some(touch),
            _ => None,
        })
    }

    pub fn control(&self) -> &FunctionDescriptor {
        &self.control
    }

    /// Total interrupt sources across every scanned function.
    pub fn interrupt_count(&self) -> usize {
        self.interrupt_count
    }

    pub fn status_register_count(&self) -> usize {
        common::status_register_count(self.interrupt_count)
    }

    pub fn fingers_on_surface(&self) -> bool {
        self.fingers_on_surface
    }
}
