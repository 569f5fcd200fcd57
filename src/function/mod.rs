//! RMI4 function handlers.
//!
//! A device exposes a variable set of functions, each identified by a
//! function number. The ones this crate understands are modelled as the
//! variants of [`FunctionHandler`]; everything else is skipped during
//! enumeration.

pub mod buttons;
pub mod control;
pub mod diagnostics;
pub mod touch;

use crate::{
    common::{self, FN_BUTTONS_0D, FN_DEVICE_CONTROL, FN_DIAGNOSTICS, FN_TOUCH_2D},
    config::PlatformConfig,
    descriptor::{FunctionDescriptor, ScannedFunction},
    input::InputSink,
    transport::RegisterAccess,
    DriverError,
};

use self::{
    buttons::ButtonDecoder,
    control::{DeviceControl, FirmwareStatus},
    diagnostics::Diagnostics,
    touch::TouchDecoder,
};

/// The kind of a function, by function number.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FunctionKind {
    DeviceControl,
    Touch2D,
    Buttons1D,
    Diagnostics,
    Unknown(u8),
}

impl From<u8> for FunctionKind {
    fn from(value: u8) -> Self {
        match value {
            FN_DEVICE_CONTROL => Self::DeviceControl,
            FN_TOUCH_2D => Self::Touch2D,
            FN_BUTTONS_0D => Self::Buttons1D,
            FN_DIAGNOSTICS => Self::Diagnostics,
            other => Self::Unknown(other),
        }
    }
}

/// Where a function's interrupt sources sit in the interrupt status registers.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterruptAllocation {
    pub register_index: u8,
    pub bit_mask: u8,
}

impl InterruptAllocation {
    /// The allocation of `count` sources starting at bit `offset` of the
    /// interrupt bitmap.
    pub fn new(offset: usize, count: u8) -> Self {
        Self {
            register_index: (offset / 8) as u8,
            bit_mask: common::interrupt_mask(offset, count),
        }
    }

    /// Whether any of this function's sources is asserted in `status`.
    pub fn is_asserted(&self, status: &[u8]) -> bool {
        status
            .get(self.register_index as usize)
            .is_some_and(|reg| reg & self.bit_mask != 0)
    }
}

/// State shared by every handler during one report cycle.
pub(crate) struct ReportContext<'a> {
    /// The interrupt status registers read at the start of the cycle.
    pub status: &'a [u8],
    /// Whether any finger is on the 2D sensor, as of the last touch report.
    pub fingers_on_surface: bool,
    /// Set by a handler that found the device needs a resync.
    pub resync_requested: bool,
    pub sink: &'a mut dyn InputSink,
}

/// A live handler for one of the device's functions.
#[derive(Debug)]
pub enum FunctionHandler {
    DeviceControl(DeviceControl),
    Touch2D(TouchDecoder),
    Buttons1D(ButtonDecoder),
    Diagnostics(Diagnostics),
}

impl FunctionHandler {
    /// Build the handler matching a scanned descriptor.
    ///
    /// Returns `Ok(None)` for function numbers this crate does not handle.
    pub(crate) fn create<B: RegisterAccess>(
        bus: &mut B,
        scanned: &ScannedFunction,
        status: FirmwareStatus,
        config: &PlatformConfig,
    ) -> Result<Option<Self>, DriverError<B::BusError>> {
        let descriptor = scanned.descriptor;
        let allocation =
            InterruptAllocation::new(scanned.interrupt_offset, descriptor.interrupt_source_count);

        let handler = match descriptor.kind() {
            FunctionKind::DeviceControl => {
                Self::DeviceControl(DeviceControl::new(descriptor, allocation, status))
            }
            FunctionKind::Touch2D => {
                Self::Touch2D(TouchDecoder::init(bus, descriptor, allocation, config)?)
            }
            FunctionKind::Buttons1D => {
                Self::Buttons1D(ButtonDecoder::init(bus, descriptor, allocation, config)?)
            }
            FunctionKind::Diagnostics => {
                Self::Diagnostics(Diagnostics::init(bus, descriptor, allocation)?)
            }
            FunctionKind::Unknown(number) => {
                debug!("skipping unsupported function {:#x}", number);
                return Ok(None);
            }
        };
        Ok(Some(handler))
    }

    pub fn kind(&self) -> FunctionKind {
        match self {
            Self::DeviceControl(_) => FunctionKind::DeviceControl,
            Self::Touch2D(_) => FunctionKind::Touch2D,
            Self::Buttons1D(_) => FunctionKind::Buttons1D,
            Self::Diagnostics(_) => FunctionKind::Diagnostics,
        }
    }

    pub fn descriptor(&self) -> &FunctionDescriptor {
        match self {
            Self::DeviceControl(f) => f.descriptor(),
            Self::Touch2D(f) => f.descriptor(),
            Self::Buttons1D(f) => f.descriptor(),
            Self::Diagnostics(f) => f.descriptor(),
        }
    }

    pub fn allocation(&self) -> InterruptAllocation {
        match self {
            Self::DeviceControl(f) => f.allocation(),
            Self::Touch2D(f) => f.allocation(),
            Self::Buttons1D(f) => f.allocation(),
            Self::Diagnostics(f) => f.allocation(),
        }
    }

    /// Run this handler's report routine for the current cycle.
    pub(crate) fn report<B: RegisterAccess>(
        &mut self,
        bus: &mut B,
        cx: &mut ReportContext<'_>,
    ) -> Result<(), DriverError<B::BusError>> {
        match self {
            Self::DeviceControl(f) => {
                if f.report(bus)? {
                    cx.resync_requested = true;
                }
            }
            Self::Touch2D(f) => {
                // A failed report keeps the last known surface, matching the
                // slots it left untouched.
                let fingers = f.report(bus, &mut *cx.sink)?;
                cx.fingers_on_surface = fingers > 0;
            }
            Self::Buttons1D(f) => f.report(bus, cx.fingers_on_surface, &mut *cx.sink)?,
            Self::Diagnostics(f) => f.report(cx.status),
        }
        Ok(())
    }

    /// Report every contact and button this handler still holds as released.
    pub(crate) fn release_all(&mut self, sink: &mut dyn InputSink) {
        match self {
            Self::Touch2D(f) => f.release_all(sink),
            Self::Buttons1D(f) => f.release_all(sink),
            Self::DeviceControl(_) | Self::Diagnostics(_) => {}
        }
    }

    /// Tell the handler that fingers appeared on or all left the 2D sensor.
    pub(crate) fn surface_changed(&mut self, fingers_on_surface: bool) {
        if let Self::Buttons1D(f) = self {
            f.surface_changed(fingers_on_surface);
        }
    }
}
