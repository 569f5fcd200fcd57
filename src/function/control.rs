//! Device control (function 0x01).
//!
//! Owns chip identity, device status, the reset command and the interrupt
//! enable registers. The dispatcher reads the interrupt status registers
//! right behind this function's device status register.

use crate::{
    common::{
        F01_BUILD_ID_OFFSET, F01_CTRL0_CONFIGURED, F01_PRODUCT_ID_LEN, F01_PRODUCT_ID_OFFSET,
        F01_QUERY_LEN, F01_RESET_COMMAND, F01_STATUS_CRC_IN_PROGRESS,
    },
    descriptor::FunctionDescriptor,
    function::InterruptAllocation,
    transport::{RegisterAccess, RegisterAddress},
    DriverError,
};

/// The device status register (data register 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FirmwareStatus {
    /// Bits 0-3.
    pub code: u8,
    /// Bit 6. The bootloader is running.
    pub flash_prog: bool,
    /// Bit 7. The device has reset and not been configured since.
    pub unconfigured: bool,
}

impl FirmwareStatus {
    pub fn from_register(value: u8) -> Self {
        Self {
            code: value & 0x0F,
            flash_prog: value & 0x40 != 0,
            unconfigured: value & 0x80 != 0,
        }
    }

    pub fn self_test_in_progress(&self) -> bool {
        self.code == F01_STATUS_CRC_IN_PROGRESS
    }
}

/// Who the device says it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Identity {
    pub manufacturer_id: u8,
    pub product_info: [u8; 2],
    /// ASCII product id, zero padded.
    pub product_id: [u8; F01_PRODUCT_ID_LEN],
    /// 24 bit firmware build id.
    pub build_id: u32,
    pub firmware_status: FirmwareStatus,
}

/// Read identity and device status through a device control descriptor.
pub fn read_identity<B: RegisterAccess>(
    bus: &mut B,
    control: &FunctionDescriptor,
) -> Result<Identity, DriverError<B::BusError>> {
    let mut query = [0u8; F01_QUERY_LEN];
    bus.read(control.query_base, &mut query)?;
    let status = bus.read_register(control.data_base)?;

    let mut product_id = [0u8; F01_PRODUCT_ID_LEN];
    product_id.copy_from_slice(
        &query[F01_PRODUCT_ID_OFFSET..F01_PRODUCT_ID_OFFSET + F01_PRODUCT_ID_LEN],
    );
    let build = &query[F01_BUILD_ID_OFFSET..F01_BUILD_ID_OFFSET + 3];

    Ok(Identity {
        manufacturer_id: query[0],
        product_info: [query[2], query[3]],
        product_id,
        build_id: u32::from_le_bytes([build[0], build[1], build[2], 0]),
        firmware_status: FirmwareStatus::from_register(status),
    })
}

/// Interrupt status registers start right after the device status register.
pub(crate) fn interrupt_status_base(control: &FunctionDescriptor) -> RegisterAddress {
    control.data_base.add(1)
}

/// Interrupt enable registers start right after device control register 0.
pub(crate) fn interrupt_enable_base(control: &FunctionDescriptor) -> RegisterAddress {
    control.control_base.add(1)
}

/// Issue the software reset command.
pub(crate) fn reset<B: RegisterAccess>(
    bus: &mut B,
    control: &FunctionDescriptor,
) -> Result<(), DriverError<B::BusError>> {
    bus.write(control.command_base, &[F01_RESET_COMMAND])
}

/// Set the configured bit in device control register 0 and return the
/// device status that follows.
///
/// The device clears its `unconfigured` status once the bit is set, and
/// drops the bit again whenever it resets.
pub(crate) fn mark_configured<B: RegisterAccess>(
    bus: &mut B,
    control: &FunctionDescriptor,
) -> Result<FirmwareStatus, DriverError<B::BusError>> {
    let ctrl0 = bus.read_register(control.control_base)?;
    bus.write(control.control_base, &[ctrl0 | F01_CTRL0_CONFIGURED])?;
    Ok(FirmwareStatus::from_register(bus.read_register(control.data_base)?))
}

/// The device control function as a report handler.
///
/// Its interrupt sources signal device status changes. The handler latches
/// the new status and asks for a resync when the device has reset itself.
#[derive(Debug)]
pub struct DeviceControl {
    descriptor: FunctionDescriptor,
    allocation: InterruptAllocation,
    status: FirmwareStatus,
}

impl DeviceControl {
    pub(crate) fn new(
        descriptor: FunctionDescriptor,
        allocation: InterruptAllocation,
        status: FirmwareStatus,
    ) -> Self {
        Self {
            descriptor,
            allocation,
            status,
        }
    }

    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    pub fn allocation(&self) -> InterruptAllocation {
        self.allocation
    }

    /// The device status seen at the last report.
    pub fn status(&self) -> FirmwareStatus {
        self.status
    }

    /// Re-read device status. Returns true when the device needs a resync.
    pub(crate) fn report<B: RegisterAccess>(
        &mut self,
        bus: &mut B,
    ) -> Result<bool, DriverError<B::BusError>> {
        self.status = FirmwareStatus::from_register(bus.read_register(self.descriptor.data_base)?);

        if self.status.unconfigured && !self.status.flash_prog {
            warn!("device reset detected (status code {})", self.status.code);
            return Ok(true);
        }
        Ok(false)
    }
}
