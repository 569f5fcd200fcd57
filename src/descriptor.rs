//! Page description table scanning.
//!
//! Every page of the register space may carry a table of function
//! descriptors growing downwards from `0xE9`. The scanner walks all serviced
//! pages, records each descriptor together with its position in the shared
//! interrupt bitmap and reads the device identity as soon as the device
//! control function turns up.

use alloc::vec::Vec;

use crate::{
    common::{
        self, FN_DEVICE_CONTROL, PAGES_TO_SERVICE, PDT_END, PDT_ENTRY_SIZE, PDT_START,
        SELF_TEST_RETRIES, SELF_TEST_RETRY_DELAY_MS,
    },
    function::{control, FunctionKind},
    transport::{RegisterAccess, RegisterAddress},
    DriverError, Identity,
};

/// One entry of the page description table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FunctionDescriptor {
    pub function_number: u8,
    pub query_base: RegisterAddress,
    pub command_base: RegisterAddress,
    pub control_base: RegisterAddress,
    pub data_base: RegisterAddress,
    /// Number of interrupt sources, 0 to 7.
    pub interrupt_source_count: u8,
    pub version: u8,
    pub page_number: u8,
}

impl FunctionDescriptor {
    /// Decode a raw 6 byte table entry found on `page`.
    ///
    /// `[query, command, control, data, info, function]`, where info holds
    /// the interrupt source count in bits 0-2 and the version in bits 6-7.
    pub fn from_registers(page: u8, entry: &[u8; 6]) -> Self {
        Self {
            function_number: entry[5],
            query_base: RegisterAddress::new(page, entry[0]),
            command_base: RegisterAddress::new(page, entry[1]),
            control_base: RegisterAddress::new(page, entry[2]),
            data_base: RegisterAddress::new(page, entry[3]),
            interrupt_source_count: entry[4] & 0x07,
            version: entry[4] >> 6,
            page_number: page,
        }
    }

    pub fn kind(&self) -> FunctionKind {
        FunctionKind::from(self.function_number)
    }
}

/// A descriptor and the bit where its interrupt sources start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScannedFunction {
    pub descriptor: FunctionDescriptor,
    /// Sum of the interrupt source counts of every descriptor before this one.
    pub interrupt_offset: usize,
}

/// The outcome of one pass over the page description table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorScan {
    /// Every descriptor found, in scan order, including unrecognised ones.
    pub functions: Vec<ScannedFunction>,
    /// Total interrupt sources of all scanned descriptors.
    pub interrupt_count: usize,
    pub control: FunctionDescriptor,
    pub identity: Identity,
    /// The device is running its bootloader; only device control is usable.
    pub in_bootloader: bool,
}

impl DescriptorScan {
    /// Number of interrupt status registers the dispatcher has to read.
    pub fn status_register_count(&self) -> usize {
        common::status_register_count(self.interrupt_count)
    }
}

/// Walk the page description table.
///
/// Fails with [`DriverError::NoDevice`] when no device control function is
/// found or its identity cannot be read. Any other transport error is
/// propagated unchanged.
pub fn scan<B: RegisterAccess>(bus: &mut B) -> Result<DescriptorScan, DriverError<B::BusError>> {
    let mut functions = Vec::new();
    let mut interrupt_count = 0;
    let mut control = None;
    let mut in_bootloader = false;

    'pages: for page in 0..PAGES_TO_SERVICE {
        let mut offset = PDT_START;
        while offset > PDT_END {
            let mut entry = [0u8; 6];
            bus.read(RegisterAddress::new(page, offset), &mut entry)?;
            let descriptor = FunctionDescriptor::from_registers(page, &entry);
            if descriptor.function_number == 0 {
                break;
            }

            debug!(
                "found function {:#x} on page {}, {} interrupt sources",
                descriptor.function_number,
                page,
                descriptor.interrupt_source_count
            );

            functions.push(ScannedFunction {
                descriptor,
                interrupt_offset: interrupt_count,
            });
            interrupt_count += descriptor.interrupt_source_count as usize;

            if descriptor.function_number == FN_DEVICE_CONTROL {
                let identity = query_identity(bus, &descriptor)?;
                control = Some((descriptor, identity));
                if identity.firmware_status.flash_prog {
                    warn!("device is in flash programming mode, only device control is available");
                    in_bootloader = true;
                    break 'pages;
                }
            }

            offset -= PDT_ENTRY_SIZE;
        }
    }

    let Some((control, identity)) = control else {
        warn!("no device control function found");
        return Err(DriverError::NoDevice);
    };

    Ok(DescriptorScan {
        functions,
        interrupt_count,
        control,
        identity,
        in_bootloader,
    })
}

/// Read the device identity, waiting out a firmware self-test.
fn query_identity<B: RegisterAccess>(
    bus: &mut B,
    control: &FunctionDescriptor,
) -> Result<Identity, DriverError<B::BusError>> {
    for attempt in 1..=SELF_TEST_RETRIES {
        let identity = control::read_identity(bus, control).map_err(|_| {
            warn!("device identity could not be read");
            DriverError::NoDevice
        })?;

        if !identity.firmware_status.self_test_in_progress() {
            info!(
                "manufacturer {}, product info {:#x} {:#x}, build {}",
                identity.manufacturer_id,
                identity.product_info[0],
                identity.product_info[1],
                identity.build_id
            );
            return Ok(identity);
        }

        debug!("firmware self-test in progress (attempt {})", attempt);
        bus.delay_ms(SELF_TEST_RETRY_DELAY_MS);
    }

    warn!("firmware self-test did not finish");
    Err(DriverError::NoDevice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testing::{reference_chip, SimChip, SimDelay, F01_DATA},
        transport::RegisterTransport,
    };

    fn bus(chip: &SimChip) -> RegisterTransport<SimChip, SimDelay> {
        RegisterTransport::new(chip.clone(), SimDelay::new())
    }

    #[test]
    fn decodes_entry() {
        let d = FunctionDescriptor::from_registers(2, &[0x10, 0x20, 0x30, 0x40, 0b0100_0011, 0x11]);
        assert_eq!(d.function_number, 0x11);
        assert_eq!(d.query_base.raw(), 0x0210);
        assert_eq!(d.command_base.raw(), 0x0220);
        assert_eq!(d.control_base.raw(), 0x0230);
        assert_eq!(d.data_base.raw(), 0x0240);
        assert_eq!(d.interrupt_source_count, 3);
        assert_eq!(d.version, 1);
        assert_eq!(d.page_number, 2);
        assert_eq!(d.kind(), FunctionKind::Touch2D);
    }

    #[test]
    fn scans_reference_table() {
        let chip = reference_chip();
        let scan = scan(&mut bus(&chip)).unwrap();

        let numbers: Vec<u8> = scan.functions.iter().map(|f| f.descriptor.function_number).collect();
        assert_eq!(numbers, [0x01, 0x11, 0x1A]);
        let offsets: Vec<usize> = scan.functions.iter().map(|f| f.interrupt_offset).collect();
        assert_eq!(offsets, [0, 0, 2]);
        assert_eq!(scan.interrupt_count, 3);
        assert_eq!(scan.status_register_count(), 1);
        assert!(!scan.in_bootloader);
        assert_eq!(scan.identity.manufacturer_id, 1);
        assert_eq!(&scan.identity.product_id, b"TM2950-001");
    }

    #[test]
    fn concatenates_pages_in_order() {
        let chip = reference_chip();
        chip.descriptor(3, 0xE9, [0x00, 0x00, 0x00, 0x00, 0x05, 0x54]);
        chip.descriptor(3, 0xE3, [0x10, 0x00, 0x00, 0x20, 0x06, 0x34]);
        let scan = scan(&mut bus(&chip)).unwrap();

        let last = scan.functions.last().unwrap();
        assert_eq!(last.descriptor.function_number, 0x34);
        assert_eq!(last.descriptor.data_base.raw(), 0x0320);
        assert_eq!(last.interrupt_offset, 3 + 5);
        assert_eq!(scan.interrupt_count, 3 + 5 + 6);
        assert_eq!(scan.status_register_count(), 2);
    }

    #[test]
    fn stops_at_the_bottom_of_a_full_page() {
        let chip = SimChip::new();
        // Fill the whole table down to the last entry above 0x0A.
        let mut offset = PDT_START;
        let mut entries = 0;
        while offset > PDT_END {
            let function = if offset == PDT_START { 0x01 } else { 0x99 };
            chip.descriptor(0, offset, [0x00, 0x00, 0x00, 0x01, 0x00, function]);
            offset -= PDT_ENTRY_SIZE;
            entries += 1;
        }
        let scan = scan(&mut bus(&chip)).unwrap();
        assert_eq!(scan.functions.len(), entries);
    }

    #[test]
    fn waits_out_self_test() {
        let chip = reference_chip();
        chip.poke(F01_DATA, &[0x06]);
        let delay = SimDelay::new();
        let mut bus = RegisterTransport::new(chip.clone(), delay.clone());

        let err = scan(&mut bus).unwrap_err();
        assert!(matches!(err, DriverError::NoDevice));
        assert_eq!(delay.total_ms(), (SELF_TEST_RETRIES as u32 * SELF_TEST_RETRY_DELAY_MS) as u64);

        chip.poke(F01_DATA, &[0x00]);
        assert!(scan(&mut bus).is_ok());
    }

    #[test]
    fn bootloader_mode_stops_early() {
        let chip = reference_chip();
        chip.descriptor(0, 0xE9, [0x20, 0x40, 0x41, 0x08, 0x01, 0x01]);
        chip.poke(F01_DATA, &[0x40]);
        let scan = scan(&mut bus(&chip)).unwrap();

        assert!(scan.in_bootloader);
        assert_eq!(scan.functions.len(), 1);
        assert_eq!(scan.interrupt_count, 1);
    }

    #[test]
    fn missing_control_function_is_no_device() {
        let chip = SimChip::new();
        chip.descriptor(0, 0xE9, [0x00, 0x00, 0x00, 0x00, 0x02, 0x11]);
        assert!(matches!(scan(&mut bus(&chip)), Err(DriverError::NoDevice)));
    }

    #[test]
    fn unreadable_identity_is_no_device() {
        let chip = reference_chip();
        let mut bus = bus(&chip);
        // The first descriptor read succeeds, then every identity attempt fails.
        let mut entry = [0u8; 6];
        bus.read(RegisterAddress::new(0, PDT_START), &mut entry).unwrap();
        let control = FunctionDescriptor::from_registers(0, &entry);
        chip.fail_reads(usize::MAX);
        assert!(matches!(query_identity(&mut bus, &control), Err(DriverError::NoDevice)));
    }
}
