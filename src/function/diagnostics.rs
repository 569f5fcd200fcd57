//! Analog diagnostics (function 0x54).
//!
//! Only the sensor geometry and report-ready notifications are tracked here.
//! Fetching capacitance frames is left to a test-reporting expansion.

use crate::{
    common::F54_QUERY_LEN, descriptor::FunctionDescriptor, function::InterruptAllocation,
    transport::RegisterAccess, DriverError,
};

#[derive(Debug)]
pub struct Diagnostics {
    descriptor: FunctionDescriptor,
    allocation: InterruptAllocation,
    rx_electrodes: u8,
    tx_electrodes: u8,
    reports_ready: u32,
}

impl Diagnostics {
    pub(crate) fn init<B: RegisterAccess>(
        bus: &mut B,
        descriptor: FunctionDescriptor,
        allocation: InterruptAllocation,
    ) -> Result<Self, DriverError<B::BusError>> {
        let mut query = [0u8; F54_QUERY_LEN];
        bus.read(descriptor.query_base, &mut query)?;
        debug!("diagnostics: {} rx, {} tx electrodes", query[0], query[1]);

        Ok(Self {
            descriptor,
            allocation,
            rx_electrodes: query[0],
            tx_electrodes: query[1],
            reports_ready: 0,
        })
    }

    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    pub fn allocation(&self) -> InterruptAllocation {
        self.allocation
    }

    pub fn rx_electrodes(&self) -> u8 {
        self.rx_electrodes
    }

    pub fn tx_electrodes(&self) -> u8 {
        self.tx_electrodes
    }

    /// Number of report-ready interrupts seen since enumeration.
    pub fn reports_ready(&self) -> u32 {
        self.reports_ready
    }

    pub(crate) fn report(&mut self, _status: &[u8]) {
        self.reports_ready = self.reports_ready.wrapping_add(1);
        trace!("diagnostics report ready ({})", self.reports_ready);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testing::{SimChip, SimDelay},
        transport::RegisterTransport,
    };

    #[test]
    fn reads_electrode_counts() {
        let chip = SimChip::new();
        chip.poke(0x0190, &[28, 16]);
        let mut bus = RegisterTransport::new(chip.clone(), SimDelay::new());
        let descriptor =
            FunctionDescriptor::from_registers(1, &[0x90, 0x00, 0xA0, 0xB0, 0x01, 0x54]);

        let mut diag =
            Diagnostics::init(&mut bus, descriptor, InterruptAllocation::new(3, 1)).unwrap();
        assert_eq!(diag.rx_electrodes(), 28);
        assert_eq!(diag.tx_electrodes(), 16);

        diag.report(&[0x08]);
        diag.report(&[0x08]);
        assert_eq!(diag.reports_ready(), 2);
    }
}
