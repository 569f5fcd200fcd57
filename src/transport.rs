//! Paged register access over I2C.
//!
//! RMI4 devices expose a 16 bit register space split into 256 byte pages.
//! The page is selected by writing the page-select register that exists at
//! offset `0xFF` of every page; the transport caches the last selected page
//! so consecutive accesses within one page cost a single transfer.

use alloc::vec::Vec;

use embedded_hal::{
    delay::DelayNs,
    i2c::{I2c, SevenBitAddress},
};

use crate::{
    common::{DEFAULT_I2C_ADDR, PAGE_SELECT_REG, RETRY_COUNT, RETRY_DELAY_MS},
    DriverError,
};

/// A 16 bit register address. The high byte selects the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterAddress(u16);

impl RegisterAddress {
    pub const fn new(page: u8, offset: u8) -> Self {
        Self(((page as u16) << 8) | offset as u16)
    }

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn page(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn offset(self) -> u8 {
        self.0 as u8
    }

    /// The address `delta` registers further on.
    pub const fn add(self, delta: u16) -> Self {
        Self(self.0.wrapping_add(delta))
    }
}

impl From<u16> for RegisterAddress {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

/// Register level access to an RMI4 device.
///
/// This is the seam between the protocol engine and the wire. The engine,
/// the function decoders and expansion modules only ever talk to the device
/// through this trait.
pub trait RegisterAccess {
    /// The error reported by the underlying bus.
    type BusError;

    /// Read `buf.len()` consecutive registers starting at `addr`.
    fn read(
        &mut self,
        addr: RegisterAddress,
        buf: &mut [u8],
    ) -> Result<(), DriverError<Self::BusError>>;

    /// Write `data` to consecutive registers starting at `addr`.
    fn write(&mut self, addr: RegisterAddress, data: &[u8])
        -> Result<(), DriverError<Self::BusError>>;

    /// Forget the cached page so the next access selects it again.
    ///
    /// Required after anything that resets the device, which returns it to
    /// page 0 behind the transport's back.
    fn invalidate_page(&mut self);

    /// Block for `ms` milliseconds without touching the bus.
    fn delay_ms(&mut self, ms: u32);

    /// Read a single register.
    fn read_register(
        &mut self,
        addr: RegisterAddress,
    ) -> Result<u8, DriverError<Self::BusError>> {
        let mut buf = [0u8; 1];
        self.read(addr, &mut buf)?;
        Ok(buf[0])
    }
}

/// The I2C implementation of [`RegisterAccess`].
///
/// Every data transfer is attempted up to ten times, 20 ms apart, before the
/// last bus error is surfaced as [`DriverError::Transport`].
pub struct RegisterTransport<I2C, D> {
    i2c: I2C,
    delay: D,
    address: SevenBitAddress,
    current_page: Option<u8>,
}

impl<I2C: I2c<SevenBitAddress>, D: DelayNs> RegisterTransport<I2C, D> {
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self::with_address(i2c, delay, DEFAULT_I2C_ADDR)
    }

    pub fn with_address(i2c: I2C, delay: D, address: SevenBitAddress) -> Self {
        Self {
            i2c,
            delay,
            address,
            current_page: None,
        }
    }

    /// The page the device is known to be on, if any.
    pub fn current_page(&self) -> Option<u8> {
        self.current_page
    }

    fn set_page(&mut self, page: u8) -> Result<(), DriverError<I2C::Error>> {
        if self.current_page == Some(page) {
            return Ok(());
        }

        let address = self.address;
        self.with_retries(|i2c| i2c.write(address, &[PAGE_SELECT_REG, page]))
            .map_err(|e| {
                warn!("page select to {} failed", page);
                DriverError::PageSelect(e)
            })?;

        self.current_page = Some(page);
        Ok(())
    }

    fn with_retries(
        &mut self,
        mut op: impl FnMut(&mut I2C) -> Result<(), I2C::Error>,
    ) -> Result<(), I2C::Error> {
        let mut attempt = 1;
        loop {
            match op(&mut self.i2c) {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= RETRY_COUNT => {
                    warn!("bus transfer failed after {} attempts", attempt);
                    return Err(e);
                }
                Err(_) => {
                    trace!("bus transfer attempt {} failed, retrying", attempt);
                    attempt += 1;
                    self.delay.delay_ms(RETRY_DELAY_MS);
                }
            }
        }
    }

    /// Safely clean up the transport, returning any owned peripherals.
    pub fn destroy(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }
}

impl<I2C: I2c<SevenBitAddress>, D: DelayNs> RegisterAccess for RegisterTransport<I2C, D> {
    type BusError = I2C::Error;

    fn read(&mut self, addr: RegisterAddress, buf: &mut [u8]) -> Result<(), DriverError<I2C::Error>> {
        self.set_page(addr.page())?;

        let address = self.address;
        let reg = [addr.offset()];
        self.with_retries(|i2c| i2c.write_read(address, &reg, buf))
            .map_err(DriverError::Transport)
    }

    fn write(&mut self, addr: RegisterAddress, data: &[u8]) -> Result<(), DriverError<I2C::Error>> {
        self.set_page(addr.page())?;

        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(addr.offset());
        frame.extend_from_slice(data);

        let address = self.address;
        self.with_retries(|i2c| i2c.write(address, &frame))
            .map_err(DriverError::Transport)
    }

    fn invalidate_page(&mut self) {
        self.current_page = None;
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SimChip, SimDelay};

    fn transport(chip: &SimChip, delay: &SimDelay) -> RegisterTransport<SimChip, SimDelay> {
        RegisterTransport::new(chip.clone(), delay.clone())
    }

    #[test]
    fn address_split() {
        let addr = RegisterAddress::new(0x03, 0xE9);
        assert_eq!(addr.raw(), 0x03E9);
        assert_eq!(addr.page(), 0x03);
        assert_eq!(addr.offset(), 0xE9);
        assert_eq!(addr.add(0x17).raw(), 0x0400);
    }

    #[test]
    fn selects_page_only_when_it_changes() {
        let chip = SimChip::new();
        chip.poke(0x0010, &[0xAA]);
        chip.poke(0x0211, &[0xBB]);
        let delay = SimDelay::new();
        let mut t = transport(&chip, &delay);

        assert_eq!(t.read_register(RegisterAddress::from_raw(0x0010)).unwrap(), 0xAA);
        assert_eq!(t.read_register(RegisterAddress::from_raw(0x0012)).unwrap(), 0x00);
        assert_eq!(chip.page_selects(), 1);

        assert_eq!(t.read_register(RegisterAddress::from_raw(0x0211)).unwrap(), 0xBB);
        assert_eq!(chip.page_selects(), 2);
        assert_eq!(t.current_page(), Some(2));

        t.invalidate_page();
        t.read_register(RegisterAddress::from_raw(0x0211)).unwrap();
        assert_eq!(chip.page_selects(), 3);
    }

    #[test]
    fn succeeds_on_tenth_attempt() {
        let chip = SimChip::new();
        chip.poke(0x0020, &[0x5A]);
        let delay = SimDelay::new();
        let mut t = transport(&chip, &delay);
        t.read_register(RegisterAddress::from_raw(0x0000)).unwrap();

        chip.fail_reads(9);
        assert_eq!(t.read_register(RegisterAddress::from_raw(0x0020)).unwrap(), 0x5A);
        assert_eq!(delay.total_ms(), 9 * RETRY_DELAY_MS as u64);
    }

    #[test]
    fn gives_up_after_ten_attempts() {
        let chip = SimChip::new();
        let delay = SimDelay::new();
        let mut t = transport(&chip, &delay);
        t.read_register(RegisterAddress::from_raw(0x0000)).unwrap();

        chip.fail_reads(10);
        let err = t.read_register(RegisterAddress::from_raw(0x0020)).unwrap_err();
        assert!(matches!(err, DriverError::Transport(_)));
        assert!(err.is_transport());
        assert_eq!(t.current_page(), Some(0));
        assert_eq!(chip.reads(), 11);
    }

    #[test]
    fn page_select_failure_skips_the_transfer() {
        let chip = SimChip::new();
        let delay = SimDelay::new();
        let mut t = transport(&chip, &delay);
        t.read_register(RegisterAddress::from_raw(0x0000)).unwrap();
        let reads = chip.reads();

        chip.fail_writes(RETRY_COUNT);
        let err = t.read_register(RegisterAddress::from_raw(0x0100)).unwrap_err();
        assert!(matches!(err, DriverError::PageSelect(_)));
        assert_eq!(t.current_page(), Some(0));
        assert_eq!(chip.reads(), reads);
    }

    #[test]
    fn writes_prefix_the_register_offset() {
        let chip = SimChip::new();
        let delay = SimDelay::new();
        let mut t = transport(&chip, &delay);

        t.write(RegisterAddress::from_raw(0x0166), &[1, 2, 3]).unwrap();
        assert_eq!(chip.peek(0x0166, 3), [1, 2, 3]);
        assert_eq!(chip.last_write(), Some((0x0166, alloc::vec![1, 2, 3])));
    }
}
