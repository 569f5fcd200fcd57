//! Simulated RMI4 device and recording collaborators for unit tests.

use alloc::{boxed::Box, rc::Rc, vec, vec::Vec};
use core::{
    cell::{Cell, RefCell},
    future::Future,
    pin::pin,
    task::{Context, Poll, RawWaker, RawWakerVTable, Waker},
};

use embedded_hal::{
    delay::DelayNs,
    i2c::{ErrorKind, ErrorType, I2c, Operation, SevenBitAddress},
};

use crate::{
    common::PAGE_SELECT_REG,
    input::{ButtonUpdate, InputSink, SlotUpdate},
};

type ResetHook = Box<dyn FnMut(&mut [u8])>;

struct ChipState {
    regs: Vec<u8>,
    page: u8,
    pointer: u16,
    skip_reads: usize,
    fail_reads: usize,
    fail_writes: usize,
    reads: usize,
    page_selects: usize,
    writes: Vec<(u16, Vec<u8>)>,
    reset_register: Option<u16>,
    configuration: Option<(u16, u16)>,
    resets: usize,
    on_reset: Option<ResetHook>,
}

/// A register-file model of an RMI4 device on an I2C bus.
///
/// Clones share the same device so a test can keep a handle while the
/// engine owns the bus.
#[derive(Clone)]
pub(crate) struct SimChip(Rc<RefCell<ChipState>>);

impl SimChip {
    pub(crate) fn new() -> Self {
        Self(Rc::new(RefCell::new(ChipState {
            regs: vec![0; 0x10000],
            page: 0,
            pointer: 0,
            skip_reads: 0,
            fail_reads: 0,
            fail_writes: 0,
            reads: 0,
            page_selects: 0,
            writes: Vec::new(),
            reset_register: None,
            configuration: None,
            resets: 0,
            on_reset: None,
        })))
    }

    pub(crate) fn poke(&self, addr: u16, data: &[u8]) {
        let mut state = self.0.borrow_mut();
        let start = addr as usize;
        state.regs[start..start + data.len()].copy_from_slice(data);
    }

    pub(crate) fn peek(&self, addr: u16, len: usize) -> Vec<u8> {
        let state = self.0.borrow();
        let start = addr as usize;
        state.regs[start..start + len].to_vec()
    }

    /// Place a descriptor entry `[query, command, control, data, info, function]`.
    pub(crate) fn descriptor(&self, page: u8, offset: u8, entry: [u8; 6]) {
        self.poke(((page as u16) << 8) | offset as u16, &entry);
    }

    pub(crate) fn fail_reads(&self, count: usize) {
        self.fail_reads_after(0, count);
    }

    /// Let `skip` reads through, then fail the next `count`.
    pub(crate) fn fail_reads_after(&self, skip: usize, count: usize) {
        let mut state = self.0.borrow_mut();
        state.skip_reads = skip;
        state.fail_reads = count;
    }

    pub(crate) fn fail_writes(&self, count: usize) {
        self.0.borrow_mut().fail_writes = count;
    }

    pub(crate) fn reads(&self) -> usize {
        self.0.borrow().reads
    }

    pub(crate) fn page_selects(&self) -> usize {
        self.0.borrow().page_selects
    }

    pub(crate) fn last_write(&self) -> Option<(u16, Vec<u8>)> {
        self.0.borrow().writes.last().cloned()
    }

    pub(crate) fn writes_to(&self, addr: u16) -> Vec<Vec<u8>> {
        self.0
            .borrow()
            .writes
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, d)| d.clone())
            .collect()
    }

    /// Treat a write of bit 0 to `addr` as a device reset.
    pub(crate) fn reset_on_write(&self, addr: u16) {
        self.0.borrow_mut().reset_register = Some(addr);
    }

    /// Model the configured handshake of device control: setting bit 7 of
    /// `control` clears bit 7 of `status`, and a reset does the opposite.
    pub(crate) fn configure_with(&self, control: u16, status: u16) {
        self.0.borrow_mut().configuration = Some((control, status));
    }

    pub(crate) fn on_reset(&self, hook: impl FnMut(&mut [u8]) + 'static) {
        self.0.borrow_mut().on_reset = Some(Box::new(hook));
    }

    pub(crate) fn resets(&self) -> usize {
        self.0.borrow().resets
    }
}

impl ErrorType for SimChip {
    type Error = ErrorKind;
}

impl I2c<SevenBitAddress> for SimChip {
    fn transaction(
        &mut self,
        _address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut state = self.0.borrow_mut();
        let state = &mut *state;

        let is_read = operations.iter().any(|op| matches!(op, Operation::Read(_)));
        if is_read {
            state.reads += 1;
            if state.skip_reads > 0 {
                state.skip_reads -= 1;
            } else if state.fail_reads > 0 {
                state.fail_reads -= 1;
                return Err(ErrorKind::Other);
            }
        } else if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(ErrorKind::Other);
        }

        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => {
                    let Some((&reg, data)) = bytes.split_first() else {
                        continue;
                    };
                    if reg == PAGE_SELECT_REG {
                        if let Some(&page) = data.first() {
                            state.page = page;
                            state.page_selects += 1;
                        }
                        continue;
                    }
                    state.pointer = ((state.page as u16) << 8) | reg as u16;
                    if data.is_empty() {
                        continue;
                    }
                    let start = state.pointer as usize;
                    state.regs[start..start + data.len()].copy_from_slice(data);
                    state.writes.push((state.pointer, data.to_vec()));

                    if let Some((control, status)) = state.configuration {
                        if control == state.pointer && data[0] & 0x80 != 0 {
                            state.regs[status as usize] &= !0x80;
                        }
                    }
                    if state.reset_register == Some(state.pointer) && data[0] & 0x01 != 0 {
                        state.resets += 1;
                        state.page = 0;
                        if let Some((control, status)) = state.configuration {
                            state.regs[control as usize] &= !0x80;
                            state.regs[status as usize] |= 0x80;
                        }
                        if let Some(hook) = state.on_reset.as_mut() {
                            hook(&mut state.regs);
                        }
                    }
                }
                Operation::Read(buf) => {
                    for (i, b) in buf.iter_mut().enumerate() {
                        *b = state.regs[(state.pointer as usize + i) & 0xFFFF];
                    }
                }
            }
        }
        Ok(())
    }
}

/// A delay that records how long it was asked to wait.
#[derive(Clone, Default)]
pub(crate) struct SimDelay(Rc<Cell<u64>>);

impl SimDelay {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn total_ms(&self) -> u64 {
        self.0.get() / 1_000_000
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.set(self.0.get() + ns as u64);
    }
}

/// Everything handed to an [`InputSink`], one entry per `report` call.
#[derive(Clone, Default)]
pub(crate) struct RecordingSink(Rc<RefCell<Vec<(Vec<SlotUpdate>, Vec<ButtonUpdate>)>>>);

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn slots(&self) -> Vec<SlotUpdate> {
        self.0.borrow().iter().flat_map(|(s, _)| s.clone()).collect()
    }

    pub(crate) fn buttons(&self) -> Vec<ButtonUpdate> {
        self.0.borrow().iter().flat_map(|(_, b)| b.clone()).collect()
    }

    pub(crate) fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

impl InputSink for RecordingSink {
    fn report(&mut self, slots: &[SlotUpdate], buttons: &[ButtonUpdate]) {
        self.0.borrow_mut().push((slots.to_vec(), buttons.to_vec()));
    }
}

// Register map of the reference device used across the engine tests.
pub(crate) const F01_QUERY: u16 = 0x0020;
pub(crate) const F01_COMMAND: u16 = 0x0040;
pub(crate) const F01_CONTROL: u16 = 0x0041;
pub(crate) const F01_DATA: u16 = 0x0008;
pub(crate) const F11_QUERY: u16 = 0x0050;
pub(crate) const F11_CONTROL: u16 = 0x0060;
pub(crate) const F11_DATA: u16 = 0x0080;
pub(crate) const F1A_QUERY: u16 = 0x0070;
pub(crate) const F1A_CONTROL: u16 = 0x0078;
pub(crate) const F1A_DATA: u16 = 0x0038;

/// A device exposing device control (no interrupt sources), a five finger
/// 2D sensor on interrupt bits 0-1 and three buttons on interrupt bit 2.
pub(crate) fn reference_chip() -> SimChip {
    let chip = SimChip::new();
    chip.descriptor(0, 0xE9, [F01_QUERY as u8, F01_COMMAND as u8, F01_CONTROL as u8, F01_DATA as u8, 0x00, 0x01]);
    chip.descriptor(0, 0xE3, [F11_QUERY as u8, 0x00, F11_CONTROL as u8, F11_DATA as u8, 0x02, 0x11]);
    chip.descriptor(0, 0xDD, [F1A_QUERY as u8, 0x00, F1A_CONTROL as u8, F1A_DATA as u8, 0x01, 0x1A]);

    // Identity: manufacturer 1, product info 0x33/0x07, product id
    // "TM2950-001", build id tail overlapping the product id.
    let mut query = [0u8; 21];
    query[0] = 0x01;
    query[2] = 0x33;
    query[3] = 0x07;
    query[11..21].copy_from_slice(b"TM2950-001");
    chip.poke(F01_QUERY, &query);

    // Five fingers with absolute data, 1600 x 2560 sensor.
    chip.poke(F11_QUERY, &[0x01, 0x14, 0x10, 0x18, 0x00, 0x00]);
    chip.poke(F11_CONTROL + 6, &[0x40, 0x06, 0x00, 0x0A]);

    // Three buttons.
    chip.poke(F1A_QUERY, &[0x02, 0x00]);

    chip.reset_on_write(F01_COMMAND);
    chip.configure_with(F01_CONTROL, F01_DATA);
    chip
}

/// Set a finger's 2 bit status and its data block on the reference device.
pub(crate) fn set_finger(chip: &SimChip, finger: usize, status: u8, block: [u8; 5]) {
    let status_addr = F11_DATA + (finger / 4) as u16;
    let shift = (finger % 4) * 2;
    let current = chip.peek(status_addr, 1)[0];
    chip.poke(status_addr, &[(current & !(0x03 << shift)) | (status << shift)]);
    chip.poke(F11_DATA + 2 + (finger * 5) as u16, &block);
}

pub(crate) fn raise_interrupt(chip: &SimChip, bits: u8) {
    chip.poke(F01_DATA + 1, &[bits]);
}

fn noop_raw_waker() -> RawWaker {
    fn clone(_: *const ()) -> RawWaker {
        noop_raw_waker()
    }
    fn noop(_: *const ()) {}
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
    RawWaker::new(core::ptr::null(), &VTABLE)
}

/// Poll a future that is expected to complete without waiting.
pub(crate) fn poll_ready<F: Future>(future: F) -> Option<F::Output> {
    // SAFETY: the vtable functions ignore the data pointer.
    let waker = unsafe { Waker::from_raw(noop_raw_waker()) };
    let mut cx = Context::from_waker(&waker);
    let mut future = pin!(future);
    match future.as_mut().poll(&mut cx) {
        Poll::Ready(output) => Some(output),
        Poll::Pending => None,
    }
}
