//! Capacitive buttons (function 0x1A).
//!
//! Buttons sitting next to a touch sensor pick up stray coupling from
//! fingers on the sensor. While any finger is on the 2D sensor, button
//! activity is hidden from the input sink:
//!
//! * a button pressed while fingers are down is never reported, neither its
//!   press nor its release;
//! * a button already pressed when fingers land is hidden from then on and
//!   its release is swallowed;
//! * when the last finger lifts, hidden buttons are re-armed without a
//!   deferred press. Only the next real press is reported again.

use alloc::{vec, vec::Vec};

use crate::{
    common::{self, F1A_QUERY_LEN},
    config::PlatformConfig,
    descriptor::FunctionDescriptor,
    function::InterruptAllocation,
    input::{ButtonUpdate, InputSink},
    transport::RegisterAccess,
    DriverError, ProtocolError,
};

/// Where a button stands with respect to the input sink.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonPhase {
    /// Released, or pressed without the sink ever having seen the press.
    #[default]
    Idle,
    /// Pressed and reported as pressed.
    PressedVisible,
    /// Pressed while fingers are on the sensor. Nothing further is reported.
    PressedSuppressed,
}

/// One capacitive button.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ButtonState {
    pub code: u16,
    raw: bool,
    phase: ButtonPhase,
}

impl ButtonState {
    pub fn new(code: u16) -> Self {
        Self {
            code,
            raw: false,
            phase: ButtonPhase::Idle,
        }
    }

    /// The debounced bit from the device.
    pub fn pressed(&self) -> bool {
        self.raw
    }

    pub fn phase(&self) -> ButtonPhase {
        self.phase
    }

    pub fn suppressed_by_touch_hysteresis(&self) -> bool {
        self.phase == ButtonPhase::PressedSuppressed
    }

    /// Feed the button's bit from a new report.
    ///
    /// Returns the event to report, if any.
    pub fn update(&mut self, pressed: bool, fingers_on_surface: bool) -> Option<ButtonUpdate> {
        if pressed == self.raw {
            return None;
        }
        self.raw = pressed;

        let (phase, visible) = match (pressed, self.phase) {
            (true, _) if fingers_on_surface => (ButtonPhase::PressedSuppressed, false),
            (true, _) => (ButtonPhase::PressedVisible, true),
            (false, ButtonPhase::PressedVisible) => (ButtonPhase::Idle, true),
            (false, _) => (ButtonPhase::Idle, false),
        };
        self.phase = phase;

        visible.then_some(ButtonUpdate {
            code: self.code,
            pressed,
        })
    }

    /// Fingers landed on, or all lifted off, the 2D sensor.
    pub fn surface_changed(&mut self, fingers_on_surface: bool) {
        self.phase = match (self.phase, fingers_on_surface) {
            (ButtonPhase::PressedVisible, true) => ButtonPhase::PressedSuppressed,
            (ButtonPhase::PressedSuppressed, false) => ButtonPhase::Idle,
            (phase, _) => phase,
        };
    }
}

/// Decoder for button reports.
#[derive(Debug)]
pub struct ButtonDecoder {
    descriptor: FunctionDescriptor,
    allocation: InterruptAllocation,
    buttons: Vec<ButtonState>,
    // Report buffers, reused every cycle.
    data_buf: Vec<u8>,
    updates: Vec<ButtonUpdate>,
}

impl ButtonDecoder {
    pub(crate) fn init<B: RegisterAccess>(
        bus: &mut B,
        descriptor: FunctionDescriptor,
        allocation: InterruptAllocation,
        config: &PlatformConfig,
    ) -> Result<Self, DriverError<B::BusError>> {
        let mut query = [0u8; F1A_QUERY_LEN];
        bus.read(descriptor.query_base, &mut query)?;
        let max_count = (query[0] & 0x07) as usize + 1;

        if config.button_codes.is_empty() {
            return Err(DriverError::Protocol(ProtocolError::MissingButtonMap));
        }
        if config.button_codes.len() != max_count {
            warn!(
                "device has {} buttons, button map has {} codes",
                max_count,
                config.button_codes.len()
            );
        }

        let buttons: Vec<ButtonState> = config
            .button_codes
            .iter()
            .take(max_count)
            .map(|&code| ButtonState::new(code))
            .collect();

        debug!("{} buttons", buttons.len());

        Ok(Self {
            descriptor,
            allocation,
            data_buf: vec![0; max_count.div_ceil(8)],
            updates: Vec::with_capacity(buttons.len()),
            buttons,
        })
    }

    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    pub fn allocation(&self) -> InterruptAllocation {
        self.allocation
    }

    pub fn buttons(&self) -> &[ButtonState] {
        &self.buttons
    }

    pub(crate) fn report<B: RegisterAccess>(
        &mut self,
        bus: &mut B,
        fingers_on_surface: bool,
        sink: &mut dyn InputSink,
    ) -> Result<(), DriverError<B::BusError>> {
        bus.read(self.descriptor.data_base, &mut self.data_buf)?;

        self.updates.clear();
        for (index, button) in self.buttons.iter_mut().enumerate() {
            let pressed = common::button_bit_from_registers(&self.data_buf, index);
            if let Some(update) = button.update(pressed, fingers_on_surface) {
                self.updates.push(update);
            }
        }

        if !self.updates.is_empty() {
            sink.report(&[], &self.updates);
        }
        Ok(())
    }

    pub(crate) fn surface_changed(&mut self, fingers_on_surface: bool) {
        for button in self.buttons.iter_mut() {
            button.surface_changed(fingers_on_surface);
        }
    }

    /// Release every button the sink has seen pressed.
    pub(crate) fn release_all(&mut self, sink: &mut dyn InputSink) {
        self.updates.clear();
        for button in self.buttons.iter_mut() {
            if button.phase == ButtonPhase::PressedVisible {
                self.updates.push(ButtonUpdate {
                    code: button.code,
                    pressed: false,
                });
            }
            *button = ButtonState::new(button.code);
        }

        if !self.updates.is_empty() {
            sink.report(&[], &self.updates);
        }
    }
}
