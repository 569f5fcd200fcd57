//! A `no_std` protocol engine for RMI4 touch controllers.
//!
//! The engine talks to the controller over a paged I2C register bus. It
//! discovers the controller's functions from the page description table,
//! demultiplexes the shared attention interrupt onto them and decodes 2D
//! touch and capacitive button reports into [`SlotUpdate`]s and
//! [`ButtonUpdate`]s for an [`InputSink`].
//!
//! [`Rmi4`] is the blocking engine. [`Rmi4Async`] waits on the attention
//! line and drives periodic expansion reconciliation on top of it.
//!
//! ```ignore
//! let config = PlatformConfig::new()
//!     .with_sensor_max(1080, 1920)
//!     .with_button_codes([158, 172, 139]);
//! let rmi = Rmi4::new(i2c, delay, sink, config);
//! rmi.bring_up()?;
//! loop {
//!     wait_for_attention();
//!     rmi.handle_attention()?;
//! }
//! ```

#![no_std]

extern crate alloc;

// Must come first so the logging macros are visible to every module.
#[macro_use]
mod fmt;

mod asynch;
mod common;
pub mod config;
pub mod descriptor;
pub mod expansion;
pub mod function;
pub mod input;
pub mod registry;
mod sync;
pub mod transport;

#[cfg(test)]
mod testing;

pub use asynch::Rmi4Async;
pub use common::EXPANSION_RECONCILE_PERIOD_MS;
pub use config::PlatformConfig;
pub use expansion::{AttnOutcome, ExpansionId, ExpansionKind, ExpansionModule};
pub use function::control::{FirmwareStatus, Identity};
pub use input::{ButtonUpdate, Contact, FingerState, InputSink, SlotUpdate};
pub use sync::Rmi4;
pub use transport::{RegisterAccess, RegisterAddress, RegisterTransport};

/// A function's registers do not describe a layout the engine can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// The 2D sensor reports a reserved finger count encoding.
    UnsupportedFingerCount(u8),
    /// The 2D sensor has no absolute position data.
    NoAbsoluteData,
    /// The device has buttons but the platform provides no key codes.
    MissingButtonMap,
    /// A function's data registers run past the end of its page.
    InvalidDescriptor,
}

/// A driver error.
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverError<E> {
    /// A data transfer failed on every attempt.
    Transport(E),
    /// Selecting the register page failed on every attempt.
    PageSelect(E),
    /// A function has a layout the engine does not support.
    Protocol(ProtocolError),
    /// No usable device: it could not be identified, or it has not been
    /// enumerated since the last failed resync.
    NoDevice,
    /// An expansion module of this kind is already registered.
    ExpansionRegistered(ExpansionKind),
    /// No expansion module of this kind is registered.
    ExpansionNotFound(ExpansionKind),
    /// The IRQ pin is not set.
    IrqPinNotSet,
    /// An error occured while waiting for the IRQ pin.
    IrqError,
}

impl<E> DriverError<E> {
    /// Whether the bus failed, as opposed to the device or the caller.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::PageSelect(_))
    }
}

impl<E> From<ProtocolError> for DriverError<E> {
    fn from(value: ProtocolError) -> Self {
        Self::Protocol(value)
    }
}
