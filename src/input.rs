//! Events handed to the input reporting collaborator.

/// Confidence the device attaches to a finger, from its 2 bit status.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FingerState {
    #[default]
    Absent,
    /// Present and accurately located.
    Accurate,
    /// Present but the position is noisy.
    Inaccurate,
    /// The reserved status value. Reported as present with low confidence.
    Reserved,
}

impl FingerState {
    /// Gets the FingerState from the two status bits of a finger.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Absent,
            1 => Self::Accurate,
            2 => Self::Inaccurate,
            _ => Self::Reserved,
        }
    }

    pub fn is_present(self) -> bool {
        self != Self::Absent
    }
}

/// A finger in contact with the sensor, in reporting coordinates.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Contact {
    pub x: u16,
    pub y: u16,
    /// The larger of the two 4 bit contact widths.
    pub width_major: u8,
    /// The smaller of the two 4 bit contact widths.
    pub width_minor: u8,
    /// The 8 bit Z value.
    pub pressure: u8,
    pub state: FingerState,
}

/// One slot of the multi-touch slot protocol.
///
/// A slot update either carries the slot's current contact or asserts that
/// the finger previously tracked in that slot has lifted.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotUpdate {
    pub slot: u8,
    /// `None` when the finger has lifted.
    pub contact: Option<Contact>,
}

impl SlotUpdate {
    pub fn is_lifted(&self) -> bool {
        self.contact.is_none()
    }
}

/// A button press or release.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ButtonUpdate {
    /// The key code from the platform button map.
    pub code: u16,
    pub pressed: bool,
}

/// Receiver of decoded input frames.
///
/// Reports are fire-and-forget: the engine never observes a result. Each
/// decoder calls `report` at most once per report cycle.
pub trait InputSink {
    fn report(&mut self, slots: &[SlotUpdate], buttons: &[ButtonUpdate]);
}

impl<T: InputSink + ?Sized> InputSink for &mut T {
    fn report(&mut self, slots: &[SlotUpdate], buttons: &[ButtonUpdate]) {
        (**self).report(slots, buttons)
    }
}
