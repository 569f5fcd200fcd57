//! 2D touch sensor (function 0x11).

use alloc::{vec, vec::Vec};

use crate::{
    common::{
        self, F11_CTRL_MAX_POS_OFFSET, F11_CTRL_ORIENTATION_OFFSET, F11_FINGER_DATA_LEN,
        F11_ORIENTATION_SWAP_AXES, F11_QUERY_LEN,
    },
    config::PlatformConfig,
    descriptor::FunctionDescriptor,
    function::InterruptAllocation,
    input::{Contact, FingerState, InputSink, SlotUpdate},
    transport::RegisterAccess,
    DriverError, ProtocolError,
};

const QUERY_HAS_ABS: u8 = 0x10;

/// The last known state of one finger slot.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchSlot {
    pub present: bool,
    pub x: u16,
    pub y: u16,
    pub width_major: u8,
    pub width_minor: u8,
    pub pressure: u8,
    pub state: FingerState,
}

impl TouchSlot {
    fn contact(&self) -> Contact {
        Contact {
            x: self.x,
            y: self.y,
            width_major: self.width_major,
            width_minor: self.width_minor,
            pressure: self.pressure,
            state: self.state,
        }
    }
}

/// Coordinate space of the sensor and the corrections applied to it.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchGeometry {
    pub max_x: u16,
    pub max_y: u16,
    pub margin_x: u16,
    pub margin_y: u16,
    pub x_flip: bool,
    pub y_flip: bool,
}

impl TouchGeometry {
    /// Flip, then subtract the margins, then clamp to the sensor maximum.
    pub fn transform(&self, x: u16, y: u16) -> (u16, u16) {
        let x = if self.x_flip { self.max_x.saturating_sub(x) } else { x };
        let y = if self.y_flip { self.max_y.saturating_sub(y) } else { y };
        (
            x.saturating_sub(self.margin_x).min(self.max_x),
            y.saturating_sub(self.margin_y).min(self.max_y),
        )
    }

    /// Decode one finger data block.
    ///
    /// `[x_lsb, y_lsb, y_msb << 4 | x_msb, wy << 4 | wx, z, ...]`
    pub fn decode(&self, block: &[u8], state: FingerState) -> TouchSlot {
        let (x, y) = common::position_from_registers(block[0], block[1], block[2]);
        let (x, y) = self.transform(x, y);
        let (width_major, width_minor) = common::widths_from_register(block[3]);
        TouchSlot {
            present: true,
            x,
            y,
            width_major,
            width_minor,
            pressure: block[4],
            state,
        }
    }
}

/// Decoder for the 2D sensor's finger reports.
#[derive(Debug)]
pub struct TouchDecoder {
    descriptor: FunctionDescriptor,
    allocation: InterruptAllocation,
    geometry: TouchGeometry,
    finger_data_len: usize,
    slots: Vec<TouchSlot>,
    // Report buffers, reused every cycle.
    pending: Vec<TouchSlot>,
    status_buf: Vec<u8>,
    finger_buf: Vec<u8>,
    updates: Vec<SlotUpdate>,
}

impl TouchDecoder {
    /// Query the sensor's layout and program its clipping window.
    pub(crate) fn init<B: RegisterAccess>(
        bus: &mut B,
        descriptor: FunctionDescriptor,
        allocation: InterruptAllocation,
        config: &PlatformConfig,
    ) -> Result<Self, DriverError<B::BusError>> {
        let mut query = [0u8; F11_QUERY_LEN];
        bus.read(descriptor.query_base, &mut query)?;

        let finger_count = common::finger_count_from_register(query[1]).ok_or(
            DriverError::Protocol(ProtocolError::UnsupportedFingerCount(query[1] & 0x07)),
        )?;
        if query[1] & QUERY_HAS_ABS == 0 {
            return Err(DriverError::Protocol(ProtocolError::NoAbsoluteData));
        }
        let finger_data_len = F11_FINGER_DATA_LEN + (query[5] & 0x03) as usize;
        let data_end = descriptor.data_base.offset() as usize
            + finger_count.div_ceil(4)
            + finger_count * finger_data_len;
        if data_end > 0x100 {
            return Err(DriverError::Protocol(ProtocolError::InvalidDescriptor));
        }

        let (max_x, max_y) = match (config.sensor_max_x, config.sensor_max_y) {
            (None, None) => read_sensor_max(bus, &descriptor, config.swap_axes)?,
            (x, y) => {
                let (current_x, current_y) = read_sensor_max(bus, &descriptor, config.swap_axes)?;
                write_sensor_max(
                    bus,
                    &descriptor,
                    x.unwrap_or(current_x),
                    y.unwrap_or(current_y),
                    config.swap_axes,
                )?
            }
        };

        debug!(
            "2D sensor: {} fingers, {} byte finger data, max {} x {}",
            finger_count,
            finger_data_len,
            max_x,
            max_y
        );

        Ok(Self {
            descriptor,
            allocation,
            geometry: TouchGeometry {
                max_x,
                max_y,
                margin_x: config.margin_x,
                margin_y: config.margin_y,
                x_flip: config.x_flip,
                y_flip: config.y_flip,
            },
            finger_data_len,
            slots: vec![TouchSlot::default(); finger_count],
            pending: vec![TouchSlot::default(); finger_count],
            status_buf: vec![0; finger_count.div_ceil(4)],
            finger_buf: vec![0; finger_data_len],
            updates: Vec::with_capacity(finger_count),
        })
    }

    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    pub fn allocation(&self) -> InterruptAllocation {
        self.allocation
    }

    pub fn geometry(&self) -> &TouchGeometry {
        &self.geometry
    }

    /// Number of finger slots the sensor supports.
    pub fn finger_count(&self) -> usize {
        self.slots.len()
    }

    /// Sensor maximum in reporting orientation.
    pub fn sensor_max(&self) -> (u16, u16) {
        (self.geometry.max_x, self.geometry.max_y)
    }

    pub fn slots(&self) -> &[TouchSlot] {
        &self.slots
    }

    /// Have the device swap its X and Y axes.
    pub(crate) fn apply_axis_swap<B: RegisterAccess>(
        &self,
        bus: &mut B,
    ) -> Result<(), DriverError<B::BusError>> {
        let addr = self.descriptor.control_base.add(F11_CTRL_ORIENTATION_OFFSET);
        let orientation = bus.read_register(addr)?;
        bus.write(addr, &[orientation | F11_ORIENTATION_SWAP_AXES])
    }

    /// Read and decode one finger report.
    ///
    /// Returns the number of fingers on the sensor. On error nothing is
    /// reported and the slots keep their previous state.
    pub(crate) fn report<B: RegisterAccess>(
        &mut self,
        bus: &mut B,
        sink: &mut dyn InputSink,
    ) -> Result<usize, DriverError<B::BusError>> {
        bus.read(self.descriptor.data_base, &mut self.status_buf)?;

        let mut reserved = false;
        for finger in 0..self.slots.len() {
            let state =
                FingerState::from_bits(common::finger_status_from_registers(&self.status_buf, finger));
            if !state.is_present() {
                self.pending[finger] = TouchSlot::default();
                continue;
            }
            reserved |= state == FingerState::Reserved;

            let offset = self.status_buf.len() + finger * self.finger_data_len;
            bus.read(self.descriptor.data_base.add(offset as u16), &mut self.finger_buf)?;
            self.pending[finger] = self.geometry.decode(&self.finger_buf, state);
        }

        if reserved {
            warn!("finger reported with reserved status, treating it as present");
        }

        self.updates.clear();
        let mut fingers = 0;
        for (index, (previous, current)) in self.slots.iter().zip(&self.pending).enumerate() {
            if current.present {
                fingers += 1;
                self.updates.push(SlotUpdate {
                    slot: index as u8,
                    contact: Some(current.contact()),
                });
            } else if previous.present {
                self.updates.push(SlotUpdate {
                    slot: index as u8,
                    contact: None,
                });
            }
        }
        self.slots.copy_from_slice(&self.pending);

        if !self.updates.is_empty() {
            sink.report(&self.updates, &[]);
        }
        Ok(fingers)
    }

    /// Lift every finger still on the sensor.
    pub(crate) fn release_all(&mut self, sink: &mut dyn InputSink) {
        self.updates.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.present {
                *slot = TouchSlot::default();
                self.updates.push(SlotUpdate {
                    slot: index as u8,
                    contact: None,
                });
            }
        }

        if !self.updates.is_empty() {
            sink.report(&self.updates, &[]);
        }
    }
}

/// Read the sensor maximum, returned in reporting orientation.
fn read_sensor_max<B: RegisterAccess>(
    bus: &mut B,
    descriptor: &FunctionDescriptor,
    swap_axes: bool,
) -> Result<(u16, u16), DriverError<B::BusError>> {
    let mut control = [0u8; 4];
    bus.read(descriptor.control_base.add(F11_CTRL_MAX_POS_OFFSET), &mut control)?;
    let x = common::max_position_from_registers(control[0], control[1]);
    let y = common::max_position_from_registers(control[2], control[3]);
    Ok(if swap_axes { (y, x) } else { (x, y) })
}

/// Program the sensor maximum, given in reporting orientation, and read it
/// back.
fn write_sensor_max<B: RegisterAccess>(
    bus: &mut B,
    descriptor: &FunctionDescriptor,
    max_x: u16,
    max_y: u16,
    swap_axes: bool,
) -> Result<(u16, u16), DriverError<B::BusError>> {
    let (sensor_x, sensor_y) = if swap_axes { (max_y, max_x) } else { (max_x, max_y) };
    let [x_lsb, x_msb] = common::max_position_to_registers(sensor_x);
    let [y_lsb, y_msb] = common::max_position_to_registers(sensor_y);
    bus.write(
        descriptor.control_base.add(F11_CTRL_MAX_POS_OFFSET),
        &[x_lsb, x_msb, y_lsb, y_msb],
    )?;
    read_sensor_max(bus, descriptor, swap_axes)
}
