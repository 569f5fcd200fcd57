//! Platform configuration.

use alloc::vec::Vec;

use crate::common::DEFAULT_I2C_ADDR;

/// Board level settings for the sensor.
///
/// The engine reads this at bring-up and again on every resync, so changes
/// made through [`Rmi4::set_config`](crate::Rmi4::set_config) take effect on
/// the next resync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    /// The 7 bit I2C address of the device.
    pub i2c_address: u8,
    /// When set, programmed into the 2D sensor's clipping window.
    pub sensor_max_x: Option<u16>,
    pub sensor_max_y: Option<u16>,
    /// Subtracted from every reported X coordinate.
    pub margin_x: u16,
    /// Subtracted from every reported Y coordinate.
    pub margin_y: u16,
    pub x_flip: bool,
    pub y_flip: bool,
    /// Have the device swap its X and Y axes.
    pub swap_axes: bool,
    /// Key code for each capacitive button, by button index.
    pub button_codes: Vec<u16>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            i2c_address: DEFAULT_I2C_ADDR,
            sensor_max_x: None,
            sensor_max_y: None,
            margin_x: 0,
            margin_y: 0,
            x_flip: false,
            y_flip: false,
            swap_axes: false,
            button_codes: Vec::new(),
        }
    }
}

impl PlatformConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_i2c_address(mut self, address: u8) -> Self {
        self.i2c_address = address;
        self
    }

    /// Set the sensor resolution written to the device at init.
    pub fn with_sensor_max(mut self, max_x: u16, max_y: u16) -> Self {
        self.sensor_max_x = Some(max_x);
        self.sensor_max_y = Some(max_y);
        self
    }

    pub fn with_margins(mut self, margin_x: u16, margin_y: u16) -> Self {
        self.margin_x = margin_x;
        self.margin_y = margin_y;
        self
    }

    pub fn with_flip(mut self, x_flip: bool, y_flip: bool) -> Self {
        self.x_flip = x_flip;
        self.y_flip = y_flip;
        self
    }

    pub fn with_swap_axes(mut self, swap_axes: bool) -> Self {
        self.swap_axes = swap_axes;
        self
    }

    pub fn with_button_codes(mut self, codes: impl Into<Vec<u16>>) -> Self {
        self.button_codes = codes.into();
        self
    }
}
