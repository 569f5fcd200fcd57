//! Common register constants and helper functions.
//!
//! This module contains the register layout constants and the pure byte
//! decoding used by the enumeration code and the function decoders.

// Bus
pub(crate) const DEFAULT_I2C_ADDR: u8 = 0x20;
pub(crate) const PAGE_SELECT_REG: u8 = 0xFF;
pub(crate) const RETRY_COUNT: usize = 10;
pub(crate) const RETRY_DELAY_MS: u32 = 20;

// Page description table
pub(crate) const PAGES_TO_SERVICE: u8 = 10;
pub(crate) const PDT_START: u8 = 0xE9;
pub(crate) const PDT_END: u8 = 0x0A;
pub(crate) const PDT_ENTRY_SIZE: u8 = 6;

// Function numbers
pub(crate) const FN_DEVICE_CONTROL: u8 = 0x01;
pub(crate) const FN_TOUCH_2D: u8 = 0x11;
pub(crate) const FN_BUTTONS_0D: u8 = 0x1A;
pub(crate) const FN_DIAGNOSTICS: u8 = 0x54;

// Device control (F01)
pub(crate) const F01_QUERY_LEN: usize = 21;
pub(crate) const F01_PRODUCT_ID_OFFSET: usize = 11;
pub(crate) const F01_PRODUCT_ID_LEN: usize = 10;
pub(crate) const F01_BUILD_ID_OFFSET: usize = 18;
pub(crate) const F01_RESET_COMMAND: u8 = 0x01;
pub(crate) const F01_CTRL0_CONFIGURED: u8 = 0x80;
pub(crate) const F01_STATUS_CRC_IN_PROGRESS: u8 = 0x06;
pub(crate) const SELF_TEST_RETRIES: usize = 10;
pub(crate) const SELF_TEST_RETRY_DELAY_MS: u32 = 20;
pub(crate) const RESET_SETTLE_MS: u32 = 100;

// 2D touch (F11)
pub(crate) const F11_QUERY_LEN: usize = 6;
pub(crate) const F11_CTRL_MAX_POS_OFFSET: u16 = 6;
pub(crate) const F11_CTRL_ORIENTATION_OFFSET: u16 = 10;
pub(crate) const F11_ORIENTATION_SWAP_AXES: u8 = 0x01;
pub(crate) const F11_FINGER_DATA_LEN: usize = 5;
pub(crate) const F11_MAX_FINGERS: usize = 10;

// 0D buttons (F1A)
pub(crate) const F1A_QUERY_LEN: usize = 2;

// Diagnostics (F54)
pub(crate) const F54_QUERY_LEN: usize = 2;

// Expansion modules
pub const EXPANSION_RECONCILE_PERIOD_MS: u32 = 1000;

/*
 -- Common register data processing --
*/

/// Number of status registers needed to hold `bits` interrupt bits.
pub(crate) fn status_register_count(bits: usize) -> usize {
    bits.div_ceil(8)
}

/// Decodes the F11 finger count field (query 1, bits 0-2).
///
/// Values 0 through 4 each stand for one more finger than their value, 5
/// stands for ten fingers. 6 and 7 are undefined.
pub(crate) fn finger_count_from_register(value: u8) -> Option<usize> {
    match value & 0x07 {
        v @ 0..=4 => Some(v as usize + 1),
        5 => Some(F11_MAX_FINGERS),
        _ => None,
    }
}

/// Extracts a finger's 2 bit status from the packed status registers.
pub(crate) fn finger_status_from_registers(regs: &[u8], finger: usize) -> u8 {
    let shift = (finger % 4) * 2;
    regs.get(finger / 4).map_or(0, |reg| (reg >> shift) & 0x03)
}

/// Extracts a button's bit from the packed button data registers.
pub(crate) fn button_bit_from_registers(regs: &[u8], button: usize) -> bool {
    regs.get(button / 8)
        .is_some_and(|reg| (reg >> (button % 8)) & 0x01 != 0)
}

/// Extracts the 12 bit coordinate from the lsb register and the nibble
/// register holding its high bits.
pub(crate) fn coord_from_registers(lsb: u8, msb_nibble: u8) -> u16 {
    // last 4 bits are MSB
    let msb = msb_nibble & 0x0F;
    // Convert to 12 bit represented in u16.
    ((msb as u16) << 8) | lsb as u16
}

/// Extracts the X and Y coordinates from a finger data block.
///
/// Byte 2 carries the X high nibble in bits 0-3 and the Y high nibble in
/// bits 4-7.
pub(crate) fn position_from_registers(x_lsb: u8, y_lsb: u8, xy_msb: u8) -> (u16, u16) {
    (
        coord_from_registers(x_lsb, xy_msb),
        coord_from_registers(y_lsb, xy_msb >> 4),
    )
}

/// Extracts the (major, minor) contact widths from the width nibble pair.
pub(crate) fn widths_from_register(value: u8) -> (u8, u8) {
    let wx = value & 0x0F;
    let wy = value >> 4;
    (wx.max(wy), wx.min(wy))
}

/// Extracts a 12 bit sensor maximum from the low and high control registers.
pub(crate) fn max_position_from_registers(lsb: u8, msb: u8) -> u16 {
    coord_from_registers(lsb, msb)
}

/// Splits a 12 bit sensor maximum into its low and high control registers.
pub(crate) fn max_position_to_registers(value: u16) -> [u8; 2] {
    [(value & 0xFF) as u8, ((value >> 8) & 0x0F) as u8]
}

/// Builds the contiguous interrupt bit run for a function.
///
/// Bits that would spill past the first register are dropped.
pub(crate) fn interrupt_mask(offset: usize, count: u8) -> u8 {
    let run = (1u16 << count.min(8)) - 1;
    ((run << (offset % 8)) & 0xFF) as u8
}
