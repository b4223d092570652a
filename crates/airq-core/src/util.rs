//! Peripheral identifier helpers.
//!
//! CoreBluetooth hides MAC addresses and reports `00:00:00:00:00:00`, so on
//! macOS the platform-assigned peripheral UUID is the only stable identifier.
//! Elsewhere the Bluetooth address is used.

use btleplug::platform::PeripheralId;

/// Address reported by platforms that do not expose MAC addresses.
pub const PLACEHOLDER_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a peripheral ID as a string.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    strip_debug_wrapper(&format!("{:?}", id)).to_string()
}

/// Create an identifier string from an address and peripheral ID.
///
/// Uses the peripheral ID when the address is the placeholder, the address
/// otherwise.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if is_placeholder_address(address) {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

/// Whether `address` carries no usable device address.
pub fn is_placeholder_address(address: &str) -> bool {
    address.is_empty() || address == PLACEHOLDER_ADDRESS
}

fn strip_debug_wrapper(formatted: &str) -> &str {
    formatted
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
}
