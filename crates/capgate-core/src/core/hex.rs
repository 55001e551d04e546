// crates/capgate-core/src/core/hex.rs
// ============================================================================
// Module: Hex Encoding
// Description: Lowercase hex rendering of byte strings.
// Purpose: Render token secrets and digest fingerprints in one stable form.
// Dependencies: None
// ============================================================================

//! ## Overview
//! Lowercase hex rendering of byte strings.

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================
