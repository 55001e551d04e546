// crates/capgate-gateway/src/auth.rs
// ============================================================================
// Module: Bearer Credentials
// Description: Authorization header parsing for the invocation endpoint.
// Purpose: Extract the presented bearer token without interpreting it.
// Dependencies: std
// ============================================================================

//! ## Overview
//! The gateway only extracts the bearer value here. Whether the value names an
//! active token is decided by the authorization resolver, so a malformed or
//! non-bearer header is treated the same as no header.

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted `Authorization` header length in bytes.
pub const MAX_AUTH_HEADER_BYTES: usize = 4096;

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Returns the bearer token carried by an `Authorization` header value.
///
/// The scheme match is case-insensitive. Oversized headers, other schemes,
/// and empty tokens yield `None`.
#[must_use]
pub fn parse_bearer(header: Option<&str>) -> Option<String> {
    let header = header?;
    if header.len() > MAX_AUTH_HEADER_BYTES {
        return None;
    }
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
