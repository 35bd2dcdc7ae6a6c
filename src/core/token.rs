//! Handshake Token Generation
//!
//! Every persistent-link handshake carries a fresh secret token. The token is
//! the only thing distinguishing this server's session from any other, so it
//! comes from the operating system's CSPRNG and is never reused.

use rand::rngs::OsRng;
use rand::RngCore;

/// Bytes of entropy per token (136 bits, above the 130-bit floor).
pub const TOKEN_BYTES: usize = 17;

/// Length of the hex-encoded token.
pub const TOKEN_HEX_LEN: usize = TOKEN_BYTES * 2;

/// Generate a new lowercase hex session token.
///
/// # Example
///
/// ```
/// use linker_bridge::core::token::{generate_token, TOKEN_HEX_LEN};
///
/// let token = generate_token();
/// assert_eq!(token.len(), TOKEN_HEX_LEN);
/// assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
/// ```
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
