//! Request signing.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Compute the robot request signature.
///
/// `base64(HMAC-SHA256(key = secret, message = "{timestamp}\n{secret}"))`
/// where `timestamp` is Unix epoch milliseconds.
pub fn calculate_sign(secret: &str, timestamp_ms: i64) -> String {
    let string_to_sign = format!("{}\n{}", timestamp_ms, secret);

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(string_to_sign.as_bytes());

    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}
