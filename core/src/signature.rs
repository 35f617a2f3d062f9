//! Checkout signatures: HMAC-SHA256 over `"{order_ref}|{payment_ref}"`,
//! hex encoded, keyed with the gateway's key secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac_for(secret: &str, order_ref: &str, payment_ref: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(order_ref.as_bytes());
    mac.update(b"|");
    mac.update(payment_ref.as_bytes());
    Some(mac)
}

/// Compute the signature a gateway would attach to a successful checkout.
///
/// Returns `None` only if the key cannot seed the MAC.
#[must_use]
pub fn sign_checkout(secret: &str, order_ref: &str, payment_ref: &str) -> Option<String> {
    mac_for(secret, order_ref, payment_ref).map(|mac| hex::encode(mac.finalize().into_bytes()))
}

/// Verify a checkout signature in constant time.
#[must_use]
pub fn verify_checkout(secret: &str, order_ref: &str, payment_ref: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    mac_for(secret, order_ref, payment_ref).is_some_and(|mac| mac.verify_slice(&expected).is_ok())
}
