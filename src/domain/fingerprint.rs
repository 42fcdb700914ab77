use borsh::BorshSerialize;
use sha2::{Digest, Sha256};

/// Calculate the fingerprint of a value.
///
/// The fingerprint is a SHA256 hash of the Borsh-serialized value, rendered
/// as lowercase hex. Borsh encoding is deterministic, so equal values always
/// produce equal fingerprints.
///
/// # Panics
///
/// Panics if borsh serialization fails (which should never happen for
/// in-memory data).
#[must_use]
pub fn fingerprint<T: BorshSerialize + ?Sized>(value: &T) -> String {
    // encode using [borsh](https://borsh.io/)
    let encoded = borsh::to_vec(value).expect("this should never fail");

    let hash = Sha256::digest(encoded);

    format!("{hash:x}")
}
