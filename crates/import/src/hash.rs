use sha2::{Digest, Sha256};

use patrimo_core::Money;

/// Fingerprint of a transaction for one user: SHA-256 over
/// `user|iso_date|trimmed label|amount`, lowercase hex. The amount uses its
/// shortest decimal form so `-54.30` and `-54.3` hash alike.
pub fn compute_hash(user_id: &str, iso_date: &str, label: &str, amount: Money) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(iso_date.as_bytes());
    hasher.update(b"|");
    hasher.update(label.trim().as_bytes());
    hasher.update(b"|");
    hasher.update(amount.canonical().as_bytes());
    hex::encode(hasher.finalize())
}
