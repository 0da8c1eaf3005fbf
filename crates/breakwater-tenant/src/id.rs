//! Tenant ID derivation.

use sha2::{Digest, Sha256};

/// Prefix carried by every derived tenant ID.
pub const TENANT_ID_PREFIX: &str = "tenant-";

/// Maximum tenant ID length in bytes.
pub const MAX_TENANT_ID_BYTES: usize = 64;

/// Derives a tenant ID from the display name and creation timestamp.
///
/// The ID is `tenant-` followed by the hex encoding of the first 16 bytes
/// of SHA-256(name ‖ creation_nanos): 39 bytes total, well inside the
/// 64-byte bound, with negligible collision probability.
pub fn derive_tenant_id(name: &str, creation_nanos: u128) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(creation_nanos.to_be_bytes());
    let digest = hasher.finalize();
    format!("{TENANT_ID_PREFIX}{}", hex::encode(&digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_shape_and_bound() {
        let id = derive_tenant_id("acme", 123_456_789);
        assert!(id.starts_with(TENANT_ID_PREFIX));
        assert_eq!(id.len(), TENANT_ID_PREFIX.len() + 32);
        assert!(id.len() <= MAX_TENANT_ID_BYTES);
    }

    #[test]
    fn distinct_inputs_give_distinct_ids() {
        assert_ne!(
            derive_tenant_id("acme", 1),
            derive_tenant_id("acme", 2),
        );
        assert_ne!(
            derive_tenant_id("acme", 1),
            derive_tenant_id("acmf", 1),
        );
    }

    #[test]
    fn derivation_is_deterministic() {
        assert_eq!(derive_tenant_id("acme", 42), derive_tenant_id("acme", 42));
    }
}
