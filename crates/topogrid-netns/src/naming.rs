//! Deterministic parking namespace names.

use sha2::{Digest, Sha256};

pub const PARKING_PREFIX: &str = "clab-park-";

/// Longest namespace name we create under the namespace directory.
pub const MAX_NETNS_NAME_LEN: usize = 200;

const HASH_LEN: usize = 10;

/// Name of the namespace holding `long_name`'s interfaces while it is
/// stopped: `clab-park-<long name>`. Names over the limit keep their
/// leading part and end in `-<10 hex chars of sha256(long name)>`.
pub fn parking_netns_name(long_name: &str) -> String {
    let name = format!("{PARKING_PREFIX}{long_name}");
    if name.len() <= MAX_NETNS_NAME_LEN {
        return name;
    }

    let digest = hex::encode(Sha256::digest(long_name.as_bytes()));
    let mut keep = MAX_NETNS_NAME_LEN - 1 - HASH_LEN;
    while !name.is_char_boundary(keep) {
        keep -= 1;
    }
    format!("{}-{}", &name[..keep], &digest[..HASH_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_are_prefixed() {
        assert_eq!(parking_netns_name("clab-dc1-srl1"), "clab-park-clab-dc1-srl1");
    }

    #[test]
    fn long_names_are_truncated_and_hashed() {
        let long = "x".repeat(400);
        let name = parking_netns_name(&long);
        assert_eq!(name.len(), MAX_NETNS_NAME_LEN);
        assert!(name.starts_with(PARKING_PREFIX));

        let (_, suffix) = name.rsplit_once('-').unwrap();
        assert_eq!(suffix.len(), HASH_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hashing_is_deterministic_and_distinguishes_names() {
        let a = "a".repeat(250);
        let mut b = a.clone();
        b.push('b');
        assert_eq!(parking_netns_name(&a), parking_netns_name(&a));
        assert_ne!(parking_netns_name(&a), parking_netns_name(&b));
    }

    #[test]
    fn boundary_length_is_kept_verbatim() {
        let long = "y".repeat(MAX_NETNS_NAME_LEN - PARKING_PREFIX.len());
        assert_eq!(parking_netns_name(&long), format!("{PARKING_PREFIX}{long}"));
    }

    #[test]
    fn multibyte_names_cut_on_char_boundary() {
        let long = "é".repeat(150);
        let name = parking_netns_name(&long);
        assert!(name.len() <= MAX_NETNS_NAME_LEN);
    }
}
