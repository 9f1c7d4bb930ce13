use ipnetwork::Ipv4Network;

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

/// Exact-match table over every valid dotted-quad mask, in both normal and
/// wildcard form. `0.0.0.0` is claimed by the /32 wildcard, matching how
/// SonicWall configs use it.
static SUBNET_MASKS: LazyLock<HashMap<String, u8>> = LazyLock::new(|| {
    let mut table = HashMap::new();
    for prefix in 0..=32u8 {
        let mask = mask_for_prefix(prefix);
        table.insert(mask.to_string(), prefix);
    }
    for prefix in 1..=32u8 {
        let wildcard = Ipv4Addr::from(!u32::from(mask_for_prefix(prefix)));
        table.insert(wildcard.to_string(), prefix);
    }
    table
});

/// Prefix length for a dotted-quad mask, or `None` for anything that is not
/// one of the table entries.
pub fn prefix_len(mask: &str) -> Option<u8> {
    SUBNET_MASKS.get(mask.trim()).copied()
}

/// Canonical dotted-quad mask for a prefix length.
pub fn mask_for_prefix(prefix: u8) -> Ipv4Addr {
    // prefix is always 0..=32 here, the fallback never triggers
    Ipv4Network::new(Ipv4Addr::UNSPECIFIED, prefix.min(32))
        .map(|net| net.mask())
        .unwrap_or(Ipv4Addr::UNSPECIFIED)
}

#[cfg(test)]
mod tests {
    use super::{mask_for_prefix, prefix_len};

    #[test]
    fn test_normal_masks() {
        assert_eq!(prefix_len("255.255.255.0"), Some(24));
        assert_eq!(prefix_len("255.255.255.255"), Some(32));
        assert_eq!(prefix_len("128.0.0.0"), Some(1));
        assert_eq!(prefix_len("255.255.128.0"), Some(17));
    }

    #[test]
    fn test_wildcard_masks() {
        assert_eq!(prefix_len("0.0.0.255"), Some(24));
        assert_eq!(prefix_len("0.0.0.0"), Some(32));
        assert_eq!(prefix_len("0.127.255.255"), Some(9));
        assert_eq!(prefix_len("0.0.127.255"), Some(17));
    }

    #[test]
    fn test_invalid_masks() {
        assert_eq!(prefix_len("255.0.255.0"), None);
        assert_eq!(prefix_len("garbage"), None);
        assert_eq!(prefix_len("255.255.255.1"), None);
    }

    #[test]
    fn test_mask_round_trip() {
        for prefix in 1..=32u8 {
            let mask = mask_for_prefix(prefix).to_string();
            assert_eq!(prefix_len(&mask), Some(prefix), "mask {mask}");
        }
    }
}
