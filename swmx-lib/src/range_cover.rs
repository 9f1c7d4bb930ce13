use ipnetwork::Ipv4Network;

use std::net::Ipv4Addr;

/// Minimal CIDR cover of the inclusive interval `[lo, hi]`.
///
/// Greedy from the low end: each step takes the largest block that is both
/// aligned at the cursor and fits inside the remaining interval. The union of
/// the returned networks equals the interval exactly. An inverted interval
/// yields an empty cover.
pub fn summarize(lo: Ipv4Addr, hi: Ipv4Addr) -> Vec<Ipv4Network> {
    let start = u32::from(lo);
    let end = u32::from(hi);
    if start > end {
        return Vec::new();
    }

    let mut cover = Vec::new();
    let mut cursor = start as u64;
    let end = end as u64;
    while cursor <= end {
        let align_bits = if cursor == 0 { 32 } else { (cursor as u32).trailing_zeros() };
        let span = end - cursor + 1;
        let span_bits = 63 - span.leading_zeros();
        let block_bits = align_bits.min(span_bits).min(32);
        let prefix = 32 - block_bits as u8;
        if let Ok(net) = Ipv4Network::new(Ipv4Addr::from(cursor as u32), prefix) {
            cover.push(net);
        }
        cursor += 1u64 << block_bits;
    }
    cover
}
