/// FNV-style string hash used for every key in the server.
///
/// The accumulator is 32 bits wide; the result is widened so it can be
/// masked against any table capacity.
#[inline]
pub fn str_hash(data: &[u8]) -> u64 {
    let mut h: u32 = 0x811C_9DC5;
    for &b in data {
        h = h.wrapping_add(b as u32).wrapping_mul(0x0100_0193);
    }
    h as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(str_hash(b""), 0x811C_9DC5);
        assert_eq!(str_hash(b"foo"), str_hash(b"foo"));
        assert_ne!(str_hash(b"foo"), str_hash(b"bar"));
    }

    #[test]
    fn test_hash_fits_in_32_bits() {
        assert!(str_hash(b"some fairly long key to mix around") <= u32::MAX as u64);
    }
}
