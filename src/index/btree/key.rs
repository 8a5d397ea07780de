use byteorder::{ByteOrder, LittleEndian};

/// A fixed-width, totally ordered index key.
///
/// The encoded length is a compile-time property so node capacity can be
/// computed from the page size; `encode`/`decode` fix the on-page
/// representation (little-endian for the integer keys).
pub trait IndexKey: Clone + Ord + Send + Sync + 'static {
    const ENCODED_LEN: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

impl IndexKey for i32 {
    const ENCODED_LEN: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }
}

impl IndexKey for i64 {
    const ENCODED_LEN: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }
}

impl IndexKey for u32 {
    const ENCODED_LEN: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }
}

impl IndexKey for u64 {
    const ENCODED_LEN: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }
}

/// N-byte key compared lexicographically. Shorter inputs are zero-padded,
/// so ordering matches a memcmp of the padded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedKey<const N: usize>([u8; N]);

impl<const N: usize> FixedKey<N> {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = [0u8; N];
        let len = bytes.len().min(N);
        data[..len].copy_from_slice(&bytes[..len]);
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> From<&str> for FixedKey<N> {
    fn from(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }
}

impl<const N: usize> IndexKey for FixedKey<N> {
    const ENCODED_LEN: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self.0);
    }

    fn decode(buf: &[u8]) -> Self {
        Self::from_bytes(&buf[..N])
    }
}

/// The fixed-width key sizes supported by the index
pub type Key4 = FixedKey<4>;
pub type Key8 = FixedKey<8>;
pub type Key16 = FixedKey<16>;
pub type Key32 = FixedKey<32>;
pub type Key64 = FixedKey<64>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_key_round_trip() {
        let mut buf = [0u8; 8];
        (-123i64).encode(&mut buf);
        assert_eq!(i64::decode(&buf), -123);

        let mut buf = [0u8; 4];
        7u32.encode(&mut buf);
        assert_eq!(u32::decode(&buf), 7);
    }

    #[test]
    fn test_fixed_key_ordering() {
        let a = Key8::from("apple");
        let b = Key8::from("banana");
        assert!(a < b);

        // Zero padding keeps prefixes smaller
        let short = Key8::from("ab");
        let long = Key8::from("abc");
        assert!(short < long);
    }

    #[test]
    fn test_fixed_key_truncates() {
        let k = Key4::from("abcdefgh");
        assert_eq!(k.as_bytes(), b"abcd");
    }
}
