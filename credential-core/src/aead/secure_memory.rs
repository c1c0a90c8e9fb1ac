//! Helpers for keeping secret material off the heap for longer than necessary.

use zeroize::Zeroizing;

/// A 256-bit symmetric key that zeroizes its backing memory on drop.
pub type SecretKey = Zeroizing<[u8; 32]>;

/// Wrap freshly-decrypted or freshly-generated bytes so they are zeroized
/// the instant they go out of scope, even on an early return.
#[must_use]
pub fn secure_bytes(bytes: Vec<u8>) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_bytes_are_usable_like_a_slice() {
        let buf = secure_bytes(vec![1, 2, 3]);
        assert_eq!(&buf[..], &[1, 2, 3]);
    }
}
