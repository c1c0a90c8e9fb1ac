//! Property-based tests for the invariants this core must never violate,
//! regardless of input shape.

use credential_core::aead::AeadEngine;
use proptest::prelude::*;
use zeroize::Zeroizing;

fn arbitrary_key() -> Zeroizing<[u8; 32]> {
    let mut bytes = [0u8; 32];
    bytes[0] = 1;
    bytes[1] = 2;
    Zeroizing::new(bytes)
}

proptest! {
    #[test]
    fn prop_encrypt_decrypt_roundtrips_for_any_plaintext(plaintext in proptest::collection::vec(any::<u8>(), 0..512)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let engine = AeadEngine::new(1_000_000, 24);
            let key = arbitrary_key();

            let payload = engine.encrypt("prop-key", 1, &key, &plaintext, None).await.unwrap();
            let decrypted = engine.decrypt(&key, &payload, None).await.unwrap();

            prop_assert_eq!(&decrypted[..], plaintext.as_slice());
            Ok(())
        })?;
    }

    #[test]
    fn prop_tampering_any_ciphertext_byte_breaks_integrity(
        plaintext in proptest::collection::vec(any::<u8>(), 1..64),
        flip_index in 0usize..64,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let engine = AeadEngine::new(1_000_000, 24);
            let key = arbitrary_key();

            let mut payload = engine.encrypt("prop-key", 1, &key, &plaintext, None).await.unwrap();
            if payload.ciphertext.is_empty() {
                return Ok(());
            }
            let index = flip_index % payload.ciphertext.len();
            payload.ciphertext[index] ^= 0x01;

            let result = engine.decrypt(&key, &payload, None).await;
            prop_assert!(result.is_err());
            Ok(())
        })?;
    }

    #[test]
    fn prop_aad_mismatch_always_fails(
        plaintext in proptest::collection::vec(any::<u8>(), 0..64),
        aad_a in proptest::collection::vec(any::<u8>(), 1..16),
        aad_b in proptest::collection::vec(any::<u8>(), 1..16),
    ) {
        prop_assume!(aad_a != aad_b);
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let engine = AeadEngine::new(1_000_000, 24);
            let key = arbitrary_key();

            let payload = engine
                .encrypt("prop-key", 1, &key, &plaintext, Some(&aad_a))
                .await
                .unwrap();
            let result = engine.decrypt(&key, &payload, Some(&aad_b)).await;
            prop_assert!(result.is_err());
            Ok(())
        })?;
    }
}
