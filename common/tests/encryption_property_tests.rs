// Property-based tests for the encryption envelope

use common::artifact::Artifact;
use common::errors::TransformError;
use common::transform::encrypt::{decrypt_file, encrypt};
use proptest::prelude::*;

fn encrypt_bytes(data: &[u8], key_hex: &str) -> Vec<u8> {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.bin");
        tokio::fs::write(&path, data).await.unwrap();
        let artifact = Artifact::describe(&path, "plain.bin", "application/octet-stream")
            .await
            .unwrap();
        let encrypted = encrypt(artifact, key_hex).await.unwrap();
        tokio::fs::read(&encrypted.path).await.unwrap()
    })
}

fn decrypt_bytes(envelope: &[u8], key_hex: &str) -> Result<Vec<u8>, TransformError> {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("payload.enc");
    let dst = dir.path().join("payload.out");
    std::fs::write(&src, envelope).unwrap();
    decrypt_file(&src, &dst, key_hex)?;
    Ok(std::fs::read(&dst).unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// For any payload and key, decrypt(encrypt(x, k), k) == x.
    #[test]
    fn property_round_trip(
        data in proptest::collection::vec(any::<u8>(), 0..8192),
        key in proptest::array::uniform32(any::<u8>()),
    ) {
        let key_hex = hex::encode(key);
        let envelope = encrypt_bytes(&data, &key_hex);

        // salt + iv + ciphertext + tag.
        prop_assert_eq!(envelope.len(), 32 + data.len() + 32);

        let recovered = decrypt_bytes(&envelope, &key_hex).unwrap();
        prop_assert_eq!(recovered, data);
    }

    /// Any single flipped byte anywhere in the envelope fails authentication.
    #[test]
    fn property_tamper_detection(
        data in proptest::collection::vec(any::<u8>(), 1..2048),
        key in proptest::array::uniform32(any::<u8>()),
        position in any::<prop::sample::Index>(),
    ) {
        let key_hex = hex::encode(key);
        let mut envelope = encrypt_bytes(&data, &key_hex);

        let index = position.index(envelope.len());
        envelope[index] ^= 0x01;

        prop_assert!(decrypt_bytes(&envelope, &key_hex).is_err());
    }

    /// A different key never decrypts the envelope.
    #[test]
    fn property_wrong_key_rejected(
        data in proptest::collection::vec(any::<u8>(), 1..1024),
        key in proptest::array::uniform32(any::<u8>()),
        other in proptest::array::uniform32(any::<u8>()),
    ) {
        prop_assume!(key != other);

        let envelope = encrypt_bytes(&data, &hex::encode(key));
        prop_assert!(decrypt_bytes(&envelope, &hex::encode(other)).is_err());
    }

    /// Fresh salt and IV make every envelope unique, even for equal inputs.
    #[test]
    fn property_envelopes_never_repeat(
        data in proptest::collection::vec(any::<u8>(), 1..512),
        key in proptest::array::uniform32(any::<u8>()),
    ) {
        let key_hex = hex::encode(key);
        let first = encrypt_bytes(&data, &key_hex);
        let second = encrypt_bytes(&data, &key_hex);
        prop_assert_ne!(first, second);
    }
}
