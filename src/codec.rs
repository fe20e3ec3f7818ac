use serde::{de::DeserializeOwned, Serialize};

/// Converts secret values to bytes and back.
///
/// `encode_into` receives an empty buffer. Implementations must reserve the
/// final capacity before writing any plaintext: if the buffer reallocates
/// halfway through, the old allocation is freed without being wiped.
/// Whatever is written is wiped by the caller on every exit path.
pub trait Codec {
    type Error;

    fn encode_into<T>(value: &T, buf: &mut Vec<u8>) -> Result<(), Self::Error>
    where
        T: Serialize + ?Sized;

    fn decode<T>(bytes: &[u8]) -> Result<T, Self::Error>
    where
        T: DeserializeOwned;
}

/// The default codec, backed by `bincode`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Bincode;

impl Codec for Bincode {
    type Error = bincode::Error;

    fn encode_into<T>(value: &T, buf: &mut Vec<u8>) -> Result<(), Self::Error>
    where
        T: Serialize + ?Sized,
    {
        let len = bincode::serialized_size(value)?;
        let len = usize::try_from(len).map_err(|_| bincode::ErrorKind::SizeLimit)?;

        buf.reserve_exact(len);
        bincode::serialize_into(&mut *buf, value)
    }

    fn decode<T>(bytes: &[u8]) -> Result<T, Self::Error>
    where
        T: DeserializeOwned,
    {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bincode_reserves_exact_capacity() {
        let value = String::from("correct horse battery staple");
        let mut buf = Vec::new();

        Bincode::encode_into(&value, &mut buf).expect("Failed to encode");

        assert_eq!(buf.len(), buf.capacity());
        assert_eq!(Bincode::decode::<String>(&buf).expect("Failed to decode"), value);
    }

    #[test]
    fn test_bincode_rejects_truncated_input() {
        let mut buf = Vec::new();
        Bincode::encode_into(&u64::MAX, &mut buf).expect("Failed to encode");

        assert!(Bincode::decode::<u64>(&buf[..4]).is_err());
    }
}
