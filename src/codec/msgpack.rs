//! MsgPack codec using `rmp-serde`.
//!
//! Structs are always written with `to_vec_named` (struct-as-map), so a
//! peer can add or reorder fields without breaking positional decoding.

use crate::error::Result;

/// MessagePack codec for call arguments and replies.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Greeting {
        from: String,
        text: String,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = Greeting {
            from: "alice".to_string(),
            text: "hi".to_string(),
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: Greeting = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_tuple_arguments() {
        let encoded = MsgPackCodec::encode(&(20i32, 22i32)).unwrap();
        let (a, b): (i32, i32) = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(a + b, 42);
    }

    #[test]
    fn test_structs_use_map_format() {
        let encoded = MsgPackCodec::encode(&Greeting {
            from: "x".to_string(),
            text: "y".to_string(),
        })
        .unwrap();

        // 0x82 = fixmap with 2 entries; the array form would be 0x92
        assert_eq!(encoded[0], 0x82);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Greeting> = MsgPackCodec::decode(b"\xc1garbage");
        assert!(result.is_err());
    }

    #[test]
    fn test_binary_payload_uses_bin_format() {
        let data: Vec<u8> = vec![0x01, 0x02, 0x03];
        let encoded = MsgPackCodec::encode(&serde_bytes::Bytes::new(&data)).unwrap();

        assert_eq!(encoded[0], 0xc4, "Expected bin8 format");

        let decoded: serde_bytes::ByteBuf = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.as_ref(), &data);
    }
}
