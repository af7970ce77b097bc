//! MsgPack codec using `rmp-serde`.
//!
//! Structs are written with field names (`to_vec_named`), so peers can add
//! optional fields without breaking older decoders.

use std::io::Write;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// MessagePack codec for structured content.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Encode a value straight into `writer`.
    #[inline]
    pub fn encode_into<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
        Ok(rmp_serde::encode::write_named(writer, value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Subscribe {
        topic: String,
        durable: bool,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = Subscribe {
            topic: "prices".to_string(),
            durable: true,
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: Subscribe = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_structs_are_named_maps() {
        let encoded = MsgPackCodec::encode(&Subscribe {
            topic: "x".to_string(),
            durable: false,
        })
        .unwrap();

        // fixmap with 2 entries, not fixarray
        assert_eq!(encoded[0], 0x82);
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = vec![0xFF];
        MsgPackCodec::encode_into(&mut buf, &7u8).unwrap();
        assert_eq!(buf, vec![0xFF, 0x07]);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Subscribe> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(matches!(result, Err(Error::Codec(_))));
    }
}
