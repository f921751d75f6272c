//! Value codec seam: structured-value serialization lives entirely
//! outside the page format, so the facade only needs a reversible
//! byte encoder/decoder. `RawCodec` is the identity codec used when
//! `raw_values` is set; `TaggedValue` gives embedders a small
//! self-describing primitive format without writing their own.

/// A reversible byte encoder/decoder the embedder supplies for
/// structured values. `encode`/`decode` must round
/// trip: `decode(encode(v)) == v` for every `v` the embedder stores.
pub trait ValueCodec: Send {
    fn encode(&self, value: &[u8]) -> Vec<u8>;
    fn decode(&self, bytes: &[u8]) -> Vec<u8>;
}

/// Identity codec: used when `raw_values` is true.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

impl ValueCodec for RawCodec {
    fn encode(&self, value: &[u8]) -> Vec<u8> {
        value.to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }
}

const TAG_UNIT: u8 = 0;
const TAG_BOOL_FALSE: u8 = 1;
const TAG_BOOL_TRUE: u8 = 2;
const TAG_U64: u8 = 3;
const TAG_I64: u8 = 4;
const TAG_F64: u8 = 5;
const TAG_BYTES: u8 = 6;
const TAG_STR: u8 = 7;

/// One value an embedder can round-trip through the tagged format.
#[derive(Debug, Clone, PartialEq)]
pub enum TaggedValue {
    Unit,
    Bool(bool),
    U64(u64),
    I64(i64),
    F64(f64),
    Bytes(Vec<u8>),
    Str(String),
}

impl TaggedValue {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            TaggedValue::Unit => vec![TAG_UNIT],
            TaggedValue::Bool(false) => vec![TAG_BOOL_FALSE],
            TaggedValue::Bool(true) => vec![TAG_BOOL_TRUE],
            TaggedValue::U64(v) => {
                let mut buf = vec![TAG_U64];
                buf.extend_from_slice(&v.to_le_bytes());
                buf
            }
            TaggedValue::I64(v) => {
                let mut buf = vec![TAG_I64];
                buf.extend_from_slice(&v.to_le_bytes());
                buf
            }
            TaggedValue::F64(v) => {
                let mut buf = vec![TAG_F64];
                buf.extend_from_slice(&v.to_le_bytes());
                buf
            }
            TaggedValue::Bytes(b) => {
                let mut buf = Vec::with_capacity(1 + 4 + b.len());
                buf.push(TAG_BYTES);
                buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
                buf.extend_from_slice(b);
                buf
            }
            TaggedValue::Str(s) => {
                let bytes = s.as_bytes();
                let mut buf = Vec::with_capacity(1 + 4 + bytes.len());
                buf.push(TAG_STR);
                buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                buf.extend_from_slice(bytes);
                buf
            }
        }
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let tag = *data.first()?;
        match tag {
            TAG_UNIT => Some(TaggedValue::Unit),
            TAG_BOOL_FALSE => Some(TaggedValue::Bool(false)),
            TAG_BOOL_TRUE => Some(TaggedValue::Bool(true)),
            TAG_U64 => Some(TaggedValue::U64(u64::from_le_bytes(
                data.get(1..9)?.try_into().ok()?,
            ))),
            TAG_I64 => Some(TaggedValue::I64(i64::from_le_bytes(
                data.get(1..9)?.try_into().ok()?,
            ))),
            TAG_F64 => Some(TaggedValue::F64(f64::from_le_bytes(
                data.get(1..9)?.try_into().ok()?,
            ))),
            TAG_BYTES => {
                let len = u32::from_le_bytes(data.get(1..5)?.try_into().ok()?) as usize;
                Some(TaggedValue::Bytes(data.get(5..5 + len)?.to_vec()))
            }
            TAG_STR => {
                let len = u32::from_le_bytes(data.get(1..5)?.try_into().ok()?) as usize;
                let s = std::str::from_utf8(data.get(5..5 + len)?).ok()?;
                Some(TaggedValue::Str(s.to_string()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_codec_round_trips() {
        let codec = RawCodec;
        let v = b"hello world".to_vec();
        assert_eq!(codec.decode(&codec.encode(&v)), v);
    }

    #[test]
    fn tagged_value_round_trips() {
        for v in [
            TaggedValue::Unit,
            TaggedValue::Bool(true),
            TaggedValue::Bool(false),
            TaggedValue::U64(42),
            TaggedValue::I64(-7),
            TaggedValue::F64(3.25),
            TaggedValue::Bytes(vec![1, 2, 3]),
            TaggedValue::Str("hi".into()),
        ] {
            let encoded = v.encode();
            assert_eq!(TaggedValue::decode(&encoded).unwrap(), v);
        }
    }
}
