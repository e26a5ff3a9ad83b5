//! Interpreter value serialization.
//!
//! Script values persist to on-disk bytes in a tagged format that is
//! bytewise identical across both interpreter flavors:
//!
//! ```text
//! tag(u8) || payload
//! ```
//!
//! Tags: `0` string, `1` bool, `2` number (f64 little-endian), `3`
//! object/table, `4` null. Strings and tables carry a varint length/count
//! prefix. Deserialization is the exact inverse.

use crate::{VmError, VmResult};
use lattice_types::codec::{self, Reader};

const TAG_STRING: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_OBJECT: u8 = 3;
const TAG_NULL: u8 = 4;

/// A value crossing the interpreter boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    /// A string.
    String(String),
    /// A boolean.
    Bool(bool),
    /// A double-precision number.
    Number(f64),
    /// An object/table of key-value pairs, in insertion order.
    Object(Vec<(ScriptValue, ScriptValue)>),
    /// Null / nil / undefined.
    Null,
}

impl ScriptValue {
    /// Serializes the value into the tagged format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write(&mut buf);
        buf
    }

    fn write(&self, buf: &mut Vec<u8>) {
        match self {
            ScriptValue::String(s) => {
                buf.push(TAG_STRING);
                codec::write_bytes(buf, s.as_bytes());
            }
            ScriptValue::Bool(b) => {
                buf.push(TAG_BOOL);
                buf.push(u8::from(*b));
            }
            ScriptValue::Number(n) => {
                buf.push(TAG_NUMBER);
                codec::write_f64(buf, *n);
            }
            ScriptValue::Object(entries) => {
                buf.push(TAG_OBJECT);
                codec::write_varint(buf, entries.len() as u64);
                for (key, value) in entries {
                    key.write(buf);
                    value.write(buf);
                }
            }
            ScriptValue::Null => buf.push(TAG_NULL),
        }
    }

    /// Deserializes a value from the tagged format.
    pub fn from_bytes(data: &[u8]) -> VmResult<Self> {
        let mut reader = Reader::new(data);
        let value = Self::read(&mut reader)?;
        if !reader.is_empty() {
            return Err(VmError::Execution(format!(
                "{} trailing bytes after value",
                reader.remaining()
            )));
        }
        Ok(value)
    }

    fn read(reader: &mut Reader<'_>) -> VmResult<Self> {
        let tag = reader
            .read_u8()
            .map_err(|e| VmError::Execution(e.to_string()))?;
        match tag {
            TAG_STRING => {
                let bytes = reader
                    .read_bytes()
                    .map_err(|e| VmError::Execution(e.to_string()))?;
                let s = String::from_utf8(bytes.to_vec())
                    .map_err(|e| VmError::Execution(e.to_string()))?;
                Ok(ScriptValue::String(s))
            }
            TAG_BOOL => {
                let b = reader
                    .read_u8()
                    .map_err(|e| VmError::Execution(e.to_string()))?;
                Ok(ScriptValue::Bool(b == 1))
            }
            TAG_NUMBER => {
                let n = reader
                    .read_f64()
                    .map_err(|e| VmError::Execution(e.to_string()))?;
                Ok(ScriptValue::Number(n))
            }
            TAG_OBJECT => {
                let count = reader
                    .read_varint()
                    .map_err(|e| VmError::Execution(e.to_string()))?;
                let mut entries = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    let key = Self::read(reader)?;
                    let value = Self::read(reader)?;
                    entries.push((key, value));
                }
                Ok(ScriptValue::Object(entries))
            }
            TAG_NULL => Ok(ScriptValue::Null),
            other => Err(VmError::Execution(format!("unknown value tag {other}"))),
        }
    }

    /// Renders the value as a string for query results.
    pub fn as_display_string(&self) -> String {
        match self {
            ScriptValue::String(s) => s.clone(),
            ScriptValue::Bool(b) => b.to_string(),
            ScriptValue::Number(n) => n.to_string(),
            ScriptValue::Null => String::new(),
            ScriptValue::Object(_) => format!("{self:?}"),
        }
    }

    /// True when the value is a truthy execution result.
    pub fn is_truthy(&self) -> bool {
        match self {
            ScriptValue::Bool(b) => *b,
            ScriptValue::Null => false,
            ScriptValue::Number(n) => *n != 0.0,
            ScriptValue::String(s) => !s.is_empty(),
            ScriptValue::Object(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trips() {
        for value in [
            ScriptValue::String("lattice".into()),
            ScriptValue::String(String::new()),
            ScriptValue::Bool(true),
            ScriptValue::Bool(false),
            ScriptValue::Number(0.0),
            ScriptValue::Number(-1.5),
            ScriptValue::Number(f64::MAX),
            ScriptValue::Null,
        ] {
            let decoded = ScriptValue::from_bytes(&value.to_bytes()).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn nested_object_round_trips() {
        let value = ScriptValue::Object(vec![
            (
                ScriptValue::String("amounts".into()),
                ScriptValue::Object(vec![(
                    ScriptValue::Number(1.0),
                    ScriptValue::String("100".into()),
                )]),
            ),
            (ScriptValue::String("nonce".into()), ScriptValue::Number(7.0)),
            (ScriptValue::String("flag".into()), ScriptValue::Bool(true)),
            (ScriptValue::String("nothing".into()), ScriptValue::Null),
        ]);
        let decoded = ScriptValue::from_bytes(&value.to_bytes()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn number_payload_is_f64_le() {
        let bytes = ScriptValue::Number(1.0).to_bytes();
        assert_eq!(bytes[0], 2);
        assert_eq!(&bytes[1..], &1.0f64.to_le_bytes());
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = ScriptValue::Bool(true).to_bytes();
        bytes.push(0);
        assert!(ScriptValue::from_bytes(&bytes).is_err());
    }
}
