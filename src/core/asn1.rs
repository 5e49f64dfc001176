//! Typed decoding of primitive universal ASN.1 values.

use crate::core::error::{CodecError, CodecResult};
use crate::core::tlv::{Tag, TagClass, TlvNode, DEFAULT_MAX_DEPTH};
use serde::{Deserialize, Serialize};

pub const BOOLEAN: u64 = 1;
pub const INTEGER: u64 = 2;
pub const OCTET_STRING: u64 = 4;
pub const NULL: u64 = 5;
pub const IA5_STRING: u64 = 22;

/// Value decoded from a primitive node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataObject {
    Boolean(bool),
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    IA5String(String),
    /// No decoder is registered for the tag
    Unknown { tag: Tag, content: Vec<u8> },
}

impl DataObject {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DataObject::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataObject::IA5String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataObject::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataObject::Boolean(b) => write!(f, "BOOLEAN {b}"),
            DataObject::Integer(v) => write!(f, "INTEGER {v}"),
            DataObject::OctetString(bytes) => write!(f, "OCTET STRING {}", hex::encode_upper(bytes)),
            DataObject::Null => f.write_str("NULL"),
            DataObject::IA5String(s) => write!(f, "IA5String {s:?}"),
            DataObject::Unknown { tag, content } => {
                write!(f, "{tag} {}", hex::encode_upper(content))
            }
        }
    }
}

/// How BOOLEAN content is judged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BooleanRule {
    /// Any non-zero octet is true
    #[default]
    Ber,
    /// Only 0x00 and 0xFF are accepted
    Der,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    pub boolean: BooleanRule,
    pub max_depth: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            boolean: BooleanRule::Ber,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

type Decoder = fn(&[u8], &DecodeOptions) -> CodecResult<DataObject>;

/// Universal tag number to decoder
const DECODERS: &[(u64, Decoder)] = &[
    (BOOLEAN, boolean_object),
    (INTEGER, integer_object),
    (OCTET_STRING, octet_string_object),
    (NULL, null_object),
    (IA5_STRING, ia5_string_object),
];

fn boolean_object(content: &[u8], options: &DecodeOptions) -> CodecResult<DataObject> {
    decode_boolean(content, options.boolean).map(DataObject::Boolean)
}

fn integer_object(content: &[u8], _: &DecodeOptions) -> CodecResult<DataObject> {
    decode_integer(content).map(DataObject::Integer)
}

fn octet_string_object(content: &[u8], _: &DecodeOptions) -> CodecResult<DataObject> {
    Ok(DataObject::OctetString(content.to_vec()))
}

fn null_object(content: &[u8], _: &DecodeOptions) -> CodecResult<DataObject> {
    decode_null(content).map(|()| DataObject::Null)
}

fn ia5_string_object(content: &[u8], _: &DecodeOptions) -> CodecResult<DataObject> {
    decode_ia5_string(content).map(DataObject::IA5String)
}

fn lookup(number: u64) -> Option<Decoder> {
    DECODERS
        .iter()
        .find(|(n, _)| *n == number)
        .map(|(_, decoder)| *decoder)
}

/// Decode a primitive node with default options
pub fn to_data_object(node: &TlvNode<'_>) -> CodecResult<DataObject> {
    to_data_object_with(node, &DecodeOptions::default())
}

pub fn to_data_object_with(node: &TlvNode<'_>, options: &DecodeOptions) -> CodecResult<DataObject> {
    if node.is_constructed() {
        return Err(CodecError::WrongStructure("constructed"));
    }

    let decoder = match node.class() {
        TagClass::Universal => lookup(node.number()),
        _ => None,
    };

    match decoder {
        Some(decode) => decode(node.content(), options),
        None => Ok(DataObject::Unknown {
            tag: node.tag(),
            content: node.content().to_vec(),
        }),
    }
}

/// Big-endian two's-complement integer of at most 8 octets.
/// Empty content decodes as 0.
pub fn decode_integer(content: &[u8]) -> CodecResult<i64> {
    if content.len() > 8 {
        return Err(CodecError::IntegerOverflow { len: content.len() });
    }

    let negative = content.first().is_some_and(|b| b & 0x80 != 0);
    let mut value: i64 = if negative { -1 } else { 0 };
    for &b in content {
        value = (value << 8) | i64::from(b);
    }
    Ok(value)
}

/// Strict 7-bit IA5 text
pub fn decode_ia5_string(content: &[u8]) -> CodecResult<String> {
    if let Some((index, &byte)) = content.iter().enumerate().find(|(_, b)| !b.is_ascii()) {
        return Err(CodecError::InvalidIA5Character { byte, index });
    }
    Ok(content.iter().map(|&b| char::from(b)).collect())
}

pub fn decode_boolean(content: &[u8], rule: BooleanRule) -> CodecResult<bool> {
    match (content, rule) {
        ([0x00], _) => Ok(false),
        ([0xFF], _) | ([_], BooleanRule::Ber) => Ok(true),
        ([b], BooleanRule::Der) => Err(CodecError::InvalidBoolean(format!(
            "DER requires 0x00 or 0xFF, got 0x{b:02X}"
        ))),
        _ => Err(CodecError::InvalidBoolean(format!(
            "expected 1 content byte, got {}",
            content.len()
        ))),
    }
}

pub fn decode_null(content: &[u8]) -> CodecResult<()> {
    if content.is_empty() {
        Ok(())
    } else {
        Err(CodecError::InvalidNull { len: content.len() })
    }
}
