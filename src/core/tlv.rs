//! BER-TLV (ISO/IEC 8825-1) structure parsing and definite-length encoding.
//!
//! Nodes borrow the buffer they were parsed from and only record offsets
//! into it. Constructed content is decoded on demand through
//! [`TlvNode::children`].

use crate::core::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};

/// Default bound for [`TlvNode::walk`]
pub const DEFAULT_MAX_DEPTH: usize = 32;

const TAG_NUMBER_MASK: u8 = 0x1F;
const CONSTRUCTED_BIT: u8 = 0x20;
const CONTINUATION_BIT: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagClass {
    Universal,
    Application,
    ContextSpecific,
    Private,
}

impl TagClass {
    fn from_bits(first: u8) -> Self {
        match first >> 6 {
            0 => TagClass::Universal,
            1 => TagClass::Application,
            2 => TagClass::ContextSpecific,
            _ => TagClass::Private,
        }
    }

    fn bits(self) -> u8 {
        match self {
            TagClass::Universal => 0x00,
            TagClass::Application => 0x40,
            TagClass::ContextSpecific => 0x80,
            TagClass::Private => 0xC0,
        }
    }
}

impl std::fmt::Display for TagClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TagClass::Universal => "UNIVERSAL",
            TagClass::Application => "APPLICATION",
            TagClass::ContextSpecific => "CONTEXT",
            TagClass::Private => "PRIVATE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Structure {
    Primitive,
    Constructed,
}

impl std::fmt::Display for Structure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Structure::Primitive => f.write_str("primitive"),
            Structure::Constructed => f.write_str("constructed"),
        }
    }
}

/// Identifier octets of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub class: TagClass,
    pub structure: Structure,
    pub number: u64,
}

impl Tag {
    pub const fn new(class: TagClass, structure: Structure, number: u64) -> Self {
        Self {
            class,
            structure,
            number,
        }
    }

    pub const fn universal(number: u64) -> Self {
        Self::new(TagClass::Universal, Structure::Primitive, number)
    }

    pub fn is_constructed(&self) -> bool {
        self.structure == Structure::Constructed
    }

    /// Identifier octets, high tag numbers in base-128
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut first = self.class.bits();
        if self.is_constructed() {
            first |= CONSTRUCTED_BIT;
        }

        if self.number < u64::from(TAG_NUMBER_MASK) {
            return vec![first | self.number as u8];
        }

        let mut out = vec![first | TAG_NUMBER_MASK];
        let groups = (64 - self.number.leading_zeros() as usize).div_ceil(7);
        for i in (0..groups).rev() {
            let mut octet = ((self.number >> (7 * i)) & 0x7F) as u8;
            if i != 0 {
                octet |= CONTINUATION_BIT;
            }
            out.push(octet);
        }
        out
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} {}] {}", self.class, self.number, self.structure)
    }
}

fn byte_at(buf: &[u8], offset: usize) -> CodecResult<u8> {
    buf.get(offset).copied().ok_or(CodecError::BufferUnderrun {
        offset,
        needed: 1,
        available: 0,
    })
}

/// A parsed tag-length-value node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvNode<'a> {
    buf: &'a [u8],
    tag: Tag,
    start: usize,
    content_start: usize,
    end: usize,
}

/// Parse one node starting at `offset`
pub fn parse(buf: &[u8], offset: usize) -> CodecResult<TlvNode<'_>> {
    let first = byte_at(buf, offset)?;
    let mut pos = offset + 1;

    let mut number = u64::from(first & TAG_NUMBER_MASK);
    if number == u64::from(TAG_NUMBER_MASK) {
        number = 0;
        loop {
            let octet = byte_at(buf, pos)?;
            if number > (u64::MAX >> 7) {
                return Err(CodecError::TagOverflow { offset });
            }
            number = (number << 7) | u64::from(octet & 0x7F);
            pos += 1;
            if octet & CONTINUATION_BIT == 0 {
                break;
            }
        }
    }

    let structure = if first & CONSTRUCTED_BIT != 0 {
        Structure::Constructed
    } else {
        Structure::Primitive
    };
    let tag = Tag::new(TagClass::from_bits(first), structure, number);

    let length_octet = byte_at(buf, pos)?;
    pos += 1;
    let length = if length_octet & 0x80 == 0 {
        usize::from(length_octet)
    } else {
        let count = usize::from(length_octet & 0x7F);
        if count == 0 {
            return Err(CodecError::IndefiniteLengthUnsupported { offset: pos - 1 });
        }
        let available = buf.len().saturating_sub(pos);
        if count > available {
            return Err(CodecError::BufferUnderrun {
                offset: pos,
                needed: count,
                available,
            });
        }
        let mut length: usize = 0;
        for &octet in &buf[pos..pos + count] {
            length = length
                .checked_mul(256)
                .map(|l| l | usize::from(octet))
                .ok_or(CodecError::BufferUnderrun {
                    offset: pos,
                    needed: usize::MAX,
                    available: buf.len() - pos,
                })?;
        }
        pos += count;
        length
    };

    let available = buf.len() - pos;
    if length > available {
        return Err(CodecError::BufferUnderrun {
            offset: pos,
            needed: length,
            available,
        });
    }

    Ok(TlvNode {
        buf,
        tag,
        start: offset,
        content_start: pos,
        end: pos + length,
    })
}

/// Parse consecutive sibling nodes that cover `buf` exactly
pub fn parse_all(buf: &[u8]) -> CodecResult<Vec<TlvNode<'_>>> {
    let mut nodes = Vec::new();
    let mut cursor = 0;

    while cursor < buf.len() {
        let remaining = buf.len() - cursor;
        if remaining < 2 {
            return Err(CodecError::TrailingBytes {
                offset: cursor,
                count: remaining,
            });
        }
        let node = parse(buf, cursor)?;
        cursor = node.end;
        nodes.push(node);
    }

    Ok(nodes)
}

impl<'a> TlvNode<'a> {
    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn class(&self) -> TagClass {
        self.tag.class
    }

    pub fn structure(&self) -> Structure {
        self.tag.structure
    }

    pub fn number(&self) -> u64 {
        self.tag.number
    }

    pub fn is_constructed(&self) -> bool {
        self.tag.is_constructed()
    }

    /// Offset of the first identifier octet
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn content_start(&self) -> usize {
        self.content_start
    }

    /// Offset one past the last content byte
    pub fn end(&self) -> usize {
        self.end
    }

    /// Content length
    pub fn len(&self) -> usize {
        self.end - self.content_start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.content_start
    }

    pub fn content(&self) -> &'a [u8] {
        &self.buf[self.content_start..self.end]
    }

    /// Whole encoding including identifier and length octets
    pub fn raw(&self) -> &'a [u8] {
        &self.buf[self.start..self.end]
    }

    /// Iterate the nodes nested in a constructed node's content
    pub fn children(&self) -> CodecResult<Children<'a>> {
        if !self.is_constructed() {
            return Err(CodecError::WrongStructure("primitive"));
        }
        Ok(Children {
            buf: self.buf,
            cursor: self.content_start,
            end: self.end,
            done: false,
        })
    }

    pub fn child_nodes(&self) -> CodecResult<Vec<TlvNode<'a>>> {
        self.children()?.collect()
    }

    /// All nodes of this subtree in depth-first order, with their depth
    /// relative to this node. Fails on any node deeper than `max_depth`.
    pub fn walk(&self, max_depth: usize) -> CodecResult<Vec<(usize, TlvNode<'a>)>> {
        let mut out = vec![(0, *self)];
        let mut stack: Vec<Children<'a>> = Vec::new();
        if self.is_constructed() {
            stack.push(self.children()?);
        }

        while let Some(top) = stack.last_mut() {
            let Some(next) = top.next() else {
                stack.pop();
                continue;
            };
            let child = next?;
            let depth = stack.len();
            if depth > max_depth {
                return Err(CodecError::NestingTooDeep { max_depth });
            }
            out.push((depth, child));

            if child.is_constructed() {
                stack.push(child.children()?);
            }
        }

        Ok(out)
    }
}

/// Cursor over the children of a constructed node
#[derive(Debug, Clone)]
pub struct Children<'a> {
    buf: &'a [u8],
    cursor: usize,
    end: usize,
    done: bool,
}

impl<'a> Iterator for Children<'a> {
    type Item = CodecResult<TlvNode<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.cursor == self.end {
            return None;
        }

        let remaining = self.end - self.cursor;
        let result = if remaining < 2 {
            Err(CodecError::TrailingBytes {
                offset: self.cursor,
                count: remaining,
            })
        } else {
            match parse(self.buf, self.cursor) {
                Ok(child) if child.end > self.end => Err(CodecError::BoundaryOverrun {
                    offset: self.cursor,
                    end: child.end,
                    parent_end: self.end,
                }),
                Ok(child) => {
                    self.cursor = child.end;
                    Ok(child)
                }
                Err(CodecError::BufferUnderrun { offset, needed, .. }) => {
                    Err(CodecError::BoundaryOverrun {
                        offset: self.cursor,
                        end: offset.saturating_add(needed),
                        parent_end: self.end,
                    })
                }
                Err(e) => Err(e),
            }
        };

        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

/// Length octets in definite form, short when possible
pub fn encode_length(length: usize) -> Vec<u8> {
    if length < 0x80 {
        return vec![length as u8];
    }
    let bytes = length.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    let mut out = Vec::with_capacity(1 + bytes.len() - skip);
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
    out
}

/// Encode a complete node
pub fn encode_tlv(tag: Tag, value: &[u8]) -> Vec<u8> {
    let mut out = tag.to_bytes();
    out.extend(encode_length(value.len()));
    out.extend_from_slice(value);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMAIL: &[u8] = &[
        0x16, 0x0D, 0x74, 0x65, 0x73, 0x74, 0x31, 0x40, 0x72, 0x73, 0x61, 0x2E, 0x63, 0x6F, 0x6D,
    ];

    fn email_set() -> Vec<u8> {
        let mut buf = vec![0x36, 0x13];
        buf.extend_from_slice(&[0x16, 0x05]);
        buf.extend_from_slice(b"test1");
        buf.extend_from_slice(&[0x16, 0x01]);
        buf.extend_from_slice(b"@");
        buf.extend_from_slice(&[0x16, 0x07]);
        buf.extend_from_slice(b"rsa.com");
        buf
    }

    #[test]
    fn test_parse_primitive() {
        let node = parse(EMAIL, 0).unwrap();
        assert_eq!(node.number(), 22);
        assert_eq!(node.class(), TagClass::Universal);
        assert_eq!(node.structure(), Structure::Primitive);
        assert_eq!(node.len(), 13);
        assert_eq!(node.start(), 0);
        assert_eq!(node.content_start(), 2);
        assert_eq!(node.end(), 15);
        assert_eq!(node.content(), b"test1@rsa.com");
        assert_eq!(node.raw(), EMAIL);
    }

    #[test]
    fn test_parse_constructed_children() {
        let buf = email_set();
        let node = parse(&buf, 0).unwrap();
        assert!(node.is_constructed());
        assert_eq!(node.number(), 22);

        let children = node.child_nodes().unwrap();
        assert_eq!(children.len(), 3);
        assert!(children.iter().all(|c| c.number() == 22 && !c.is_constructed()));

        let text: Vec<u8> = children.iter().flat_map(|c| c.content().to_vec()).collect();
        assert_eq!(text, b"test1@rsa.com");
    }

    #[test]
    fn test_parse_at_offset() {
        let mut buf = vec![0xFF, 0xFF];
        buf.extend_from_slice(EMAIL);
        let node = parse(&buf, 2).unwrap();
        assert_eq!(node.start(), 2);
        assert_eq!(node.content(), b"test1@rsa.com");
    }

    #[test]
    fn test_parse_class_bits() {
        assert_eq!(parse(&[0x41, 0x00], 0).unwrap().class(), TagClass::Application);
        assert_eq!(
            parse(&[0x80, 0x00], 0).unwrap().class(),
            TagClass::ContextSpecific
        );
        let private = parse(&[0xE3, 0x00], 0).unwrap();
        assert_eq!(private.class(), TagClass::Private);
        assert!(private.is_constructed());
        assert_eq!(private.number(), 3);
        assert!(private.is_empty());
    }

    #[test]
    fn test_parse_high_tag_number() {
        // 5F C1 02: application, primitive, tag number 0x41 << 7 | 0x02
        let node = parse(&[0x5F, 0xC1, 0x02, 0x01, 0xAA], 0).unwrap();
        assert_eq!(node.class(), TagClass::Application);
        assert_eq!(node.number(), (0x41 << 7) | 0x02);
        assert_eq!(node.content(), &[0xAA]);

        let node = parse(&[0x1F, 0x1F, 0x00], 0).unwrap();
        assert_eq!(node.number(), 31);
    }

    #[test]
    fn test_parse_long_length() {
        let mut buf = vec![0x04, 0x81, 0x80];
        buf.extend(std::iter::repeat(0x55).take(0x80));
        let node = parse(&buf, 0).unwrap();
        assert_eq!(node.len(), 0x80);
        assert_eq!(node.content_start(), 3);

        let mut buf = vec![0x04, 0x82, 0x01, 0x00];
        buf.extend(std::iter::repeat(0x55).take(0x100));
        assert_eq!(parse(&buf, 0).unwrap().len(), 0x100);
    }

    #[test]
    fn test_indefinite_length_rejected() {
        let err = parse(&[0x30, 0x80, 0x02, 0x01, 0x05, 0x00, 0x00], 0).unwrap_err();
        assert_eq!(err, CodecError::IndefiniteLengthUnsupported { offset: 1 });
    }

    #[test]
    fn test_buffer_underrun() {
        assert!(matches!(
            parse(&[0x16, 0x05, 0x41], 0),
            Err(CodecError::BufferUnderrun {
                needed: 5,
                available: 1,
                ..
            })
        ));
        assert!(matches!(parse(&[0x16], 0), Err(CodecError::BufferUnderrun { .. })));
        assert!(matches!(parse(&[], 0), Err(CodecError::BufferUnderrun { .. })));
        assert!(matches!(
            parse(&[0x04, 0x82, 0x01], 0),
            Err(CodecError::BufferUnderrun { .. })
        ));
        assert!(matches!(
            parse(&[0x1F, 0x81], 0),
            Err(CodecError::BufferUnderrun { .. })
        ));
    }

    #[test]
    fn test_tag_overflow() {
        let mut buf = vec![0x1F];
        buf.extend(std::iter::repeat(0xFF).take(10));
        buf.extend_from_slice(&[0x7F, 0x00]);
        assert_eq!(parse(&buf, 0).unwrap_err(), CodecError::TagOverflow { offset: 0 });
    }

    #[test]
    fn test_child_crossing_parent_boundary() {
        // parent content is 3 bytes, child declares 2 content bytes
        let buf = [0x30, 0x03, 0x04, 0x02, 0xAA, 0xBB];
        let node = parse(&buf, 0).unwrap();
        let err = node.child_nodes().unwrap_err();
        assert_eq!(
            err,
            CodecError::BoundaryOverrun {
                offset: 2,
                end: 6,
                parent_end: 5
            }
        );
    }

    #[test]
    fn test_child_crossing_buffer_end() {
        let buf = [0x30, 0x02, 0x04, 0x05];
        let node = parse(&buf, 0).unwrap();
        assert!(matches!(
            node.child_nodes(),
            Err(CodecError::BoundaryOverrun { parent_end: 4, .. })
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let buf = [0x30, 0x03, 0x05, 0x00, 0xAA];
        let node = parse(&buf, 0).unwrap();
        let mut children = node.children().unwrap();
        assert_eq!(children.next().unwrap().unwrap().number(), 5);
        assert_eq!(
            children.next().unwrap().unwrap_err(),
            CodecError::TrailingBytes {
                offset: 4,
                count: 1
            }
        );
        assert!(children.next().is_none());
    }

    #[test]
    fn test_children_of_primitive() {
        let node = parse(EMAIL, 0).unwrap();
        assert!(matches!(
            node.children(),
            Err(CodecError::WrongStructure("primitive"))
        ));
    }

    #[test]
    fn test_parse_all() {
        let mut buf = EMAIL.to_vec();
        buf.extend_from_slice(&[0x05, 0x00]);
        let nodes = parse_all(&buf).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].number(), 5);

        buf.push(0x00);
        assert!(matches!(
            parse_all(&buf),
            Err(CodecError::TrailingBytes { count: 1, .. })
        ));
        assert!(parse_all(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_walk_depth_first() {
        // SEQUENCE { SET { IA5 "a" }, BOOLEAN }
        let buf = [0x30, 0x08, 0x31, 0x03, 0x16, 0x01, 0x61, 0x01, 0x01, 0xFF];
        let node = parse(&buf, 0).unwrap();
        let walked = node.walk(DEFAULT_MAX_DEPTH).unwrap();
        let shape: Vec<(usize, u64)> = walked.iter().map(|(d, n)| (*d, n.number())).collect();
        assert_eq!(shape, vec![(0, 16), (1, 17), (2, 22), (1, 1)]);
    }

    #[test]
    fn test_walk_depth_limit() {
        // five nested SEQUENCEs, innermost empty
        let buf = [0x30, 0x08, 0x30, 0x06, 0x30, 0x04, 0x30, 0x02, 0x30, 0x00];
        let node = parse(&buf, 0).unwrap();
        assert_eq!(node.walk(4).unwrap().len(), 5);
        assert_eq!(
            node.walk(3).unwrap_err(),
            CodecError::NestingTooDeep { max_depth: 3 }
        );
    }

    #[test]
    fn test_tag_to_bytes() {
        assert_eq!(Tag::universal(22).to_bytes(), vec![0x16]);
        assert_eq!(
            Tag::new(TagClass::Universal, Structure::Constructed, 17).to_bytes(),
            vec![0x31]
        );
        assert_eq!(
            Tag::new(TagClass::Application, Structure::Primitive, (0x41 << 7) | 0x02).to_bytes(),
            vec![0x5F, 0xC1, 0x02]
        );
        assert_eq!(
            Tag::new(TagClass::ContextSpecific, Structure::Primitive, 31).to_bytes(),
            vec![0x9F, 0x1F]
        );
    }

    #[test]
    fn test_encode_length_forms() {
        assert_eq!(encode_length(0), vec![0x00]);
        assert_eq!(encode_length(0x7F), vec![0x7F]);
        assert_eq!(encode_length(0x80), vec![0x81, 0x80]);
        assert_eq!(encode_length(0x0100), vec![0x82, 0x01, 0x00]);
    }

    #[test]
    fn test_encode_tlv_parses_back() {
        let tag_list = Tag::new(TagClass::Application, Structure::Primitive, (0x41 << 7) | 0x02);
        let encoded = encode_tlv(Tag::universal(0x1C), &tag_list.to_bytes());
        assert_eq!(encoded, vec![0x1C, 0x03, 0x5F, 0xC1, 0x02]);

        let value = vec![0x42; 300];
        let encoded = encode_tlv(Tag::universal(4), &value);
        let node = parse(&encoded, 0).unwrap();
        assert_eq!(node.content(), value.as_slice());
    }
}
