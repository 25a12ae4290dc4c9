//! Streaming BER decoding.
//!
//! All parsers use nom's streaming combinators: running out of input
//! yields `Err::Incomplete`, which callers treat as "feed more bytes".
//! Structural problems are `Err::Failure` and are not recoverable.

use nom::bytes::streaming::take;
use nom::error::{Error, ErrorKind};
use nom::number::streaming::be_u8;
use nom::{Err, IResult};

use crate::common::{TagClass, TagStructure};
use crate::structure::{PL, StructureTag};

/// Decode an identifier octet into (class, form, tag number).
///
/// LDAP tags all fit the low-tag-number form; a first octet announcing
/// the high form (number bits all set) is rejected.
pub fn parse_type_header(i: &[u8]) -> IResult<&[u8], (TagClass, TagStructure, u64)> {
    let (i, octet) = be_u8(i)?;
    let id = (octet & 0x1F) as u64;
    if id == 0x1F {
        return Err(Err::Failure(Error::new(i, ErrorKind::TagBits)));
    }
    Ok((
        i,
        (
            TagClass::from_bits(octet >> 6),
            TagStructure::from_bits(octet >> 5),
            id,
        ),
    ))
}

/// Decode a definite length, short or long form.
///
/// The indefinite form (0x80) is forbidden by LDAP, and a length field
/// wider than eight octets cannot be represented; both are failures.
pub fn parse_length(i: &[u8]) -> IResult<&[u8], u64> {
    let (i, first) = be_u8(i)?;
    if first & 0x80 == 0 {
        return Ok((i, first as u64));
    }
    let width = (first & 0x7F) as usize;
    if width == 0 || width > 8 {
        return Err(Err::Failure(Error::new(i, ErrorKind::LengthValue)));
    }
    let (i, octets) = take(width)(i)?;
    Ok((i, octets.iter().fold(0u64, |len, &b| (len << 8) | b as u64)))
}

/// Extract an unsigned integer value from BER content octets.
pub fn parse_uint(i: &[u8]) -> IResult<&[u8], u64> {
    Ok((&i[i.len()..], i.iter().fold(0, |res, &b| (res << 8) | b as u64)))
}

/// Parse one complete BER element, recursing into constructed payloads.
pub fn parse_tag(i: &[u8]) -> IResult<&[u8], StructureTag> {
    let (i, (class, structure, id)) = parse_type_header(i)?;
    let (i, len) = parse_length(i)?;
    let len = usize::try_from(len)
        .map_err(|_| Err::Failure(Error::new(i, ErrorKind::LengthValue)))?;
    let (i, mut content) = take(len)(i)?;
    let payload = match structure {
        TagStructure::Primitive => PL::P(content.to_vec()),
        TagStructure::Constructed => {
            let mut children: Vec<StructureTag> = Vec::new();
            while !content.is_empty() {
                let (rest, child) = match parse_tag(content) {
                    Ok(done) => done,
                    // A complete constructed element whose children run
                    // past its own length is broken, not short on input.
                    Err(Err::Incomplete(_)) => {
                        return Err(Err::Failure(Error::new(content, ErrorKind::Eof)));
                    }
                    Err(e) => return Err(e),
                };
                content = rest;
                children.push(child);
            }
            PL::C(children)
        }
    };
    Ok((i, StructureTag { class, id, payload }))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::TagClass;
    use crate::structure::{PL, StructureTag};

    #[test]
    fn parse_primitive() {
        let bytes: Vec<u8> = vec![2, 2, 255, 127];
        let result_tag = StructureTag {
            class: TagClass::Universal,
            id: 2,
            payload: PL::P(vec![255, 127]),
        };

        let (rest, tag) = parse_tag(&bytes[..]).expect("done");
        assert!(rest.is_empty());
        assert_eq!(tag, result_tag);
    }

    #[test]
    fn parse_constructed() {
        let bytes: Vec<u8> = vec![
            48, 14, 12, 12, 72, 101, 108, 108, 111, 32, 87, 111, 114, 108, 100, 33,
        ];
        let result_tag = StructureTag {
            class: TagClass::Universal,
            id: 16,
            payload: PL::C(vec![StructureTag {
                class: TagClass::Universal,
                id: 12,
                payload: PL::P(vec![72, 101, 108, 108, 111, 32, 87, 111, 114, 108, 100, 33]),
            }]),
        };

        let (rest, tag) = parse_tag(&bytes[..]).expect("done");
        assert!(rest.is_empty());
        assert_eq!(tag, result_tag);
    }

    #[test]
    fn parse_long_length() {
        let mut bytes: Vec<u8> = vec![0x04, 0x81, 0xC8];
        bytes.extend(std::iter::repeat(0xAB).take(200));

        let (rest, tag) = parse_tag(&bytes[..]).expect("done");
        assert!(rest.is_empty());
        assert_eq!(tag.id, 4);
        match tag.payload {
            PL::P(content) => assert_eq!(content.len(), 200),
            PL::C(_) => panic!("primitive expected"),
        }
    }

    #[test]
    fn incomplete_needs_more() {
        // Header promises 4 content octets, only 2 arrive.
        let bytes: Vec<u8> = vec![0x04, 0x04, 0xDE, 0xAD];
        assert!(matches!(parse_tag(&bytes[..]), Err(Err::Incomplete(_))));
    }

    #[test]
    fn reject_indefinite_length() {
        let bytes: Vec<u8> = vec![0x30, 0x80, 0x04, 0x01, 0xFF, 0x00, 0x00];
        assert!(matches!(parse_tag(&bytes[..]), Err(Err::Failure(_))));
    }

    #[test]
    fn reject_overwide_length() {
        let bytes: Vec<u8> = vec![0x04, 0x89, 1, 1, 1, 1, 1, 1, 1, 1, 1];
        assert!(matches!(parse_tag(&bytes[..]), Err(Err::Failure(_))));
    }

    #[test]
    fn reject_high_tag_form() {
        let bytes: Vec<u8> = vec![0x1F, 0x81, 0x03, 0x01, 0xFF];
        assert!(matches!(parse_tag(&bytes[..]), Err(Err::Failure(_))));
    }

    #[test]
    fn truncated_child_in_complete_constructed() {
        // Outer length is complete, but the inner element claims more
        // content than the outer payload holds.
        let bytes: Vec<u8> = vec![0x30, 0x03, 0x04, 0x04, 0xAA];
        assert!(matches!(parse_tag(&bytes[..]), Err(Err::Failure(_))));
    }
}
