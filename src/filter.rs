//! Typed search filters and their BER encoding.
//!
//! A filter is a tree: boolean composites over match leaves. Building a
//! tree directly is infallible; structural invariants (non-empty
//! composites, substring part ordering) are checked when the tree is
//! lowered to BER by [`into_tag()`](enum.Filter.html#method.into_tag).

use ber::common::TagClass;
use ber::structures::{Boolean, ExplicitTag, OctetString, Sequence, Tag};

use crate::result::{LdapError, Result};

const AND_FILT: u64 = 0;
const OR_FILT: u64 = 1;
const NOT_FILT: u64 = 2;

const EQ_MATCH: u64 = 3;
const SUBSTR_MATCH: u64 = 4;
const GTE_MATCH: u64 = 5;
const LTE_MATCH: u64 = 6;
const PRES_MATCH: u64 = 7;
const APPROX_MATCH: u64 = 8;
const EXT_MATCH: u64 = 9;

const SUB_INITIAL: u64 = 0;
const SUB_ANY: u64 = 1;
const SUB_FINAL: u64 = 2;

/// One component of a substring match, in pattern order.
#[derive(Clone, Debug, PartialEq)]
pub enum SubstringPart {
    /// The pattern starts with this string. At most one, first.
    Initial(String),
    /// The pattern contains this string, in order.
    Any(String),
    /// The pattern ends with this string. At most one, last.
    Final(String),
}

/// An LDAP search filter.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// All subfilters must match. Must not be empty.
    And(Vec<Filter>),
    /// At least one subfilter must match. Must not be empty.
    Or(Vec<Filter>),
    /// The subfilter must not match.
    Not(Box<Filter>),
    /// Attribute equals the value.
    Equality(String, String),
    /// Attribute matches the substring pattern.
    Substring(String, Vec<SubstringPart>),
    /// Attribute is greater than or equal to the value.
    GreaterOrEqual(String, String),
    /// Attribute is less than or equal to the value.
    LessOrEqual(String, String),
    /// Attribute approximately matches the value.
    ApproxMatch(String, String),
    /// The entry has the attribute.
    Present(String),
    /// Extensible match, RFC 4511 section 4.5.1.7.3.
    ExtensibleMatch {
        matching_rule: Option<String>,
        attr: Option<String>,
        value: String,
        dn_attributes: bool,
    },
}

impl Filter {
    /// Build a filter from an attribute and a `*`-wildcard pattern.
    ///
    /// A pattern without asterisks produces an equality match, a lone
    /// asterisk a presence match, and anything else a substring match
    /// whose parts are the pattern fragments between asterisks. A
    /// literal asterisk (or any other byte) can be included in a
    /// fragment with the `\NN` hex escape, as produced by
    /// [`ldap_escape`](../fn.ldap_escape.html).
    pub fn like(attr: &str, pattern: &str) -> Result<Filter> {
        let fragments = pattern.split('*').collect::<Vec<_>>();
        if fragments.len() == 1 {
            return Ok(Filter::Equality(attr.to_owned(), unescape(fragments[0])?));
        }
        if fragments.iter().all(|f| f.is_empty()) && fragments.len() == 2 {
            return Ok(Filter::Present(attr.to_owned()));
        }
        // an empty fragment may exist only at either end; otherwise the
        // pattern has two adjacent asterisks
        if fragments[1..fragments.len() - 1].iter().any(|f| f.is_empty()) {
            return Err(LdapError::ProtocolViolation(
                "adjacent wildcards in substring pattern",
            ));
        }
        let last = fragments.len() - 1;
        let mut parts = Vec::new();
        for (n, fragment) in fragments.into_iter().enumerate() {
            if fragment.is_empty() {
                continue;
            }
            let fragment = unescape(fragment)?;
            parts.push(match n {
                0 => SubstringPart::Initial(fragment),
                n if n == last => SubstringPart::Final(fragment),
                _ => SubstringPart::Any(fragment),
            });
        }
        Ok(Filter::Substring(attr.to_owned(), parts))
    }

    /// Lower the filter tree into its BER representation.
    pub fn into_tag(self) -> Result<Tag> {
        match self {
            Filter::And(children) => composite_tag(AND_FILT, children),
            Filter::Or(children) => composite_tag(OR_FILT, children),
            Filter::Not(child) => Ok(Tag::ExplicitTag(ExplicitTag {
                class: TagClass::Context,
                id: NOT_FILT,
                inner: Box::new(child.into_tag()?),
            })),
            Filter::Equality(attr, value) => Ok(attr_value_tag(EQ_MATCH, attr, value)),
            Filter::GreaterOrEqual(attr, value) => Ok(attr_value_tag(GTE_MATCH, attr, value)),
            Filter::LessOrEqual(attr, value) => Ok(attr_value_tag(LTE_MATCH, attr, value)),
            Filter::ApproxMatch(attr, value) => Ok(attr_value_tag(APPROX_MATCH, attr, value)),
            Filter::Present(attr) => Ok(Tag::OctetString(OctetString {
                class: TagClass::Context,
                id: PRES_MATCH,
                inner: attr.into_bytes(),
            })),
            Filter::Substring(attr, parts) => substring_tag(attr, parts),
            Filter::ExtensibleMatch {
                matching_rule,
                attr,
                value,
                dn_attributes,
            } => extensible_tag(matching_rule, attr, value, dn_attributes),
        }
    }
}

fn composite_tag(id: u64, children: Vec<Filter>) -> Result<Tag> {
    if children.is_empty() {
        return Err(LdapError::ProtocolViolation("empty composite filter"));
    }
    Ok(Tag::Sequence(Sequence {
        class: TagClass::Context,
        id,
        inner: children
            .into_iter()
            .map(Filter::into_tag)
            .collect::<Result<Vec<_>>>()?,
    }))
}

fn attr_value_tag(id: u64, attr: String, value: String) -> Tag {
    Tag::Sequence(Sequence {
        class: TagClass::Context,
        id,
        inner: vec![
            Tag::OctetString(OctetString {
                inner: attr.into_bytes(),
                ..Default::default()
            }),
            Tag::OctetString(OctetString {
                inner: value.into_bytes(),
                ..Default::default()
            }),
        ],
    })
}

fn substring_tag(attr: String, parts: Vec<SubstringPart>) -> Result<Tag> {
    if parts.is_empty() {
        return Err(LdapError::ProtocolViolation("empty substring filter"));
    }
    let last = parts.len() - 1;
    let mut inner = Vec::with_capacity(parts.len());
    for (n, part) in parts.into_iter().enumerate() {
        let (id, value) = match part {
            SubstringPart::Initial(value) => {
                if n != 0 {
                    return Err(LdapError::ProtocolViolation(
                        "initial substring part not first",
                    ));
                }
                (SUB_INITIAL, value)
            }
            SubstringPart::Any(value) => (SUB_ANY, value),
            SubstringPart::Final(value) => {
                if n != last {
                    return Err(LdapError::ProtocolViolation(
                        "final substring part not last",
                    ));
                }
                (SUB_FINAL, value)
            }
        };
        inner.push(Tag::OctetString(OctetString {
            class: TagClass::Context,
            id,
            inner: value.into_bytes(),
        }));
    }
    Ok(Tag::Sequence(Sequence {
        class: TagClass::Context,
        id: SUBSTR_MATCH,
        inner: vec![
            Tag::OctetString(OctetString {
                inner: attr.into_bytes(),
                ..Default::default()
            }),
            Tag::Sequence(Sequence {
                inner,
                ..Default::default()
            }),
        ],
    }))
}

fn extensible_tag(
    matching_rule: Option<String>,
    attr: Option<String>,
    value: String,
    dn_attributes: bool,
) -> Result<Tag> {
    if matching_rule.is_none() && attr.is_none() {
        return Err(LdapError::ProtocolViolation(
            "extensible match needs a matching rule or an attribute",
        ));
    }
    let mut inner = vec![];
    if let Some(mrule) = matching_rule {
        inner.push(Tag::OctetString(OctetString {
            class: TagClass::Context,
            id: 1,
            inner: mrule.into_bytes(),
        }));
    }
    if let Some(attr) = attr {
        inner.push(Tag::OctetString(OctetString {
            class: TagClass::Context,
            id: 2,
            inner: attr.into_bytes(),
        }));
    }
    inner.push(Tag::OctetString(OctetString {
        class: TagClass::Context,
        id: 3,
        inner: value.into_bytes(),
    }));
    if dn_attributes {
        inner.push(Tag::Boolean(Boolean {
            class: TagClass::Context,
            id: 4,
            inner: true,
        }));
    }
    Ok(Tag::Sequence(Sequence {
        class: TagClass::Context,
        id: EXT_MATCH,
        inner,
    }))
}

enum Unescaper {
    WantFirst,
    WantSecond(u8),
    Value(u8),
    Invalid,
}

impl Unescaper {
    fn feed(&self, c: u8) -> Unescaper {
        fn hex_value(c: u8) -> Option<u8> {
            match c {
                b'0'..=b'9' => Some(c - b'0'),
                b'a'..=b'f' => Some(c - b'a' + 10),
                b'A'..=b'F' => Some(c - b'A' + 10),
                _ => None,
            }
        }

        match *self {
            Unescaper::Invalid => Unescaper::Invalid,
            Unescaper::WantFirst => match hex_value(c) {
                Some(v) => Unescaper::WantSecond(v),
                None => Unescaper::Invalid,
            },
            Unescaper::WantSecond(partial) => match hex_value(c) {
                Some(v) => Unescaper::Value((partial << 4) + v),
                None => Unescaper::Invalid,
            },
            Unescaper::Value(_) => {
                if c == b'\\' {
                    Unescaper::WantFirst
                } else {
                    Unescaper::Value(c)
                }
            }
        }
    }
}

// Any byte in a pattern fragment may be represented by \NN, where N is a
// hex digit. Parentheses, asterisk and backslash itself can only appear
// escaped.
fn unescape(fragment: &str) -> Result<String> {
    let mut out = Vec::with_capacity(fragment.len());
    let mut state = Unescaper::Value(0);
    for &c in fragment.as_bytes() {
        state = state.feed(c);
        match state {
            Unescaper::Value(v) => out.push(v),
            Unescaper::Invalid => {
                return Err(LdapError::ProtocolViolation(
                    "invalid escape in filter value",
                ));
            }
            _ => (),
        }
    }
    if !matches!(state, Unescaper::Value(_)) {
        return Err(LdapError::ProtocolViolation(
            "truncated escape in filter value",
        ));
    }
    Ok(String::from_utf8(out)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use ber::structures::ASNTag;
    use ber::write;
    use bytes::BytesMut;

    fn encode(filter: Filter) -> Vec<u8> {
        let mut buf = BytesMut::new();
        write::encode_into(&mut buf, filter.into_tag().expect("tag").into_structure())
            .expect("encoded");
        Vec::from(&buf[..])
    }

    #[test]
    fn equality_encoding() {
        assert_eq!(
            encode(Filter::Equality("cn".into(), "alice".into())),
            vec![0xA3, 0x0B, 0x04, 0x02, b'c', b'n', 0x04, 0x05, b'a', b'l', b'i', b'c', b'e'],
        );
    }

    #[test]
    fn presence_encoding() {
        assert_eq!(
            encode(Filter::Present("cn".into())),
            vec![0x87, 0x02, b'c', b'n'],
        );
    }

    #[test]
    fn substring_component_tags() {
        let bytes = encode(Filter::Substring(
            "cn".into(),
            vec![
                SubstringPart::Initial("a".into()),
                SubstringPart::Any("b".into()),
                SubstringPart::Final("c".into()),
            ],
        ));
        assert_eq!(
            bytes,
            vec![
                0xA4, 0x0F, 0x04, 0x02, b'c', b'n', 0x30, 0x09, 0x80, 0x01, b'a', 0x81, 0x01,
                b'b', 0x82, 0x01, b'c',
            ],
        );
    }

    #[test]
    fn like_splits_pattern() {
        assert_eq!(
            Filter::like("cn", "al*ic*e").expect("filter"),
            Filter::Substring(
                "cn".into(),
                vec![
                    SubstringPart::Initial("al".into()),
                    SubstringPart::Any("ic".into()),
                    SubstringPart::Final("e".into()),
                ],
            ),
        );
        assert_eq!(
            Filter::like("cn", "*son").expect("filter"),
            Filter::Substring("cn".into(), vec![SubstringPart::Final("son".into())]),
        );
        assert_eq!(
            Filter::like("cn", "alice").expect("filter"),
            Filter::Equality("cn".into(), "alice".into()),
        );
        assert_eq!(
            Filter::like("objectClass", "*").expect("filter"),
            Filter::Present("objectClass".into()),
        );
    }

    #[test]
    fn like_unescapes_fragments() {
        assert_eq!(
            Filter::like("cn", "five \\2a stars").expect("filter"),
            Filter::Equality("cn".into(), "five * stars".into()),
        );
        assert!(Filter::like("cn", "broken\\2").is_err());
        assert!(Filter::like("cn", "broken\\zz").is_err());
    }

    #[test]
    fn like_rejects_adjacent_wildcards() {
        assert!(Filter::like("cn", "a**b").is_err());
    }

    #[test]
    fn composite_invariants() {
        assert!(Filter::And(vec![]).into_tag().is_err());
        assert!(Filter::Or(vec![]).into_tag().is_err());
        assert!(
            Filter::Substring("cn".into(), vec![SubstringPart::Final("a".into()), SubstringPart::Any("b".into())])
                .into_tag()
                .is_err()
        );
    }

    #[test]
    fn nested_composite_encoding() {
        let filter = Filter::And(vec![
            Filter::Present("objectClass".into()),
            Filter::Not(Box::new(Filter::Equality("uid".into(), "root".into()))),
        ]);
        let bytes = encode(filter);
        // and(0xA0) > [presence(0x87), not(0xA2) > equality(0xA3)]
        assert_eq!(bytes[0], 0xA0);
        assert_eq!(bytes[1] as usize, bytes.len() - 2);
        assert_eq!(bytes[2], 0x87);
        let not_off = 2 + 2 + bytes[3] as usize;
        assert_eq!(bytes[not_off], 0xA2);
        assert_eq!(bytes[not_off + 2], 0xA3);
    }

    #[test]
    fn extensible_match_encoding() {
        let bytes = encode(Filter::ExtensibleMatch {
            matching_rule: Some("caseExactMatch".into()),
            attr: Some("cn".into()),
            value: "alice".into(),
            dn_attributes: true,
        });
        assert_eq!(bytes[0], 0xA9);
        // components: [1] rule, [2] type, [3] value, [4] dnAttributes
        assert_eq!(bytes[2], 0x81);
        let type_off = 2 + 2 + bytes[3] as usize;
        assert_eq!(bytes[type_off], 0x82);
        let value_off = type_off + 2 + bytes[type_off + 1] as usize;
        assert_eq!(bytes[value_off], 0x83);
        let dn_off = value_off + 2 + bytes[value_off + 1] as usize;
        assert_eq!(&bytes[dn_off..], &[0x84, 0x01, 0xFF]);
    }
}
