//! Request and response controls.
//!
//! Controls are kept opaque: an OID, a criticality flag, and an optional
//! BER-encoded value. Interpreting a control value is up to the caller.

use ber::common::TagClass;
use ber::structure::{PL, StructureTag};
use ber::structures::{ASNTag, Boolean, OctetString, Sequence, Tag};
use ber::universal::Types;

use crate::result::{LdapError, Result};

/// An LDAP control attached to a request or returned on a response.
#[derive(Clone, Debug, PartialEq)]
pub struct Control {
    /// Control OID, in dotted-decimal form.
    pub ctype: String,
    /// Criticality. A server must reject a request carrying an
    /// unrecognized critical control.
    pub crit: bool,
    /// Raw control value, if present.
    pub val: Option<Vec<u8>>,
}

impl Control {
    pub fn new(ctype: &str, crit: bool, val: Option<Vec<u8>>) -> Control {
        Control {
            ctype: ctype.to_owned(),
            crit,
            val,
        }
    }
}

impl From<Control> for StructureTag {
    fn from(ctrl: Control) -> StructureTag {
        let mut seq = vec![Tag::OctetString(OctetString {
            inner: ctrl.ctype.into_bytes(),
            ..Default::default()
        })];
        if ctrl.crit {
            seq.push(Tag::Boolean(Boolean {
                inner: true,
                ..Default::default()
            }));
        }
        if let Some(val) = ctrl.val {
            seq.push(Tag::OctetString(OctetString {
                inner: val,
                ..Default::default()
            }));
        }
        Tag::Sequence(Sequence {
            inner: seq,
            ..Default::default()
        })
        .into_structure()
    }
}

/// Wrap request controls into the context-tagged envelope component
/// (tag 0xA0).
pub(crate) fn build_controls(ctrls: Vec<Control>) -> StructureTag {
    StructureTag {
        class: TagClass::Context,
        id: 0,
        payload: PL::C(ctrls.into_iter().map(StructureTag::from).collect()),
    }
}

/// Parse the controls component of a response envelope.
pub(crate) fn parse_controls(t: StructureTag) -> Result<Vec<Control>> {
    let tags = t
        .match_class(TagClass::Context)
        .and_then(|t| t.match_id(0))
        .and_then(|t| t.expect_constructed())
        .ok_or(LdapError::MalformedPDU)?;
    let mut ctrls = Vec::new();
    for ctrl in tags {
        let mut components = ctrl
            .expect_constructed()
            .ok_or(LdapError::MalformedPDU)?
            .into_iter();
        let ctype = String::from_utf8(
            components
                .next()
                .and_then(|t| t.expect_primitive())
                .ok_or(LdapError::MalformedPDU)?,
        )?;
        let (crit, maybe_val) = match components.next() {
            None => (false, None),
            Some(c) if c.class == TagClass::Universal && c.id == Types::Boolean as u64 => {
                match c.payload {
                    PL::P(ref v) if !v.is_empty() => (v[0] != 0, components.next()),
                    _ => return Err(LdapError::MalformedPDU),
                }
            }
            Some(c) if c.class == TagClass::Universal && c.id == Types::OctetString as u64 => {
                (false, Some(c))
            }
            Some(_) => return Err(LdapError::MalformedPDU),
        };
        let val = match maybe_val {
            None => None,
            Some(v) => Some(v.expect_primitive().ok_or(LdapError::MalformedPDU)?),
        };
        ctrls.push(Control { ctype, crit, val });
    }
    Ok(ctrls)
}
