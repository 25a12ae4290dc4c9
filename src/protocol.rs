//! Wire protocol: the LDAPMessage envelope codec and the op plumbing
//! between the user-facing handle and the connection task.
//!
//! The codec is a pure byte-stream-to-PDU transformer. The decoder keeps
//! whatever bytes have arrived in the `BytesMut` it is handed and emits
//! one `(message id, protocol op, controls)` triple per complete PDU,
//! regardless of how the stream was chunked by TCP. A PDU that cannot be
//! decoded poisons the connection: BER gives no way to find the start of
//! the next element after a bad one.

use std::collections::HashSet;

use bytes::{Buf, BytesMut};
use log::debug;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Decoder, Encoder};

use ber::common::TagClass;
use ber::parse::{parse_tag, parse_uint};
use ber::structure::StructureTag;
use ber::structures::{ASNTag, Integer, Sequence, Tag};
use ber::universal::Types;
use ber::write;

use crate::controls::{build_controls, parse_controls, Control};
use crate::exop::Exop;
use crate::result::{LdapError, LdapResult, Result};
use crate::RequestId;

// Application tags of the protocol ops this client sends or receives.
pub(crate) const TAG_BIND_REQ: u64 = 0;
pub(crate) const TAG_BIND_RESP: u64 = 1;
pub(crate) const TAG_UNBIND_REQ: u64 = 2;
pub(crate) const TAG_SEARCH_REQ: u64 = 3;
pub(crate) const TAG_SEARCH_ENTRY: u64 = 4;
pub(crate) const TAG_SEARCH_DONE: u64 = 5;
pub(crate) const TAG_MODIFY_REQ: u64 = 6;
pub(crate) const TAG_MODIFY_RESP: u64 = 7;
pub(crate) const TAG_ADD_REQ: u64 = 8;
pub(crate) const TAG_ADD_RESP: u64 = 9;
pub(crate) const TAG_DEL_REQ: u64 = 10;
pub(crate) const TAG_DEL_RESP: u64 = 11;
pub(crate) const TAG_MODDN_REQ: u64 = 12;
pub(crate) const TAG_MODDN_RESP: u64 = 13;
pub(crate) const TAG_COMPARE_REQ: u64 = 14;
pub(crate) const TAG_COMPARE_RESP: u64 = 15;
pub(crate) const TAG_ABANDON_REQ: u64 = 16;
pub(crate) const TAG_SEARCH_REF: u64 = 19;
pub(crate) const TAG_EXTENDED_REQ: u64 = 23;
pub(crate) const TAG_EXTENDED_RESP: u64 = 24;
pub(crate) const TAG_INTERMEDIATE_RESP: u64 = 25;

/// Kind of a submitted operation, as the connection task needs to see
/// it. The request body itself travels alongside as a BER tag.
pub(crate) enum LdapOp {
    /// An op expecting exactly one response.
    Single,
    /// A search, streaming entries into the channel until its result
    /// arrives.
    Search(ItemSender),
    /// Abandonment of a previously submitted op. No response.
    Abandon(RequestId),
    /// Connection teardown announcement. No response.
    Unbind,
}

/// One element of a search result stream.
pub(crate) enum SearchItem {
    Entry(StructureTag),
    Referral(StructureTag),
    Done(LdapResult),
}

pub(crate) type MaybeControls = Option<Vec<Control>>;
pub(crate) type ResultSender = oneshot::Sender<Result<(Tag, Vec<Control>)>>;
pub(crate) type ItemSender = mpsc::UnboundedSender<Result<(SearchItem, Vec<Control>)>>;
pub(crate) type OpTuple = (RequestId, LdapOp, Tag, MaybeControls, ResultSender);

pub(crate) struct LdapCodec;

impl Decoder for LdapCodec {
    type Item = (RequestId, Tag, Vec<Control>);
    type Error = LdapError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        let (amt, outer) = match parse_tag(&buf[..]) {
            Ok((rest, tag)) => (buf.len() - rest.len(), tag),
            Err(nom::Err::Incomplete(_)) => return Ok(None),
            Err(_) => return Err(LdapError::MalformedBER),
        };
        buf.advance(amt);
        let mut components = outer
            .match_class(TagClass::Universal)
            .and_then(|t| t.match_id(Types::Sequence as u64))
            .and_then(|t| t.expect_constructed())
            .ok_or(LdapError::MalformedPDU)?
            .into_iter();
        let msgid_octets = components
            .next()
            .and_then(|t| t.match_class(TagClass::Universal))
            .and_then(|t| t.match_id(Types::Integer as u64))
            .and_then(|t| t.expect_primitive())
            .ok_or(LdapError::MalformedPDU)?;
        let msgid = match parse_uint(&msgid_octets) {
            Ok((_, id)) => RequestId::try_from(id).map_err(|_| LdapError::MalformedPDU)?,
            Err(_) => return Err(LdapError::MalformedPDU),
        };
        let protoop = components
            .next()
            .and_then(|t| t.match_class(TagClass::Application))
            .ok_or(LdapError::MalformedPDU)?;
        let controls = match components.next() {
            Some(ctrls) => parse_controls(ctrls)?,
            None => Vec::new(),
        };
        debug!("received PDU: msgid={}, op tag={}", msgid, protoop.id);
        Ok(Some((msgid, Tag::StructureTag(protoop), controls)))
    }
}

impl Encoder<(RequestId, Tag, MaybeControls)> for LdapCodec {
    type Error = LdapError;

    fn encode(&mut self, msg: (RequestId, Tag, MaybeControls), buf: &mut BytesMut) -> Result<()> {
        let (id, op_tag, controls) = msg;
        let mut envelope = vec![
            Tag::Integer(Integer {
                inner: id as i64,
                ..Default::default()
            }),
            op_tag,
        ];
        if let Some(ctrls) = controls {
            envelope.push(Tag::StructureTag(build_controls(ctrls)));
        }
        let outstruct = Tag::Sequence(Sequence {
            inner: envelope,
            ..Default::default()
        })
        .into_structure();
        debug!("sending PDU: msgid={}", id);
        write::encode_into(buf, outstruct)?;
        Ok(())
    }
}

/// An LDAPResult with the extended-response components, parsed out of a
/// protocol op.
pub(crate) struct LdapResultExt(pub LdapResult, pub Exop);

impl LdapResultExt {
    pub(crate) fn from_tag(tag: Tag) -> Result<LdapResultExt> {
        let t = match tag {
            Tag::StructureTag(t) => t,
            // local acknowledgment of a response-less op
            Tag::Null(_) => {
                return Ok(LdapResultExt(
                    LdapResult::empty_success(),
                    Exop {
                        name: None,
                        val: None,
                    },
                ));
            }
            _ => return Err(LdapError::MalformedPDU),
        };
        let mut tags = t
            .expect_constructed()
            .ok_or(LdapError::MalformedPDU)?
            .into_iter();
        let rc_octets = tags
            .next()
            .and_then(|t| t.match_class(TagClass::Universal))
            .and_then(|t| t.match_id(Types::Enumerated as u64))
            .and_then(|t| t.expect_primitive())
            .ok_or(LdapError::MalformedPDU)?;
        let rc = match parse_uint(&rc_octets) {
            Ok((_, rc)) => rc as u32,
            Err(_) => return Err(LdapError::MalformedPDU),
        };
        let matched = String::from_utf8(
            tags.next()
                .and_then(|t| t.expect_primitive())
                .ok_or(LdapError::MalformedPDU)?,
        )?;
        let text = String::from_utf8(
            tags.next()
                .and_then(|t| t.expect_primitive())
                .ok_or(LdapError::MalformedPDU)?,
        )?;
        let mut refs = Vec::new();
        let mut exop_name = None;
        let mut exop_val = None;
        for t in tags {
            match (t.class, t.id) {
                (TagClass::Context, 3) => {
                    let urls = t.expect_constructed().ok_or(LdapError::MalformedPDU)?;
                    let mut set = HashSet::new();
                    for url in urls {
                        set.insert(String::from_utf8(
                            url.expect_primitive().ok_or(LdapError::MalformedPDU)?,
                        )?);
                    }
                    refs.push(set);
                }
                (TagClass::Context, 10) => {
                    exop_name = Some(String::from_utf8(
                        t.expect_primitive().ok_or(LdapError::MalformedPDU)?,
                    )?);
                }
                (TagClass::Context, 11) => {
                    exop_val = t.expect_primitive();
                }
                _ => (),
            }
        }
        Ok(LdapResultExt(
            LdapResult {
                rc,
                matched,
                text,
                refs,
                ctrls: Vec::new(),
            },
            Exop {
                name: exop_name,
                val: exop_val,
            },
        ))
    }
}
