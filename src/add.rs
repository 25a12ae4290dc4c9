use std::collections::HashSet;
use std::hash::Hash;

use ber::common::TagClass;
use ber::structures::{OctetString, Sequence, Set, Tag};

use crate::ldap::Ldap;
use crate::protocol::{LdapOp, TAG_ADD_REQ};
use crate::result::{LdapError, LdapResult, Result};

impl Ldap {
    /// Add an entry named by `dn`, with the list of attributes and their
    /// values given in `attrs`. None of the `HashSet`s of values for an
    /// attribute may be empty.
    pub async fn add<S: AsRef<[u8]> + Eq + Hash>(
        &mut self,
        dn: &str,
        attrs: Vec<(S, HashSet<S>)>,
    ) -> Result<LdapResult> {
        let mut any_empty = false;
        let req = Tag::Sequence(Sequence {
            id: TAG_ADD_REQ,
            class: TagClass::Application,
            inner: vec![
                Tag::OctetString(OctetString {
                    inner: Vec::from(dn.as_bytes()),
                    ..Default::default()
                }),
                Tag::Sequence(Sequence {
                    inner: attrs
                        .into_iter()
                        .map(|(name, vals)| {
                            if vals.is_empty() {
                                any_empty = true;
                            }
                            Tag::Sequence(Sequence {
                                inner: vec![
                                    Tag::OctetString(OctetString {
                                        inner: Vec::from(name.as_ref()),
                                        ..Default::default()
                                    }),
                                    Tag::Set(Set {
                                        inner: vals
                                            .into_iter()
                                            .map(|v| {
                                                Tag::OctetString(OctetString {
                                                    inner: Vec::from(v.as_ref()),
                                                    ..Default::default()
                                                })
                                            })
                                            .collect(),
                                        ..Default::default()
                                    }),
                                ],
                                ..Default::default()
                            })
                        })
                        .collect(),
                    ..Default::default()
                }),
            ],
        });
        if any_empty {
            return Err(LdapError::ProtocolViolation("empty value set for Add"));
        }

        let (result, _) = self.op_call(LdapOp::Single, req).await?;
        Ok(result)
    }
}
