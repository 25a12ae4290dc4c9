use ber::common::TagClass;
use ber::structures::{Boolean, OctetString, Sequence, Tag};

use crate::ldap::Ldap;
use crate::protocol::{LdapOp, TAG_MODDN_REQ};
use crate::result::{LdapResult, Result};

impl Ldap {
    /// Rename the entry named by `dn` to the new RDN `rdn`. If
    /// `delete_old` is `true`, the old RDN attribute values are removed
    /// from the entry. Passing a DN in `new_sup` moves the entry below
    /// that superior.
    pub async fn modifydn(
        &mut self,
        dn: &str,
        rdn: &str,
        delete_old: bool,
        new_sup: Option<&str>,
    ) -> Result<LdapResult> {
        let mut params = vec![
            Tag::OctetString(OctetString {
                inner: Vec::from(dn.as_bytes()),
                ..Default::default()
            }),
            Tag::OctetString(OctetString {
                inner: Vec::from(rdn.as_bytes()),
                ..Default::default()
            }),
            Tag::Boolean(Boolean {
                inner: delete_old,
                ..Default::default()
            }),
        ];
        if let Some(new_sup) = new_sup {
            params.push(Tag::OctetString(OctetString {
                id: 0,
                class: TagClass::Context,
                inner: Vec::from(new_sup.as_bytes()),
            }));
        }
        let req = Tag::Sequence(Sequence {
            id: TAG_MODDN_REQ,
            class: TagClass::Application,
            inner: params,
        });

        let (result, _) = self.op_call(LdapOp::Single, req).await?;
        Ok(result)
    }
}
