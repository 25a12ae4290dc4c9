use ber::common::TagClass;
use ber::structures::{Integer, OctetString, Sequence, Tag};

use crate::ldap::Ldap;
use crate::protocol::{LdapOp, TAG_BIND_REQ};
use crate::result::{LdapResult, Result};

impl Ldap {
    /// Do a simple Bind with the provided DN (`bind_dn`) and password
    /// (`bind_pw`). Empty DN and password make the bind anonymous.
    ///
    /// While the bind is awaiting its response, nothing else is written
    /// to the connection; operations submitted in the meantime are
    /// queued and flushed once the bind response arrives.
    pub async fn simple_bind(&mut self, bind_dn: &str, bind_pw: &str) -> Result<LdapResult> {
        let req = Tag::Sequence(Sequence {
            id: TAG_BIND_REQ,
            class: TagClass::Application,
            inner: vec![
                Tag::Integer(Integer {
                    inner: 3,
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    inner: Vec::from(bind_dn),
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    id: 0,
                    class: TagClass::Context,
                    inner: Vec::from(bind_pw),
                }),
            ],
        });

        let (result, _) = self.op_call(LdapOp::Single, req).await?;
        Ok(result)
    }
}
