use ber::common::TagClass;
use ber::structures::{OctetString, Tag};

use crate::ldap::Ldap;
use crate::protocol::{LdapOp, TAG_DEL_REQ};
use crate::result::{LdapResult, Result};

impl Ldap {
    /// Delete the entry named by `dn`.
    pub async fn delete(&mut self, dn: &str) -> Result<LdapResult> {
        let req = Tag::OctetString(OctetString {
            id: TAG_DEL_REQ,
            class: TagClass::Application,
            inner: Vec::from(dn.as_bytes()),
        });

        let (result, _) = self.op_call(LdapOp::Single, req).await?;
        Ok(result)
    }
}
