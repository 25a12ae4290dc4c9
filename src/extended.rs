use ber::common::TagClass;
use ber::structures::{Sequence, Tag};

use crate::exop::{construct_exop, Exop};
use crate::ldap::Ldap;
use crate::protocol::{LdapOp, TAG_EXTENDED_REQ};
use crate::result::{ExopResult, Result};

impl Ldap {
    /// Perform an Extended operation given by `exop`. Extended
    /// operations are defined in a separate struct for each operation;
    /// the [Password Modify](exop_impl/struct.PasswordModify.html)
    /// operation ships with the crate.
    pub async fn extended<E>(&mut self, exop: E) -> Result<ExopResult>
    where
        E: Into<Exop>,
    {
        let req = Tag::Sequence(Sequence {
            id: TAG_EXTENDED_REQ,
            class: TagClass::Application,
            inner: construct_exop(exop.into()),
        });

        let (result, exop) = self.op_call(LdapOp::Single, req).await?;
        Ok(ExopResult(exop, result))
    }
}
