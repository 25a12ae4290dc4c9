use ber::common::TagClass;
use ber::structures::{Integer, Tag};

use crate::ldap::Ldap;
use crate::protocol::{LdapOp, TAG_ABANDON_REQ};
use crate::result::Result;
use crate::RequestId;

impl Ldap {
    /// Ask the server to abandon the operation with the message id
    /// `msgid`, obtainable through
    /// [`last_id()`](#method.last_id) on the handle that submitted it.
    ///
    /// The server sends no response to an Abandon. Locally, the target
    /// operation is resolved with
    /// [`Abandoned`](enum.LdapError.html#variant.Abandoned) as soon as
    /// the request is written out.
    pub async fn abandon(&mut self, msgid: RequestId) -> Result<()> {
        let req = Tag::Integer(Integer {
            id: TAG_ABANDON_REQ,
            class: TagClass::Application,
            inner: msgid as i64,
        });

        self.op_call(LdapOp::Abandon(msgid), req).await.map(|_| ())
    }
}
