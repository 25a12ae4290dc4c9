use ber::common::TagClass;
use ber::structures::{Null, Tag};

use crate::ldap::Ldap;
use crate::protocol::{LdapOp, TAG_UNBIND_REQ};
use crate::result::Result;

impl Ldap {
    /// Terminate the connection with an Unbind request.
    ///
    /// The server doesn't respond to Unbind; the socket is shut down as
    /// soon as the request bytes are written. Operations still awaiting
    /// responses at that point resolve with
    /// [`ConnectionClosed`](enum.LdapError.html#variant.ConnectionClosed).
    pub async fn unbind(&mut self) -> Result<()> {
        let req = Tag::Null(Null {
            id: TAG_UNBIND_REQ,
            class: TagClass::Application,
        });

        self.op_call(LdapOp::Unbind, req).await.map(|_| ())
    }
}
