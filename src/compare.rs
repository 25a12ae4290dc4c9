use ber::common::TagClass;
use ber::structures::{OctetString, Sequence, Tag};

use crate::ldap::Ldap;
use crate::protocol::{LdapOp, TAG_COMPARE_REQ};
use crate::result::{CompareResult, Result};

impl Ldap {
    /// Compare the value of the attribute `attr` of the entry named by
    /// `dn` with the value `val`.
    ///
    /// A served comparison resolves successfully with result code 5
    /// (compareFalse) or 6 (compareTrue); neither is an error. Use
    /// [`CompareResult::equal()`](struct.CompareResult.html#method.equal)
    /// to get the outcome as a boolean.
    pub async fn compare<B: AsRef<[u8]>>(
        &mut self,
        dn: &str,
        attr: &str,
        val: B,
    ) -> Result<CompareResult> {
        let req = Tag::Sequence(Sequence {
            id: TAG_COMPARE_REQ,
            class: TagClass::Application,
            inner: vec![
                Tag::OctetString(OctetString {
                    inner: Vec::from(dn.as_bytes()),
                    ..Default::default()
                }),
                Tag::Sequence(Sequence {
                    inner: vec![
                        Tag::OctetString(OctetString {
                            inner: Vec::from(attr.as_bytes()),
                            ..Default::default()
                        }),
                        Tag::OctetString(OctetString {
                            inner: Vec::from(val.as_ref()),
                            ..Default::default()
                        }),
                    ],
                    ..Default::default()
                }),
            ],
        });

        let (result, _) = self.op_call(LdapOp::Single, req).await?;
        Ok(CompareResult(result))
    }
}
