//! Extended operation support.

use ber::common::TagClass;
use ber::structures::{OctetString, Tag};

/// Generic extended operation.
///
/// Since the same struct is used both for requests and responses, both
/// fields are declared as optional; when sending an extended request,
/// the OID must be present.
#[derive(Clone, Debug)]
pub struct Exop {
    /// OID of the operation. It may be absent in the response.
    pub name: Option<String>,
    /// Request or response value. It may be absent in both.
    pub val: Option<Vec<u8>>,
}

impl Exop {
    /// Parse the response value into the given type, if the value is
    /// present.
    pub fn parse<T: ExopParser>(&self) -> Option<T> {
        self.val.as_ref().and_then(|v| T::parse(v))
    }
}

/// Conversion trait for extended response values.
pub trait ExopParser: Sized {
    /// Convert the raw BER value into a response struct, if possible.
    fn parse(val: &[u8]) -> Option<Self>;
}

pub(crate) fn construct_exop(exop: Exop) -> Vec<Tag> {
    let mut seq = vec![];
    if let Some(name) = exop.name {
        seq.push(Tag::OctetString(OctetString {
            id: 0,
            class: TagClass::Context,
            inner: name.into_bytes(),
        }));
    }
    if let Some(val) = exop.val {
        seq.push(Tag::OctetString(OctetString {
            id: 1,
            class: TagClass::Context,
            inner: val,
        }));
    }
    seq
}
