use super::ASNTag;
use crate::common::TagClass;
use crate::structure::{PL, StructureTag};
use crate::universal;

/// The ASN.1 NULL value. It carries no payload; only the tag varies,
/// which is how LDAP encodes the UnbindRequest.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Null {
    pub id: u64,
    pub class: TagClass,
}

impl ASNTag for Null {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: PL::P(Vec::new()),
        }
    }
}

impl Default for Null {
    fn default() -> Null {
        Null {
            id: universal::Types::Null as u64,
            class: TagClass::Universal,
        }
    }
}
