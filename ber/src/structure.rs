//! Generic BER element representation.

use crate::common::TagClass;

/// Payload of a BER element: primitive bytes or constructed children.
#[derive(Clone, Debug, PartialEq)]
pub enum PL {
    P(Vec<u8>),
    C(Vec<StructureTag>),
}

/// One decoded (or to-be-encoded) BER element.
#[derive(Clone, Debug, PartialEq)]
pub struct StructureTag {
    pub class: TagClass,
    pub id: u64,
    pub payload: PL,
}

impl StructureTag {
    /// Keep the tag if its class matches, discard it otherwise.
    pub fn match_class(self, class: TagClass) -> Option<StructureTag> {
        if self.class == class {
            Some(self)
        } else {
            None
        }
    }

    /// Keep the tag if its number matches, discard it otherwise.
    pub fn match_id(self, id: u64) -> Option<StructureTag> {
        if self.id == id {
            Some(self)
        } else {
            None
        }
    }

    /// Unwrap a constructed payload.
    pub fn expect_constructed(self) -> Option<Vec<StructureTag>> {
        match self.payload {
            PL::C(inner) => Some(inner),
            PL::P(_) => None,
        }
    }

    /// Unwrap a primitive payload.
    pub fn expect_primitive(self) -> Option<Vec<u8>> {
        match self.payload {
            PL::P(inner) => Some(inner),
            PL::C(_) => None,
        }
    }
}
