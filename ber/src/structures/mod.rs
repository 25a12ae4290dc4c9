use crate::structure;

pub mod boolean;
pub mod explicit;
pub mod integer;
pub mod null;
pub mod octetstring;
pub mod sequence;

pub use self::boolean::Boolean;
pub use self::explicit::ExplicitTag;
pub use self::integer::{Enumerated, Integer};
pub use self::null::Null;
pub use self::octetstring::OctetString;
pub use self::sequence::{Sequence, Set};

pub trait ASNTag {
    /// Encode yourself into a generic tag format.
    ///
    /// The only thing that changes between types is how the wrapped value
    /// becomes payload bytes; class and id are encoded uniformly. By first
    /// lowering into a generic tag with an already-encoded payload, the
    /// writer never needs per-type logic.
    fn into_structure(self) -> structure::StructureTag;
}

/// The ASN.1 types needed for LDAPv3, not the full universal set.
#[derive(Clone, Debug, PartialEq)]
pub enum Tag {
    Boolean(boolean::Boolean),
    Integer(integer::Integer),
    Enumerated(integer::Enumerated),
    OctetString(octetstring::OctetString),
    Null(null::Null),
    Sequence(sequence::Sequence),
    Set(sequence::Set),
    ExplicitTag(explicit::ExplicitTag),
    StructureTag(structure::StructureTag),
}

impl ASNTag for Tag {
    fn into_structure(self) -> structure::StructureTag {
        match self {
            Tag::Boolean(i) => i.into_structure(),
            Tag::Integer(i) => i.into_structure(),
            Tag::Enumerated(i) => i.into_structure(),
            Tag::OctetString(i) => i.into_structure(),
            Tag::Null(i) => i.into_structure(),
            Tag::Sequence(i) => i.into_structure(),
            Tag::Set(i) => i.into_structure(),
            Tag::ExplicitTag(i) => i.into_structure(),
            Tag::StructureTag(s) => s,
        }
    }
}
