//! A codec for the subset of ASN.1 BER used by LDAPv3.
//!
//! The crate deals in [`StructureTag`](structure/struct.StructureTag.html)s,
//! a generic tag/class/payload representation of one BER element. Typed
//! builders in [`structures`](structures/index.html) construct outgoing
//! elements, [`parse`](parse/index.html) decodes incoming bytes, and
//! [`write`](write/index.html) serializes a structure into a buffer.
//!
//! Only definite-length encodings are supported; LDAP forbids the
//! indefinite form, and the parser rejects it.

pub mod common;
pub mod parse;
pub mod structure;
pub mod structures;
pub mod universal;
pub mod write;
