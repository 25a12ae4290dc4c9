use std::default;

use super::ASNTag;
use crate::common::TagClass;
use crate::structure;
use crate::universal;

/// Integer value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Integer {
    pub id: u64,
    pub class: TagClass,
    pub inner: i64,
}

/// Integer with a different universal tag.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Enumerated {
    pub id: u64,
    pub class: TagClass,
    pub inner: i64,
}

// BER integers are the shortest two's-complement encoding: leading
// octets that are pure sign extension get stripped, except where the
// following octet would then be read with the wrong sign.
fn int_payload(inner: i64) -> Vec<u8> {
    let octets = inner.to_be_bytes();
    let sign = if inner < 0 { 0xFF } else { 0x00 };
    let mut skip = 0;
    while skip + 1 < octets.len()
        && octets[skip] == sign
        && (octets[skip + 1] ^ sign) & 0x80 == 0
    {
        skip += 1;
    }
    octets[skip..].to_vec()
}

impl ASNTag for Integer {
    fn into_structure(self) -> structure::StructureTag {
        structure::StructureTag {
            id: self.id,
            class: self.class,
            payload: structure::PL::P(int_payload(self.inner)),
        }
    }
}

impl ASNTag for Enumerated {
    fn into_structure(self) -> structure::StructureTag {
        structure::StructureTag {
            id: self.id,
            class: self.class,
            payload: structure::PL::P(int_payload(self.inner)),
        }
    }
}

impl default::Default for Integer {
    fn default() -> Integer {
        Integer {
            id: universal::Types::Integer as u64,
            class: TagClass::Universal,
            inner: 0,
        }
    }
}

impl default::Default for Enumerated {
    fn default() -> Enumerated {
        Enumerated {
            id: universal::Types::Enumerated as u64,
            class: TagClass::Universal,
            inner: 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::int_payload;

    #[test]
    fn minimal_positive_encodings() {
        assert_eq!(int_payload(0), vec![0x00]);
        assert_eq!(int_payload(127), vec![0x7F]);
        // 128 needs a leading zero octet to stay positive
        assert_eq!(int_payload(128), vec![0x00, 0x80]);
        assert_eq!(int_payload(256), vec![0x01, 0x00]);
        assert_eq!(int_payload(i64::MAX).len(), 8);
    }

    #[test]
    fn negative_values_keep_their_sign_bit() {
        assert_eq!(int_payload(-1), vec![0xFF]);
        assert_eq!(int_payload(-128), vec![0x80]);
        assert_eq!(int_payload(-129), vec![0xFF, 0x7F]);
        assert_eq!(int_payload(i64::MIN).len(), 8);
    }
}
