//! BER serialization.

use std::io;

use bytes::{BufMut, BytesMut};

use crate::common::{TagClass, TagStructure};
use crate::structure::{PL, StructureTag};

/// Serialize a structure into `buf`.
///
/// Content lengths at or below 127 use the short form; longer payloads
/// get the minimal long form.
pub fn encode_into(buf: &mut BytesMut, tag: StructureTag) -> io::Result<()> {
    match tag.payload {
        PL::P(content) => {
            write_header(
                buf,
                tag.class,
                TagStructure::Primitive,
                tag.id,
                content.len(),
            )?;
            buf.put_slice(&content);
        }
        PL::C(children) => {
            let mut inner = BytesMut::new();
            for child in children {
                encode_into(&mut inner, child)?;
            }
            write_header(
                buf,
                tag.class,
                TagStructure::Constructed,
                tag.id,
                inner.len(),
            )?;
            buf.unsplit(inner);
        }
    }
    Ok(())
}

fn write_header(
    buf: &mut BytesMut,
    class: TagClass,
    structure: TagStructure,
    id: u64,
    len: usize,
) -> io::Result<()> {
    if id > 30 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "tag number does not fit the low-tag-number form",
        ));
    }
    buf.put_u8((class as u8) << 6 | (structure as u8) << 5 | id as u8);
    if len <= 127 {
        buf.put_u8(len as u8);
    } else {
        let mut width = 0u8;
        let mut rem = len;
        while rem > 0 {
            width += 1;
            rem >>= 8;
        }
        buf.put_u8(0x80 | width);
        for shift in (0..width).rev() {
            buf.put_u8((len >> (8 * shift as usize)) as u8);
        }
    }
    Ok(())
}
