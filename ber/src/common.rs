#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TagStructure {
    Primitive = 0,
    Constructed = 1,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TagClass {
    Universal = 0,
    Application = 1,
    Context = 2,
    Private = 3,
}

impl TagStructure {
    pub fn from_bits(n: u8) -> TagStructure {
        match n & 0x01 {
            0 => TagStructure::Primitive,
            _ => TagStructure::Constructed,
        }
    }
}

impl TagClass {
    pub fn from_bits(n: u8) -> TagClass {
        match n & 0x03 {
            0 => TagClass::Universal,
            1 => TagClass::Application,
            2 => TagClass::Context,
            _ => TagClass::Private,
        }
    }
}
