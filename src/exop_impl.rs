mod passmod;

pub use self::passmod::{PASSMOD_OID, PasswordModify, PasswordModifyResp};
