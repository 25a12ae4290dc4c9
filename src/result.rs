//! Operation result structures and the crate error type.
//!
//! Most LDAP operations return an [`LdapResult`](struct.LdapResult.html).
//! This module contains its definition, the wrapper structs for compare,
//! search and extended operations, and the [`LdapError`](enum.LdapError.html)
//! enum which all fallible calls in the crate return.

use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::io;

use crate::controls::Control;
use crate::exop::Exop;
use crate::search::ResultEntry;
use crate::RequestId;

use thiserror::Error as ThisError;

/// Type alias for the result of fallible operations in this crate.
pub type Result<T> = std::result::Result<T, LdapError>;

/// Error variants recognized by the crate.
#[derive(Debug, ThisError)]
pub enum LdapError {
    /// Transport-level I/O error. Fatal to the connection.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// A TLV in the byte stream could not be decoded. The stream cannot
    /// be re-synchronized after this; the connection is torn down.
    #[error("malformed BER element in the byte stream")]
    MalformedBER,

    /// A complete BER element was not a well-formed LDAPMessage.
    #[error("malformed LDAPMessage PDU")]
    MalformedPDU,

    /// A response arrived for a message id with no pending operation.
    #[error("unsolicited response for message id {0}")]
    UnsolicitedResponse(RequestId),

    /// The connection is closed, or was closed while the operation was
    /// in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation was resolved locally by an Abandon request.
    #[error("operation abandoned")]
    Abandoned,

    /// The per-operation deadline expired before the response arrived.
    #[error("timed out waiting for a response")]
    Timeout,

    /// A request could not be expressed on the wire.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// The server returned a non-success result code for a
    /// single-response operation.
    #[error("LDAP operation failed: {result}")]
    OperationFailed { result: LdapResult },

    /// Error while parsing an LDAP URL.
    #[error("error parsing LDAP URL: {source}")]
    UrlParsing {
        #[from]
        source: url::ParseError,
    },

    /// Unknown LDAP URL scheme.
    #[error("unknown LDAP URL scheme: {0}")]
    UnknownScheme(String),

    /// A value that must be UTF-8 wasn't.
    #[error("response value not valid UTF-8: {source}")]
    DecodingUTF8 {
        #[from]
        source: std::string::FromUtf8Error,
    },

    /// TLS setup or handshake error.
    #[cfg(feature = "tls")]
    #[error("TLS error: {source}")]
    Tls {
        #[from]
        source: native_tls::Error,
    },
}

/// Common components of an LDAP operation result.
///
/// This structure faithfully replicates the components dictated by the
/// standard, and is distinctly C-like with its reliance on numeric codes
/// for the indication of outcome. The struct implements helper methods,
/// [`success()`](#method.success) and [`non_error()`](#method.non_error),
/// which may be used for ergonomic handling when simple condition
/// checking suffices.
#[derive(Clone, Debug)]
pub struct LdapResult {
    /// Result code.
    ///
    /// Generally, the value of zero indicates successful completion, but
    /// there's a number of other non-error codes arising as a result of
    /// various operations. See
    /// [Section A.1 of RFC 4511](https://tools.ietf.org/html/rfc4511#appendix-A.1).
    pub rc: u32,
    /// Matched component DN, where applicable.
    pub matched: String,
    /// Additional diagnostic text.
    pub text: String,
    /// Referrals.
    pub refs: Vec<HashSet<String>>,
    /// Response controls.
    ///
    /// Missing and empty controls are both represented by an empty
    /// vector.
    pub ctrls: Vec<Control>,
}

impl LdapResult {
    pub(crate) fn empty_success() -> LdapResult {
        LdapResult {
            rc: 0,
            matched: String::new(),
            text: String::new(),
            refs: Vec::new(),
            ctrls: Vec::new(),
        }
    }

    /// Name of the result code, per RFC 4511 Appendix A.
    pub fn result_text(&self) -> &'static str {
        match self.rc {
            0 => "success",
            1 => "operationsError",
            2 => "protocolError",
            3 => "timeLimitExceeded",
            4 => "sizeLimitExceeded",
            5 => "compareFalse",
            6 => "compareTrue",
            7 => "authMethodNotSupported",
            8 => "strongerAuthRequired",
            10 => "referral",
            11 => "adminLimitExceeded",
            12 => "unavailableCriticalExtension",
            13 => "confidentialityRequired",
            14 => "saslBindInProgress",
            16 => "noSuchAttribute",
            17 => "undefinedAttributeType",
            18 => "inappropriateMatching",
            19 => "constraintViolation",
            20 => "attributeOrValueExists",
            21 => "invalidAttributeSyntax",
            32 => "noSuchObject",
            33 => "aliasProblem",
            34 => "invalidDNSyntax",
            36 => "aliasDereferencingProblem",
            48 => "inappropriateAuthentication",
            49 => "invalidCredentials",
            50 => "insufficientAccessRights",
            51 => "busy",
            52 => "unavailable",
            53 => "unwillingToPerform",
            54 => "loopDetect",
            64 => "namingViolation",
            65 => "objectClassViolation",
            66 => "notAllowedOnNonLeaf",
            67 => "notAllowedOnRDN",
            68 => "entryAlreadyExists",
            69 => "objectClassModsProhibited",
            71 => "affectsMultipleDSAs",
            80 => "other",
            88 => "abandoned",
            _ => "unknown",
        }
    }

    /// If the result code is zero, return the instance itself wrapped in
    /// `Ok()`, otherwise wrap it in an
    /// [`OperationFailed`](enum.LdapError.html#variant.OperationFailed).
    pub fn success(self) -> Result<Self> {
        if self.rc == 0 {
            Ok(self)
        } else {
            Err(LdapError::OperationFailed { result: self })
        }
    }

    /// If the result code is 0 or 10 (referral), return the instance
    /// itself wrapped in `Ok()`, otherwise wrap it in an
    /// [`OperationFailed`](enum.LdapError.html#variant.OperationFailed).
    pub fn non_error(self) -> Result<Self> {
        if self.rc == 0 || self.rc == 10 {
            Ok(self)
        } else {
            Err(LdapError::OperationFailed { result: self })
        }
    }
}

impl Error for LdapResult {}

impl fmt::Display for LdapResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "rc={} ({}), dn: \"{}\", text: \"{}\"",
            self.rc,
            self.result_text(),
            self.matched,
            self.text
        )
    }
}

/// Wrapper for the result of a Search operation which returns all
/// entries at once.
#[derive(Clone, Debug)]
pub struct SearchResult(pub Vec<ResultEntry>, pub LdapResult);

impl SearchResult {
    /// If the result code is zero, return an anonymous tuple of component
    /// structs wrapped in `Ok()`, otherwise wrap the `LdapResult` part in
    /// an error.
    pub fn success(self) -> Result<(Vec<ResultEntry>, LdapResult)> {
        let result = self.1.success()?;
        Ok((self.0, result))
    }

    /// If the result code is 0 or 10 (referral), return an anonymous
    /// tuple of component structs wrapped in `Ok()`, otherwise wrap the
    /// `LdapResult` part in an error.
    pub fn non_error(self) -> Result<(Vec<ResultEntry>, LdapResult)> {
        let result = self.1.non_error()?;
        Ok((self.0, result))
    }
}

/// Wrapper for the result of a Compare operation.
///
/// Compare uniquely has two non-zero return codes to indicate the outcome
/// of a successful comparison, while other return codes indicate errors,
/// as usual (except 10 for referral). The [`equal()`](#method.equal)
/// method optimizes for the expected case of ignoring referrals;
/// [`non_error()`](#method.non_error) can be used when that's not
/// possible.
#[derive(Clone, Debug)]
pub struct CompareResult(pub LdapResult);

impl CompareResult {
    /// If the result code is 5 (compareFalse) or 6 (compareTrue), return
    /// the corresponding boolean value wrapped in `Ok()`, otherwise wrap
    /// the `LdapResult` part in an error.
    pub fn equal(self) -> Result<bool> {
        match self.0.rc {
            5 => Ok(false),
            6 => Ok(true),
            _ => Err(LdapError::OperationFailed { result: self.0 }),
        }
    }

    /// If the result code is 5 (compareFalse), 6 (compareTrue) or 10
    /// (referral), return the inner `LdapResult`, otherwise wrap it in
    /// an error.
    pub fn non_error(self) -> Result<LdapResult> {
        if self.0.rc == 5 || self.0.rc == 6 || self.0.rc == 10 {
            Ok(self.0)
        } else {
            Err(LdapError::OperationFailed { result: self.0 })
        }
    }
}

/// Wrapper for the result of an Extended operation.
#[derive(Clone, Debug)]
pub struct ExopResult(pub Exop, pub LdapResult);

impl ExopResult {
    /// If the result code is zero, return an anonymous tuple of component
    /// structs wrapped in `Ok()`, otherwise wrap the `LdapResult` part in
    /// an error.
    pub fn success(self) -> Result<(Exop, LdapResult)> {
        let result = self.1.success()?;
        Ok((self.0, result))
    }
}
