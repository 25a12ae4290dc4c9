//! An asynchronous LDAP client library.
//!
//! The library implements the client side of LDAPv3 (RFC 4511) over TCP
//! or TLS: Bind, Search, Add, Delete, Modify, ModifyDN, Compare, Abandon
//! and Extended operations, multiplexed over one connection and matched
//! to their responses by message id.
//!
//! Usage centers on two structs: [`LdapConnAsync`](struct.LdapConnAsync.html),
//! the connection itself, which must be spawned on a Tokio executor, and
//! the cheaply cloneable [`Ldap`](struct.Ldap.html) handle through which
//! operations are performed:
//!
//! ```rust,no_run
//! use ldapmux::{Filter, LdapConnAsync, Result, Scope, SearchEntry};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (conn, mut ldap) = LdapConnAsync::new("ldap://localhost:2389").await?;
//!     ldapmux::drive!(conn);
//!     ldap.simple_bind("cn=admin,dc=example,dc=com", "secret").await?;
//!     let (entries, _res) = ldap
//!         .search(
//!             "dc=example,dc=com",
//!             Scope::Subtree,
//!             Filter::Equality("cn".into(), "alice".into()),
//!             vec!["cn", "uid"],
//!         )
//!         .await?
//!         .success()?;
//!     for entry in entries {
//!         println!("{:?}", SearchEntry::construct(entry)?);
//!     }
//!     ldap.unbind().await
//! }
//! ```
//!
//! A blocking facade over the same machinery is available as
//! [`LdapConn`](struct.LdapConn.html).

pub use ber;
pub use log;

mod abandon;
mod add;
mod bind;
mod compare;
mod conn;
mod controls;
mod delete;
mod exop;
mod exop_impl;
mod extended;
mod filter;
mod ldap;
mod modify;
mod modifydn;
mod protocol;
mod result;
mod search;
mod sync;
mod unbind;
mod util;

/// Message id of an LDAP operation, unique on an open connection.
pub type RequestId = i32;

pub use conn::{LdapConnAsync, LdapConnSettings};
pub use controls::Control;
pub use exop::{Exop, ExopParser};
pub use exop_impl::{PasswordModify, PasswordModifyResp, PASSMOD_OID};
pub use filter::{Filter, SubstringPart};
pub use ldap::Ldap;
pub use modify::Mod;
pub use result::{
    CompareResult, ExopResult, LdapError, LdapResult, Result, SearchResult,
};
pub use search::{
    DerefAliases, ResultEntry, Scope, SearchEntry, SearchOptions, SearchStream,
};
pub use sync::LdapConn;
pub use util::{dn_escape, ldap_escape};
