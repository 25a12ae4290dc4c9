//! Search operation, result entries and the entry stream.

use std::collections::HashMap;

use tokio::sync::mpsc;

use ber::common::TagClass;
use ber::structure::StructureTag;
use ber::structures::{Boolean, Enumerated, Integer, OctetString, Sequence, Tag};

use crate::controls::Control;
use crate::filter::Filter;
use crate::ldap::Ldap;
use crate::protocol::{LdapOp, SearchItem, TAG_SEARCH_REF, TAG_SEARCH_REQ};
use crate::result::{LdapError, LdapResult, Result, SearchResult};

/// Search scope, RFC 4511 section 4.5.1.2.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scope {
    Base = 0,
    OneLevel = 1,
    Subtree = 2,
}

/// Alias dereferencing behavior, RFC 4511 section 4.5.1.3.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DerefAliases {
    Never = 0,
    InSearch = 1,
    FindingBaseObject = 2,
    Always = 3,
}

/// Additional parameters for a Search, beyond the always-present base,
/// scope and filter.
#[derive(Clone, Copy, Debug)]
pub struct SearchOptions {
    pub(crate) deref: DerefAliases,
    pub(crate) typesonly: bool,
    pub(crate) sizelimit: i32,
    pub(crate) timelimit: i32,
}

impl SearchOptions {
    pub fn new() -> SearchOptions {
        SearchOptions {
            ..Default::default()
        }
    }

    /// Set the alias dereferencing behavior.
    pub fn deref(mut self, d: DerefAliases) -> SearchOptions {
        self.deref = d;
        self
    }

    /// If `true`, entries contain attribute names without values.
    pub fn typesonly(mut self, typesonly: bool) -> SearchOptions {
        self.typesonly = typesonly;
        self
    }

    /// Maximum number of entries the server should return; zero means
    /// no client-requested limit.
    pub fn sizelimit(mut self, sizelimit: i32) -> SearchOptions {
        self.sizelimit = sizelimit;
        self
    }

    /// Maximum server-side search time in seconds; zero means no
    /// client-requested limit.
    pub fn timelimit(mut self, timelimit: i32) -> SearchOptions {
        self.timelimit = timelimit;
        self
    }
}

impl Default for SearchOptions {
    fn default() -> SearchOptions {
        SearchOptions {
            deref: DerefAliases::Never,
            typesonly: false,
            sizelimit: 0,
            timelimit: 0,
        }
    }
}

/// One raw element of a search result: an entry or a referral, together
/// with the controls returned on its PDU.
#[derive(Clone, Debug)]
pub struct ResultEntry(pub StructureTag, pub Vec<Control>);

impl ResultEntry {
    /// Does the element represent a referral rather than an entry?
    pub fn is_ref(&self) -> bool {
        self.0.id == TAG_SEARCH_REF
    }
}

/// Parsed search result entry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchEntry {
    /// Entry DN.
    pub dn: String,
    /// Attributes with all values valid UTF-8.
    pub attrs: HashMap<String, Vec<String>>,
    /// Attributes with at least one value which wasn't valid UTF-8.
    pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl SearchEntry {
    /// Parse a raw result element into an entry.
    ///
    /// An attribute value which isn't valid UTF-8 moves the whole
    /// attribute into `bin_attrs`.
    pub fn construct(re: ResultEntry) -> Result<SearchEntry> {
        let mut components = re
            .0
            .expect_constructed()
            .ok_or(LdapError::MalformedPDU)?
            .into_iter();
        let dn = String::from_utf8(
            components
                .next()
                .and_then(|t| t.expect_primitive())
                .ok_or(LdapError::MalformedPDU)?,
        )?;
        let mut attrs = HashMap::new();
        let mut bin_attrs: HashMap<String, Vec<Vec<u8>>> = HashMap::new();
        let attr_seq = components
            .next()
            .and_then(|t| t.expect_constructed())
            .ok_or(LdapError::MalformedPDU)?;
        for attr in attr_seq {
            let mut parts = attr
                .expect_constructed()
                .ok_or(LdapError::MalformedPDU)?
                .into_iter();
            let name = String::from_utf8(
                parts
                    .next()
                    .and_then(|t| t.expect_primitive())
                    .ok_or(LdapError::MalformedPDU)?,
            )?;
            let values = parts
                .next()
                .and_then(|t| t.expect_constructed())
                .ok_or(LdapError::MalformedPDU)?;
            let mut strings = Vec::with_capacity(values.len());
            let mut binary = false;
            let mut bytes_values = Vec::new();
            for value in values {
                let bytes = value.expect_primitive().ok_or(LdapError::MalformedPDU)?;
                bytes_values.push(bytes);
            }
            for bytes in &bytes_values {
                match std::str::from_utf8(bytes) {
                    Ok(s) if !binary => strings.push(s.to_owned()),
                    _ => binary = true,
                }
            }
            if binary {
                bin_attrs.insert(name, bytes_values);
            } else {
                attrs.insert(name, strings);
            }
        }
        Ok(SearchEntry {
            dn,
            attrs,
            bin_attrs,
        })
    }
}

/// Stream of search results, in server order.
///
/// Entries are pulled with [`next()`](#method.next) until it yields
/// `Ok(None)`, which means the terminating `searchResultDone` has been
/// processed; [`finish()`](#method.finish) then produces the overall
/// result. The final result's controls are those returned on the
/// terminating PDU.
pub struct SearchStream {
    rx: mpsc::UnboundedReceiver<Result<(SearchItem, Vec<Control>)>>,
    result: Option<LdapResult>,
    finished: bool,
}

impl SearchStream {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<Result<(SearchItem, Vec<Control>)>>,
    ) -> SearchStream {
        SearchStream {
            rx,
            result: None,
            finished: false,
        }
    }

    /// Fetch the next entry or referral.
    ///
    /// Returns `Ok(None)` when the stream terminates regularly. A
    /// connection teardown or a local abandon surfaces here as the
    /// corresponding error.
    pub async fn next(&mut self) -> Result<Option<ResultEntry>> {
        if self.finished {
            return Ok(None);
        }
        match self.rx.recv().await {
            None => {
                self.finished = true;
                Err(LdapError::ConnectionClosed)
            }
            Some(Err(e)) => {
                self.finished = true;
                Err(e)
            }
            Some(Ok((SearchItem::Entry(tag) | SearchItem::Referral(tag), ctrls))) => {
                Ok(Some(ResultEntry(tag, ctrls)))
            }
            Some(Ok((SearchItem::Done(mut result), ctrls))) => {
                result.ctrls = ctrls;
                self.result = Some(result);
                self.finished = true;
                Ok(None)
            }
        }
    }

    /// Drain the remainder of the stream and return the overall search
    /// result.
    pub async fn finish(mut self) -> Result<LdapResult> {
        while !self.finished {
            self.next().await?;
        }
        self.result.take().ok_or(LdapError::ConnectionClosed)
    }
}

impl Ldap {
    /// Perform a Search, returning all matching entries at once together
    /// with the overall result.
    ///
    /// For result sets of unbounded size, prefer
    /// [`streaming_search()`](#method.streaming_search).
    pub async fn search<S: AsRef<str>>(
        &mut self,
        base: &str,
        scope: Scope,
        filter: Filter,
        attrs: Vec<S>,
    ) -> Result<SearchResult> {
        let mut stream = self.streaming_search(base, scope, filter, attrs).await?;
        let mut entries = Vec::new();
        while let Some(entry) = stream.next().await? {
            entries.push(entry);
        }
        let result = stream.finish().await?;
        Ok(SearchResult(entries, result))
    }

    /// Perform a Search, returning a stream of entries.
    ///
    /// The returned handle is available as soon as the request is
    /// queued; entries arrive in server order as the server produces
    /// them.
    pub async fn streaming_search<S: AsRef<str>>(
        &mut self,
        base: &str,
        scope: Scope,
        filter: Filter,
        attrs: Vec<S>,
    ) -> Result<SearchStream> {
        let opts = self.search_opts.take().unwrap_or_default();
        let req = Tag::Sequence(Sequence {
            id: TAG_SEARCH_REQ,
            class: TagClass::Application,
            inner: vec![
                Tag::OctetString(OctetString {
                    inner: Vec::from(base),
                    ..Default::default()
                }),
                Tag::Enumerated(Enumerated {
                    inner: scope as i64,
                    ..Default::default()
                }),
                Tag::Enumerated(Enumerated {
                    inner: opts.deref as i64,
                    ..Default::default()
                }),
                Tag::Integer(Integer {
                    inner: opts.sizelimit as i64,
                    ..Default::default()
                }),
                Tag::Integer(Integer {
                    inner: opts.timelimit as i64,
                    ..Default::default()
                }),
                Tag::Boolean(Boolean {
                    inner: opts.typesonly,
                    ..Default::default()
                }),
                filter.into_tag()?,
                Tag::Sequence(Sequence {
                    inner: attrs
                        .into_iter()
                        .map(|s| {
                            Tag::OctetString(OctetString {
                                inner: Vec::from(s.as_ref()),
                                ..Default::default()
                            })
                        })
                        .collect(),
                    ..Default::default()
                }),
            ],
        });

        let (item_tx, item_rx) = mpsc::unbounded_channel();
        self.op_call(LdapOp::Search(item_tx), req).await?;
        Ok(SearchStream::new(item_rx))
    }
}
