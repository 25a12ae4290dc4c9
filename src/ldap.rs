//! The user-facing operation handle.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time;

use ber::structures::Tag;

use crate::conn::MiscCommand;
use crate::controls::Control;
use crate::exop::Exop;
use crate::protocol::{LdapOp, LdapResultExt, MaybeControls, OpTuple};
use crate::result::{LdapError, LdapResult, Result};
use crate::search::SearchOptions;
use crate::RequestId;

/// Handle for performing operations on an open connection.
///
/// The handle is cheap to clone; every clone multiplexes its operations
/// over the same connection. Message ids are assigned at submission
/// time, under a mutex shared by all clones, so submission order defines
/// id order across the whole connection.
///
/// The `with_*` methods adjust only the next operation performed on the
/// handle they are called on.
#[derive(Clone, Debug)]
pub struct Ldap {
    pub(crate) msgmap: Arc<Mutex<(RequestId, HashSet<RequestId>)>>,
    pub(crate) tx: mpsc::UnboundedSender<OpTuple>,
    pub(crate) misc_tx: mpsc::UnboundedSender<MiscCommand>,
    pub(crate) last_id: RequestId,
    pub(crate) timeout: Option<Duration>,
    pub(crate) controls: MaybeControls,
    pub(crate) search_opts: Option<SearchOptions>,
}

impl Ldap {
    /// Reserve the next message id. Ids grow monotonically from 1 and
    /// wrap around at `i32::MAX`, skipping any id still in use.
    fn next_msgid(&mut self) -> RequestId {
        let mut msgmap = self.msgmap.lock().expect("msgmap mutex");
        let mut next = msgmap.0;
        loop {
            next = if next == RequestId::MAX { 1 } else { next + 1 };
            if !msgmap.1.contains(&next) {
                break;
            }
        }
        msgmap.0 = next;
        msgmap.1.insert(next);
        next
    }

    /// Submit one operation and, except for searches, wait for its
    /// terminating response.
    ///
    /// Result codes 0 (success), 5 (compareFalse) and 6 (compareTrue)
    /// resolve the call successfully; any other code is returned as an
    /// [`OperationFailed`](enum.LdapError.html#variant.OperationFailed)
    /// carrying the full result, so callers see the matched DN and the
    /// diagnostic message.
    pub(crate) async fn op_call(&mut self, op: LdapOp, req: Tag) -> Result<(LdapResult, Exop)> {
        let id = self.next_msgid();
        self.last_id = id;
        let (tx, rx) = oneshot::channel();
        self.tx
            .send((id, op, req, self.controls.take(), tx))
            .map_err(|_| LdapError::ConnectionClosed)?;
        let response = if let Some(timeout) = self.timeout.take() {
            match time::timeout(timeout, rx).await {
                Ok(response) => response,
                Err(_) => {
                    // forget the op so its id can be reused
                    let _ = self.misc_tx.send(MiscCommand::Scrub(id));
                    return Err(LdapError::Timeout);
                }
            }
        } else {
            rx.await
        };
        let (tag, ctrls) = response.map_err(|_| LdapError::ConnectionClosed)??;
        let LdapResultExt(mut result, exop) = LdapResultExt::from_tag(tag)?;
        result.ctrls = ctrls;
        match result.rc {
            0 | 5 | 6 => Ok((result, exop)),
            _ => Err(LdapError::OperationFailed { result }),
        }
    }

    /// Pass the provided request controls to the next operation
    /// performed on this handle.
    pub fn with_controls(&mut self, ctrls: Vec<Control>) -> &mut Self {
        self.controls = Some(ctrls);
        self
    }

    /// Set the deadline for the next operation performed on this handle.
    ///
    /// If the response doesn't arrive in time, the call resolves with
    /// [`Timeout`](enum.LdapError.html#variant.Timeout) and the
    /// operation is forgotten locally. The server is not told; pair the
    /// deadline with [`abandon()`](#method.abandon) when that matters.
    pub fn with_timeout(&mut self, duration: Duration) -> &mut Self {
        self.timeout = Some(duration);
        self
    }

    /// Pass the provided options to the next search performed on this
    /// handle.
    pub fn with_search_options(&mut self, opts: SearchOptions) -> &mut Self {
        self.search_opts = Some(opts);
        self
    }

    /// Message id of the most recent operation submitted through this
    /// handle, for use with [`abandon()`](#method.abandon).
    pub fn last_id(&self) -> RequestId {
        self.last_id
    }

    /// Close the connection.
    ///
    /// With `immediate` set, the socket is destroyed at once and every
    /// in-flight operation resolves with
    /// [`ConnectionClosed`](enum.LdapError.html#variant.ConnectionClosed).
    /// Otherwise no further submissions are accepted, queued operations
    /// are still written out, and the call completes once the last
    /// pending response has been processed.
    pub async fn close(&mut self, immediate: bool) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.misc_tx
            .send(MiscCommand::Close { immediate, tx })
            .map_err(|_| LdapError::ConnectionClosed)?;
        rx.await.map_err(|_| LdapError::ConnectionClosed)
    }
}
