//! Connection manager: socket lifecycle and the protocol loop.
//!
//! [`LdapConnAsync`](struct.LdapConnAsync.html) owns the socket and all
//! protocol state. Operations are submitted through the cloneable
//! [`Ldap`](struct.Ldap.html) handle and travel to the connection task
//! over a channel; the task serializes them, matches responses back to
//! their submitters by message id, and enforces the ordering rules of
//! RFC 4511, most notably that nothing may be written while a Bind is
//! awaiting its response.

use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::io::{self, AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_util::codec::{Decoder, Framed};
use url::Url;

#[cfg(feature = "tls")]
use native_tls::TlsConnector;
#[cfg(feature = "tls")]
use tokio_native_tls::{TlsConnector as TokioTlsConnector, TlsStream};

use ber::common::TagClass;
use ber::structures::{Null, Tag};

use crate::controls::Control;
use crate::ldap::Ldap;
use crate::protocol::{
    ItemSender, LdapCodec, LdapOp, LdapResultExt, MaybeControls, OpTuple, ResultSender,
    SearchItem, TAG_ADD_RESP, TAG_BIND_REQ, TAG_BIND_RESP, TAG_COMPARE_RESP, TAG_DEL_RESP,
    TAG_EXTENDED_RESP, TAG_INTERMEDIATE_RESP, TAG_MODDN_RESP, TAG_MODIFY_RESP, TAG_SEARCH_DONE,
    TAG_SEARCH_ENTRY, TAG_SEARCH_REF,
};
use crate::result::{LdapError, Result};
use crate::RequestId;

/// Cadence of the drain re-check while a graceful close waits for
/// in-flight work.
const DRAIN_CHECK_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug)]
enum ConnType {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(TlsStream<TcpStream>),
}

impl AsyncRead for ConnType {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnType::Tcp(ts) => Pin::new(ts).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            ConnType::Tls(tls) => Pin::new(tls).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnType {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ConnType::Tcp(ts) => Pin::new(ts).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            ConnType::Tls(tls) => Pin::new(tls).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnType::Tcp(ts) => Pin::new(ts).poll_flush(cx),
            #[cfg(feature = "tls")]
            ConnType::Tls(tls) => Pin::new(tls).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnType::Tcp(ts) => Pin::new(ts).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            ConnType::Tls(tls) => Pin::new(tls).poll_shutdown(cx),
        }
    }
}

/// Additional settings for an LDAP connection.
///
/// The structure is opaque for better extensibility. An instance with
/// default values is constructed by [`new()`](#method.new), and all
/// available settings can be replaced through a builder-like interface,
/// by calling the appropriate functions.
#[derive(Clone, Default)]
pub struct LdapConnSettings {
    conn_timeout: Option<Duration>,
    #[cfg(feature = "tls")]
    connector: Option<TlsConnector>,
    #[cfg(feature = "tls")]
    no_tls_verify: bool,
    lenient_unsolicited: bool,
}

impl LdapConnSettings {
    /// Create an instance of the structure with default settings.
    pub fn new() -> LdapConnSettings {
        LdapConnSettings {
            ..Default::default()
        }
    }

    /// Set the connection timeout. If a connection to the server can't
    /// be established before the timeout expires, an error will be
    /// returned to the user. Defaults to `None`, meaning an infinite
    /// timeout.
    pub fn set_conn_timeout(mut self, timeout: Duration) -> Self {
        self.conn_timeout = Some(timeout);
        self
    }

    #[cfg(feature = "tls")]
    /// Set a custom TLS connector, which enables setting various options
    /// when establishing a secure connection. The default of `None` will
    /// use a connector with default settings.
    pub fn set_connector(mut self, connector: TlsConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    #[cfg(feature = "tls")]
    /// If `true`, try to establish a TLS connection without certificate
    /// or hostname verification. Defaults to `false`; enabling it is
    /// logged as a warning when the connection is opened.
    pub fn set_no_tls_verify(mut self, no_tls_verify: bool) -> Self {
        self.no_tls_verify = no_tls_verify;
        self
    }

    /// If `true`, a response bearing a message id with no pending
    /// operation is logged and dropped. Defaults to `false`, where such
    /// a response is a protocol error which tears the connection down.
    pub fn set_lenient_unsolicited(mut self, lenient: bool) -> Self {
        self.lenient_unsolicited = lenient;
        self
    }
}

pub(crate) enum MiscCommand {
    /// Forget an operation: drop its pending entry, unqueue it if it
    /// hasn't been flushed, and free its message id.
    Scrub(RequestId),
    /// Close the connection, immediately or after draining.
    Close {
        immediate: bool,
        tx: oneshot::Sender<()>,
    },
}

/// An operation whose id has been assigned but whose bytes have not yet
/// reached the socket.
struct Outbound {
    id: RequestId,
    op: LdapOp,
    tag: Tag,
    controls: MaybeControls,
    tx: Option<ResultSender>,
}

/// An operation whose bytes are on the wire and whose terminating
/// response hasn't been processed yet.
enum Pending {
    Single { tx: ResultSender, started: Instant },
    Stream { tx: ItemSender, started: Instant },
}

/// Asynchronous connection to an LDAP server.
///
/// Opening a connection with [`new()`](#method.new) returns a tuple of
/// the connection itself and an [`Ldap`](struct.Ldap.html) handle for
/// performing operations. The connection must be spawned on the active
/// Tokio executor before the handle is used. A convenience macro,
/// [`drive!`](../macro.drive.html), is provided by the library. For the
/// connection `conn`, it does the equivalent of:
///
/// ```rust,no_run
/// # use ldapmux::LdapConnAsync;
/// # use log::warn;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// # let (conn, _ldap) = LdapConnAsync::new("ldap://localhost:2389").await.unwrap();
/// tokio::spawn(async move {
///     if let Err(e) = conn.drive().await {
///         warn!("LDAP connection error: {}", e);
///     }
/// });
/// # }
/// ```
///
/// The `Ldap` handle can be freely cloned, with each clone capable of
/// launching a separate LDAP operation multiplexed on the original
/// connection. Dropping the last handle while no operation is in flight
/// closes the connection.
pub struct LdapConnAsync {
    msgmap: Arc<Mutex<(RequestId, HashSet<RequestId>)>>,
    pending: HashMap<RequestId, Pending>,
    queue: VecDeque<Outbound>,
    bind_pending: bool,
    closing: Option<oneshot::Sender<()>>,
    unbound: bool,
    rx_done: bool,
    misc_done: bool,
    lenient_unsolicited: bool,
    rx: mpsc::UnboundedReceiver<OpTuple>,
    misc_rx: mpsc::UnboundedReceiver<MiscCommand>,
    stream: Framed<ConnType, LdapCodec>,
}

/// Drive the connection until its completion.
///
/// See the introduction of [LdapConnAsync](struct.LdapConnAsync.html)
/// for the exact code produced by the macro.
#[macro_export]
macro_rules! drive {
    ($conn:expr) => {
        tokio::spawn(async move {
            if let Err(e) = $conn.drive().await {
                $crate::log::warn!("LDAP connection error: {}", e);
            }
        });
    };
}

impl LdapConnAsync {
    /// Open a connection to an LDAP server specified by `url`.
    ///
    /// The `url` is an LDAP URL. The __ldap__ scheme, which uses a plain
    /// TCP connection on default port 389, is always available. With the
    /// __tls__ feature, the __ldaps__ scheme (default port 636) is
    /// additionally supported.
    ///
    /// The connection element of the returned tuple must be spawned on
    /// the current Tokio executor before using the `Ldap` element. See
    /// the introduction to this struct's documentation.
    pub async fn new(url: &str) -> Result<(Self, Ldap)> {
        Self::with_settings(LdapConnSettings::new(), url).await
    }

    /// Open a connection to an LDAP server specified by `url`, using
    /// `settings` to specify additional parameters.
    pub async fn with_settings(settings: LdapConnSettings, url: &str) -> Result<(Self, Ldap)> {
        let mut settings = settings;
        let timeout = settings.conn_timeout.take();
        let conn_future = LdapConnAsync::new_tcp(url, settings);
        if let Some(timeout) = timeout {
            match time::timeout(timeout, conn_future).await {
                Ok(res) => res,
                Err(_) => Err(LdapError::Timeout),
            }
        } else {
            conn_future.await
        }
    }

    #[allow(unused_mut)]
    async fn new_tcp(url: &str, mut settings: LdapConnSettings) -> Result<(Self, Ldap)> {
        let url = Url::parse(url)?;
        let mut port = 389;
        let scheme = match url.scheme() {
            s @ "ldap" => s,
            #[cfg(feature = "tls")]
            s @ "ldaps" => {
                port = 636;
                s
            }
            s => return Err(LdapError::UnknownScheme(String::from(s))),
        };
        if let Some(url_port) = url.port() {
            port = url_port;
        }
        let (_hostname, host_port) = match url.host_str() {
            Some(h) if !h.is_empty() => (h, format!("{}:{}", h, port)),
            _ => ("localhost", format!("localhost:{}", port)),
        };
        let stream = TcpStream::connect(host_port.as_str()).await?;
        let ctype = match scheme {
            "ldap" => ConnType::Tcp(stream),
            #[cfg(feature = "tls")]
            "ldaps" => {
                let connector = match settings.connector.take() {
                    Some(connector) => connector,
                    None => {
                        let mut builder = TlsConnector::builder();
                        if settings.no_tls_verify {
                            warn!("TLS certificate verification disabled by request");
                            builder.danger_accept_invalid_certs(true);
                            builder.danger_accept_invalid_hostnames(true);
                        }
                        builder.build()?
                    }
                };
                let tls_stream = TokioTlsConnector::from(connector)
                    .connect(_hostname, stream)
                    .await?;
                ConnType::Tls(tls_stream)
            }
            _ => return Err(LdapError::UnknownScheme(String::from(scheme))),
        };
        Ok(Self::conn_pair(ctype, settings))
    }

    fn conn_pair(ctype: ConnType, settings: LdapConnSettings) -> (Self, Ldap) {
        let codec = LdapCodec;
        let (tx, rx) = mpsc::unbounded_channel();
        let (misc_tx, misc_rx) = mpsc::unbounded_channel();
        let msgmap = Arc::new(Mutex::new((0, HashSet::new())));
        let conn = LdapConnAsync {
            msgmap: msgmap.clone(),
            pending: HashMap::new(),
            queue: VecDeque::new(),
            bind_pending: false,
            closing: None,
            unbound: false,
            rx_done: false,
            misc_done: false,
            lenient_unsolicited: settings.lenient_unsolicited,
            rx,
            misc_rx,
            stream: codec.framed(ctype),
        };
        let ldap = Ldap {
            msgmap,
            tx,
            misc_tx,
            last_id: 0,
            timeout: None,
            controls: None,
            search_opts: None,
        };
        (conn, ldap)
    }

    /// Repeatedly poll the connection until it exits.
    ///
    /// On exit, regular or errored, every operation still in the
    /// outbound queue or the pending map is resolved with
    /// [`ConnectionClosed`](enum.LdapError.html#variant.ConnectionClosed).
    pub async fn drive(mut self) -> Result<()> {
        let res = self.turn().await;
        self.shutdown();
        res
    }

    async fn turn(&mut self) -> Result<()> {
        let mut drain_tick = time::interval(DRAIN_CHECK_INTERVAL);
        loop {
            tokio::select! {
                cmd = self.misc_rx.recv(), if !self.misc_done => match cmd {
                    Some(MiscCommand::Scrub(id)) => {
                        self.pending.remove(&id);
                        self.queue.retain(|out| out.id != id);
                        self.scrub_id(id);
                    }
                    Some(MiscCommand::Close { immediate, tx }) => {
                        if immediate {
                            if let Err(e) = self.stream.close().await {
                                warn!("socket shutdown error: {}", e);
                            }
                            let _ = tx.send(());
                            return Ok(());
                        }
                        debug!("draining connection before close");
                        self.closing = Some(tx);
                        self.flush().await?;
                    }
                    None => self.misc_done = true,
                },
                op_tuple = self.rx.recv(), if !self.rx_done => match op_tuple {
                    Some((id, op, tag, controls, tx)) => {
                        self.enqueue(id, op, tag, controls, tx);
                        self.flush().await?;
                        if self.unbound {
                            return Ok(());
                        }
                    }
                    None => self.rx_done = true,
                },
                resp = self.stream.next() => {
                    let (id, tag, controls) = match resp {
                        None => {
                            if self.pending.is_empty() && self.queue.is_empty() {
                                return Ok(());
                            }
                            warn!("server closed the connection with operations in flight");
                            return Err(LdapError::ConnectionClosed);
                        }
                        Some(Err(e)) => {
                            warn!("socket receive error: {}", e);
                            return Err(e);
                        }
                        Some(Ok(resp)) => resp,
                    };
                    self.route(id, tag, controls).await?;
                },
                _ = drain_tick.tick() => {
                    if self.closing.is_some() {
                        self.flush().await?;
                    }
                },
            }
            if self.closing.is_some() && self.drained() {
                return self.finish_close().await;
            }
            if self.rx_done && self.closing.is_none() && self.drained() {
                // last handle gone, nothing in flight
                if let Err(e) = self.stream.close().await {
                    warn!("socket shutdown error: {}", e);
                }
                return Ok(());
            }
        }
    }

    fn enqueue(
        &mut self,
        id: RequestId,
        op: LdapOp,
        tag: Tag,
        controls: MaybeControls,
        tx: ResultSender,
    ) {
        if self.closing.is_some() || self.unbound {
            // submissions after close are rejected; dropping the sender
            // resolves the submitter with ConnectionClosed
            self.scrub_id(id);
            return;
        }
        let tx = match op {
            // a search hands its stream back right away; later failures
            // surface through the item channel
            LdapOp::Search(_) => {
                let _ = tx.send(Ok((Tag::Null(Null::default()), vec![])));
                None
            }
            _ => Some(tx),
        };
        self.queue.push_back(Outbound {
            id,
            op,
            tag,
            controls,
            tx,
        });
    }

    /// Write out queued operations, stopping at the bind gate.
    async fn flush(&mut self) -> Result<()> {
        while !self.bind_pending {
            let out = match self.queue.pop_front() {
                Some(out) => out,
                None => break,
            };
            let Outbound {
                id,
                op,
                tag,
                controls,
                tx,
            } = out;
            let is_bind = matches!(&tag, Tag::Sequence(seq)
                if seq.class == TagClass::Application && seq.id == TAG_BIND_REQ);
            if let Err(e) = self.stream.send((id, tag, controls)).await {
                warn!("socket send error: {}", e);
                return Err(e);
            }
            match op {
                LdapOp::Single => {
                    if let Some(tx) = tx {
                        self.pending.insert(
                            id,
                            Pending::Single {
                                tx,
                                started: Instant::now(),
                            },
                        );
                    }
                    if is_bind {
                        debug!("bind in flight, outbound queue gated");
                        self.bind_pending = true;
                    }
                }
                LdapOp::Search(item_tx) => {
                    self.pending.insert(
                        id,
                        Pending::Stream {
                            tx: item_tx,
                            started: Instant::now(),
                        },
                    );
                }
                LdapOp::Abandon(target) => {
                    match self.pending.remove(&target) {
                        Some(Pending::Single { tx: target_tx, .. }) => {
                            let _ = target_tx.send(Err(LdapError::Abandoned));
                        }
                        Some(Pending::Stream { tx: target_tx, .. }) => {
                            let _ = target_tx.send(Err(LdapError::Abandoned));
                        }
                        None => (),
                    }
                    self.scrub_id(target);
                    // an Abandon expects no response, so its own id is
                    // free again the moment its bytes are out
                    self.scrub_id(id);
                    if let Some(tx) = tx {
                        let _ = tx.send(Ok((Tag::Null(Null::default()), vec![])));
                    }
                }
                LdapOp::Unbind => {
                    if let Err(e) = self.stream.close().await {
                        warn!("socket shutdown error: {}", e);
                        return Err(e);
                    }
                    if let Some(tx) = tx {
                        let _ = tx.send(Ok((Tag::Null(Null::default()), vec![])));
                    }
                    self.unbound = true;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Hand one inbound protocol op to the operation waiting for it.
    async fn route(&mut self, id: RequestId, tag: Tag, controls: Vec<Control>) -> Result<()> {
        if id == 0 {
            // connection-wide notice, e.g. Notice of Disconnection
            debug!("unsolicited notification received and dropped");
            return Ok(());
        }
        let protoop = match tag {
            Tag::StructureTag(t) => t,
            _ => return Err(LdapError::MalformedPDU),
        };
        let is_stream = matches!(self.pending.get(&id), Some(Pending::Stream { .. }));
        if is_stream {
            match protoop.id {
                TAG_SEARCH_ENTRY | TAG_SEARCH_REF => {
                    let item = if protoop.id == TAG_SEARCH_ENTRY {
                        SearchItem::Entry(protoop)
                    } else {
                        SearchItem::Referral(protoop)
                    };
                    let mut consumer_gone = false;
                    if let Some(Pending::Stream { tx, .. }) = self.pending.get(&id) {
                        consumer_gone = tx.send(Ok((item, controls))).is_err();
                    }
                    if consumer_gone {
                        warn!("search consumer dropped, scrubbing op {}", id);
                        self.pending.remove(&id);
                        self.scrub_id(id);
                    }
                }
                TAG_SEARCH_DONE => {
                    let result = LdapResultExt::from_tag(Tag::StructureTag(protoop))?.0;
                    if let Some(Pending::Stream { tx, started }) = self.pending.remove(&id) {
                        debug!("search {} done in {:?}", id, started.elapsed());
                        let _ = tx.send(Ok((SearchItem::Done(result), controls)));
                    }
                    self.scrub_id(id);
                }
                TAG_INTERMEDIATE_RESP => {
                    debug!("dropping intermediate response for search {}", id);
                }
                _ => return Err(LdapError::MalformedPDU),
            }
            return Ok(());
        }
        if self.pending.contains_key(&id) {
            match protoop.id {
                TAG_BIND_RESP | TAG_MODIFY_RESP | TAG_ADD_RESP | TAG_DEL_RESP | TAG_MODDN_RESP
                | TAG_COMPARE_RESP | TAG_EXTENDED_RESP => (),
                TAG_INTERMEDIATE_RESP => {
                    debug!("intermediate response for op {}, leaving it pending", id);
                    return Ok(());
                }
                _ => return Err(LdapError::MalformedPDU),
            }
            let is_bind_resp = protoop.id == TAG_BIND_RESP;
            if let Some(Pending::Single { tx, started }) = self.pending.remove(&id) {
                debug!("op {} completed in {:?}", id, started.elapsed());
                if tx.send(Ok((Tag::StructureTag(protoop), controls))).is_err() {
                    warn!("ldap result send error, op={}", id);
                }
            }
            self.scrub_id(id);
            if is_bind_resp && self.bind_pending {
                self.bind_pending = false;
                self.flush().await?;
            }
            return Ok(());
        }
        if self.lenient_unsolicited {
            warn!("unsolicited response for message id {}, dropping", id);
            Ok(())
        } else {
            Err(LdapError::UnsolicitedResponse(id))
        }
    }

    fn drained(&self) -> bool {
        self.queue.is_empty() && self.pending.is_empty()
    }

    async fn finish_close(&mut self) -> Result<()> {
        debug!("connection drained, closing");
        if let Err(e) = self.stream.close().await {
            warn!("socket shutdown error: {}", e);
        }
        if let Some(tx) = self.closing.take() {
            let _ = tx.send(());
        }
        Ok(())
    }

    fn scrub_id(&mut self, id: RequestId) {
        let mut msgmap = self.msgmap.lock().expect("msgmap mutex");
        msgmap.1.remove(&id);
    }

    /// Resolve everything still outstanding with `ConnectionClosed`.
    fn shutdown(&mut self) {
        for out in self.queue.drain(..) {
            if let LdapOp::Search(item_tx) = out.op {
                let _ = item_tx.send(Err(LdapError::ConnectionClosed));
            }
            if let Some(tx) = out.tx {
                let _ = tx.send(Err(LdapError::ConnectionClosed));
            }
        }
        for (_, pending) in self.pending.drain() {
            match pending {
                Pending::Single { tx, .. } => {
                    let _ = tx.send(Err(LdapError::ConnectionClosed));
                }
                Pending::Stream { tx, .. } => {
                    let _ = tx.send(Err(LdapError::ConnectionClosed));
                }
            }
        }
        let mut msgmap = self.msgmap.lock().expect("msgmap mutex");
        msgmap.1.clear();
    }
}
