//! End-to-end scenarios against an in-process mock LDAP server.
//!
//! The mock server speaks just enough BER to read request envelopes and
//! write back prebaked responses, which is all the scenarios need.

use std::collections::HashSet;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

use ldapmux::ber::common::TagClass;
use ldapmux::ber::parse::{parse_tag, parse_uint};
use ldapmux::ber::structure::StructureTag;
use ldapmux::ber::structures::{
    ASNTag, Enumerated, Integer, OctetString, Sequence, Set, Tag,
};
use ldapmux::ber::write;
use ldapmux::{
    Filter, LdapConn, LdapConnAsync, LdapConnSettings, LdapError, Mod, PasswordModify,
    PasswordModifyResp, RequestId, Scope, SearchEntry,
};

fn envelope(msgid: RequestId, op: Tag) -> Tag {
    Tag::Sequence(Sequence {
        inner: vec![
            Tag::Integer(Integer {
                inner: msgid as i64,
                ..Default::default()
            }),
            op,
        ],
        ..Default::default()
    })
}

struct MockServer {
    stream: TcpStream,
    buf: BytesMut,
}

impl MockServer {
    async fn accept(listener: TcpListener) -> MockServer {
        let (stream, _) = listener.accept().await.expect("accept");
        MockServer {
            stream,
            buf: BytesMut::new(),
        }
    }

    /// Read one request envelope, returning its message id and protocol
    /// op.
    async fn read_pdu(&mut self) -> (RequestId, StructureTag) {
        loop {
            match parse_tag(&self.buf[..]) {
                Ok((rest, tag)) => {
                    let consumed = self.buf.len() - rest.len();
                    let _ = self.buf.split_to(consumed);
                    let mut components = tag
                        .expect_constructed()
                        .expect("request envelope")
                        .into_iter();
                    let msgid_octets = components
                        .next()
                        .and_then(|t| t.expect_primitive())
                        .expect("message id");
                    let (_, msgid) = parse_uint(&msgid_octets).expect("uint");
                    let protoop = components.next().expect("protocol op");
                    return (msgid as RequestId, protoop);
                }
                Err(e) if e.is_incomplete() => {
                    let mut chunk = [0u8; 1024];
                    let n = self.stream.read(&mut chunk).await.expect("read");
                    assert!(n > 0, "peer closed while reading a PDU");
                    self.buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) => panic!("malformed PDU from client: {:?}", e),
            }
        }
    }

    /// Assert that nothing arrives on the socket for a little while.
    async fn expect_silence(&mut self) {
        let mut chunk = [0u8; 64];
        let res = timeout(Duration::from_millis(150), self.stream.read(&mut chunk)).await;
        assert!(res.is_err(), "unexpected bytes on the wire");
    }

    async fn send(&mut self, msgid: RequestId, op: Tag) {
        let mut buf = BytesMut::new();
        write::encode_into(&mut buf, envelope(msgid, op).into_structure()).expect("encoded");
        self.stream.write_all(&buf).await.expect("write");
    }
}

async fn start() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!(
        "ldap://127.0.0.1:{}",
        listener.local_addr().expect("local addr").port()
    );
    (listener, url)
}

fn result_op(tag_id: u64, rc: i64, matched: &str) -> Tag {
    Tag::Sequence(Sequence {
        id: tag_id,
        class: TagClass::Application,
        inner: vec![
            Tag::Enumerated(Enumerated {
                inner: rc,
                ..Default::default()
            }),
            Tag::OctetString(OctetString {
                inner: Vec::from(matched),
                ..Default::default()
            }),
            Tag::OctetString(OctetString {
                ..Default::default()
            }),
        ],
    })
}

fn entry_op(dn: &str, attrs: Vec<(&str, Vec<&str>)>) -> Tag {
    Tag::Sequence(Sequence {
        id: 4,
        class: TagClass::Application,
        inner: vec![
            Tag::OctetString(OctetString {
                inner: Vec::from(dn),
                ..Default::default()
            }),
            Tag::Sequence(Sequence {
                inner: attrs
                    .into_iter()
                    .map(|(name, vals)| {
                        Tag::Sequence(Sequence {
                            inner: vec![
                                Tag::OctetString(OctetString {
                                    inner: Vec::from(name),
                                    ..Default::default()
                                }),
                                Tag::Set(Set {
                                    inner: vals
                                        .into_iter()
                                        .map(|v| {
                                            Tag::OctetString(OctetString {
                                                inner: Vec::from(v),
                                                ..Default::default()
                                            })
                                        })
                                        .collect(),
                                    ..Default::default()
                                }),
                            ],
                            ..Default::default()
                        })
                    })
                    .collect(),
                ..Default::default()
            }),
        ],
    })
}

#[tokio::test]
async fn anonymous_bind_success() {
    let (listener, url) = start().await;
    let server = tokio::spawn(async move {
        let mut server = MockServer::accept(listener).await;
        let (id, op) = server.read_pdu().await;
        assert_eq!(op.id, 0);
        assert_eq!(id, 1);
        server.send(id, result_op(1, 0, "")).await;
    });

    let (conn, mut ldap) = LdapConnAsync::new(&url).await.expect("connect");
    ldapmux::drive!(conn);
    let res = ldap.simple_bind("", "").await.expect("bind");
    assert_eq!(res.rc, 0);
    server.await.expect("server");
}

#[tokio::test]
async fn bind_failure_carries_result() {
    let (listener, url) = start().await;
    let server = tokio::spawn(async move {
        let mut server = MockServer::accept(listener).await;
        let (id, _) = server.read_pdu().await;
        server.send(id, result_op(1, 49, "")).await;
    });

    let (conn, mut ldap) = LdapConnAsync::new(&url).await.expect("connect");
    ldapmux::drive!(conn);
    match ldap.simple_bind("cn=admin", "wrong").await {
        Err(LdapError::OperationFailed { result }) => {
            assert_eq!(result.rc, 49);
            assert_eq!(result.result_text(), "invalidCredentials");
        }
        other => panic!("expected invalidCredentials, got {:?}", other.map(|r| r.rc)),
    }
    server.await.expect("server");
}

#[tokio::test]
async fn search_two_entries_then_done() {
    let (listener, url) = start().await;
    let server = tokio::spawn(async move {
        let mut server = MockServer::accept(listener).await;
        let (id, op) = server.read_pdu().await;
        assert_eq!(op.id, 3);
        server
            .send(
                id,
                entry_op("uid=alice,dc=example,dc=com", vec![("cn", vec!["alice"])]),
            )
            .await;
        server
            .send(
                id,
                entry_op("uid=ally,dc=example,dc=com", vec![("cn", vec!["ally"])]),
            )
            .await;
        server.send(id, result_op(5, 0, "")).await;
    });

    let (conn, mut ldap) = LdapConnAsync::new(&url).await.expect("connect");
    ldapmux::drive!(conn);
    let mut stream = ldap
        .streaming_search(
            "dc=example,dc=com",
            Scope::Subtree,
            Filter::Equality("cn".into(), "alice".into()),
            vec!["cn"],
        )
        .await
        .expect("search");
    let mut dns = Vec::new();
    while let Some(entry) = stream.next().await.expect("entry") {
        let entry = SearchEntry::construct(entry).expect("construct");
        dns.push(entry.dn);
    }
    assert_eq!(
        dns,
        vec!["uid=alice,dc=example,dc=com", "uid=ally,dc=example,dc=com"],
    );
    let res = stream.finish().await.expect("done");
    assert_eq!(res.rc, 0);
    server.await.expect("server");
}

#[tokio::test]
async fn compare_true_is_success() {
    let (listener, url) = start().await;
    let server = tokio::spawn(async move {
        let mut server = MockServer::accept(listener).await;
        let (id, op) = server.read_pdu().await;
        assert_eq!(op.id, 14);
        server.send(id, result_op(15, 6, "")).await;
    });

    let (conn, mut ldap) = LdapConnAsync::new(&url).await.expect("connect");
    ldapmux::drive!(conn);
    let cmp = ldap
        .compare("uid=u,dc=x", "objectClass", "person")
        .await
        .expect("compare");
    assert_eq!(cmp.0.rc, 6);
    assert!(cmp.equal().expect("equal"));
    server.await.expect("server");
}

#[tokio::test]
async fn out_of_order_responses() {
    let (listener, url) = start().await;
    let server = tokio::spawn(async move {
        let mut server = MockServer::accept(listener).await;
        let (id_a, _) = server.read_pdu().await;
        let (id_b, _) = server.read_pdu().await;
        assert_eq!((id_a, id_b), (1, 2));
        // answer B before A
        server.send(id_b, result_op(7, 0, "second")).await;
        server.send(id_a, result_op(7, 0, "first")).await;
    });

    let (conn, ldap) = LdapConnAsync::new(&url).await.expect("connect");
    ldapmux::drive!(conn);
    let mut ldap_a = ldap.clone();
    let mut ldap_b = ldap.clone();
    let mods = || vec![Mod::Replace("cn", HashSet::from(["x"]))];
    let (res_a, res_b) = tokio::join!(
        ldap_a.modify("uid=a,dc=x", mods()),
        ldap_b.modify("uid=b,dc=x", mods()),
    );
    assert_eq!(res_a.expect("a").matched, "first");
    assert_eq!(res_b.expect("b").matched, "second");
    server.await.expect("server");
}

#[tokio::test]
async fn bind_gate_holds_back_later_ops() {
    let (listener, url) = start().await;
    let server = tokio::spawn(async move {
        let mut server = MockServer::accept(listener).await;
        let (search_id, op) = server.read_pdu().await;
        assert_eq!(op.id, 3);
        let (bind_id, op) = server.read_pdu().await;
        assert_eq!(op.id, 0);
        // the add is submitted while the bind is in flight; its bytes
        // must not show up until the bind response is out
        server.expect_silence().await;
        server.send(bind_id, result_op(1, 0, "")).await;
        let (add_id, op) = server.read_pdu().await;
        assert_eq!(op.id, 8);
        server.send(add_id, result_op(9, 0, "")).await;
        server.send(search_id, result_op(5, 0, "")).await;
    });

    let (conn, mut ldap) = LdapConnAsync::new(&url).await.expect("connect");
    ldapmux::drive!(conn);
    let mut stream = ldap
        .streaming_search(
            "dc=example,dc=com",
            Scope::Subtree,
            Filter::Present("objectClass".into()),
            vec!["cn"],
        )
        .await
        .expect("search");
    let mut bind_ldap = ldap.clone();
    let bind_task =
        tokio::spawn(async move { bind_ldap.simple_bind("cn=admin,dc=x", "secret").await });
    sleep(Duration::from_millis(50)).await;
    let mut add_ldap = ldap.clone();
    let add_task = tokio::spawn(async move {
        add_ldap
            .add("uid=new,dc=x", vec![("uid", HashSet::from(["new"]))])
            .await
    });

    assert_eq!(bind_task.await.expect("join").expect("bind").rc, 0);
    assert_eq!(add_task.await.expect("join").expect("add").rc, 0);
    assert!(stream.next().await.expect("done").is_none());
    assert_eq!(stream.finish().await.expect("result").rc, 0);
    server.await.expect("server");
}

#[tokio::test]
async fn graceful_close_with_inflight_search() {
    let (listener, url) = start().await;
    let server = tokio::spawn(async move {
        let mut server = MockServer::accept(listener).await;
        let (search_id, op) = server.read_pdu().await;
        assert_eq!(op.id, 3);
        server
            .send(search_id, entry_op("uid=a,dc=x", vec![("cn", vec!["a"])]))
            .await;
        // give the client time to issue the close and the rejected add
        sleep(Duration::from_millis(150)).await;
        server.send(search_id, result_op(5, 0, "")).await;
    });

    let (conn, mut ldap) = LdapConnAsync::new(&url).await.expect("connect");
    ldapmux::drive!(conn);
    let mut stream = ldap
        .streaming_search(
            "dc=example,dc=com",
            Scope::Subtree,
            Filter::Present("objectClass".into()),
            vec!["cn"],
        )
        .await
        .expect("search");
    assert!(stream.next().await.expect("entry").is_some());

    let mut close_ldap = ldap.clone();
    let close_task = tokio::spawn(async move { close_ldap.close(false).await });
    sleep(Duration::from_millis(50)).await;

    // submissions after close are rejected
    match ldap
        .add("uid=late,dc=x", vec![("uid", HashSet::from(["late"]))])
        .await
    {
        Err(LdapError::ConnectionClosed) => (),
        other => panic!("expected ConnectionClosed, got {:?}", other.map(|r| r.rc)),
    }

    // the in-flight search still completes, and with it the close
    assert!(stream.next().await.expect("done").is_none());
    assert_eq!(stream.finish().await.expect("result").rc, 0);
    close_task.await.expect("join").expect("close");
    server.await.expect("server");
}

#[tokio::test]
async fn message_ids_count_up_from_one() {
    let (listener, url) = start().await;
    let server = tokio::spawn(async move {
        let mut server = MockServer::accept(listener).await;
        let mut seen = Vec::new();
        for resp_tag in [1, 9, 7, 11] {
            let (id, _) = server.read_pdu().await;
            seen.push(id);
            server.send(id, result_op(resp_tag, 0, "")).await;
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);
    });

    let (conn, mut ldap) = LdapConnAsync::new(&url).await.expect("connect");
    ldapmux::drive!(conn);
    ldap.simple_bind("", "").await.expect("bind");
    ldap.add("uid=u,dc=x", vec![("uid", HashSet::from(["u"]))])
        .await
        .expect("add");
    ldap.modify("uid=u,dc=x", vec![Mod::Replace("cn", HashSet::from(["u"]))])
        .await
        .expect("modify");
    ldap.delete("uid=u,dc=x").await.expect("delete");
    assert_eq!(ldap.last_id(), 4);
    server.await.expect("server");
}

#[tokio::test]
async fn unsolicited_response_is_fatal_by_default() {
    let (listener, url) = start().await;
    let server = tokio::spawn(async move {
        let mut server = MockServer::accept(listener).await;
        let (_, op) = server.read_pdu().await;
        assert_eq!(op.id, 6);
        server.send(99, result_op(7, 0, "")).await;
        // the client tears the connection down on its own
        let mut chunk = [0u8; 16];
        let n = server.stream.read(&mut chunk).await.expect("read");
        assert_eq!(n, 0);
    });

    let (conn, mut ldap) = LdapConnAsync::new(&url).await.expect("connect");
    let driver = tokio::spawn(async move { conn.drive().await });
    match ldap
        .modify("uid=u,dc=x", vec![Mod::Replace("cn", HashSet::from(["u"]))])
        .await
    {
        Err(LdapError::ConnectionClosed) => (),
        other => panic!("expected ConnectionClosed, got {:?}", other.map(|r| r.rc)),
    }
    match driver.await.expect("join") {
        Err(LdapError::UnsolicitedResponse(99)) => (),
        other => panic!("expected UnsolicitedResponse, got {:?}", other),
    }
    server.await.expect("server");
}

#[tokio::test]
async fn unsolicited_response_dropped_when_lenient() {
    let (listener, url) = start().await;
    let server = tokio::spawn(async move {
        let mut server = MockServer::accept(listener).await;
        let (id, _) = server.read_pdu().await;
        server.send(99, result_op(7, 0, "")).await;
        server.send(id, result_op(7, 0, "")).await;
    });

    let settings = LdapConnSettings::new().set_lenient_unsolicited(true);
    let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
        .await
        .expect("connect");
    ldapmux::drive!(conn);
    let res = ldap
        .modify("uid=u,dc=x", vec![Mod::Replace("cn", HashSet::from(["u"]))])
        .await
        .expect("modify");
    assert_eq!(res.rc, 0);
    server.await.expect("server");
}

#[tokio::test]
async fn abandon_resolves_pending_search() {
    let (listener, url) = start().await;
    let server = tokio::spawn(async move {
        let mut server = MockServer::accept(listener).await;
        let (search_id, op) = server.read_pdu().await;
        assert_eq!(op.id, 3);
        let (_, op) = server.read_pdu().await;
        assert_eq!(op.id, 16);
        let (_, msgid) = parse_uint(&op.expect_primitive().expect("abandon payload"))
            .expect("uint");
        assert_eq!(msgid as RequestId, search_id);
    });

    let (conn, mut ldap) = LdapConnAsync::new(&url).await.expect("connect");
    ldapmux::drive!(conn);
    let mut stream = ldap
        .streaming_search(
            "dc=example,dc=com",
            Scope::Subtree,
            Filter::Present("objectClass".into()),
            vec!["cn"],
        )
        .await
        .expect("search");
    let search_id = ldap.last_id();
    ldap.abandon(search_id).await.expect("abandon");
    match stream.next().await {
        Err(LdapError::Abandoned) => (),
        other => panic!("expected Abandoned, got {:?}", other.is_ok()),
    }
    server.await.expect("server");
}

#[tokio::test]
async fn per_op_deadline_times_out_and_scrubs() {
    let (listener, url) = start().await;
    let server = tokio::spawn(async move {
        let mut server = MockServer::accept(listener).await;
        let (first, _) = server.read_pdu().await;
        assert_eq!(first, 1);
        // never answer the first op
        let (second, _) = server.read_pdu().await;
        assert_eq!(second, 2);
        server.send(second, result_op(7, 0, "")).await;
    });

    let (conn, mut ldap) = LdapConnAsync::new(&url).await.expect("connect");
    ldapmux::drive!(conn);
    let res = ldap
        .with_timeout(Duration::from_millis(50))
        .modify("uid=u,dc=x", vec![Mod::Replace("cn", HashSet::from(["u"]))])
        .await;
    assert!(matches!(res, Err(LdapError::Timeout)));

    // the connection survives a local timeout
    let res = ldap
        .modify("uid=u,dc=x", vec![Mod::Replace("cn", HashSet::from(["v"]))])
        .await
        .expect("modify");
    assert_eq!(res.rc, 0);
    server.await.expect("server");
}

#[tokio::test]
async fn password_modify_roundtrip() {
    let (listener, url) = start().await;
    let server = tokio::spawn(async move {
        let mut server = MockServer::accept(listener).await;
        let (id, op) = server.read_pdu().await;
        assert_eq!(op.id, 23);
        // extendedResponse with a generated password in the response
        // value, context-tagged 11
        let mut gen = BytesMut::new();
        write::encode_into(
            &mut gen,
            Tag::Sequence(Sequence {
                inner: vec![Tag::OctetString(OctetString {
                    id: 0,
                    class: TagClass::Context,
                    inner: Vec::from("s3cr3t"),
                })],
                ..Default::default()
            })
            .into_structure(),
        )
        .expect("encoded");
        let resp = Tag::Sequence(Sequence {
            id: 24,
            class: TagClass::Application,
            inner: vec![
                Tag::Enumerated(Enumerated {
                    inner: 0,
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    id: 11,
                    class: TagClass::Context,
                    inner: Vec::from(&gen[..]),
                }),
            ],
        });
        server.send(id, resp).await;
    });

    let (conn, mut ldap) = LdapConnAsync::new(&url).await.expect("connect");
    ldapmux::drive!(conn);
    let (exop, res) = ldap
        .extended(PasswordModify {
            user_id: Some("uid=u,dc=x"),
            old_pass: Some("old"),
            new_pass: None,
        })
        .await
        .expect("extended")
        .success()
        .expect("success");
    assert_eq!(res.rc, 0);
    let pm: PasswordModifyResp = exop.parse().expect("password modify response");
    assert_eq!(pm.gen_pass, "s3cr3t");
    server.await.expect("server");
}

fn read_pdu_blocking(
    stream: &mut std::net::TcpStream,
    buf: &mut Vec<u8>,
) -> (RequestId, StructureTag) {
    use std::io::Read;

    loop {
        match parse_tag(&buf[..]) {
            Ok((rest, tag)) => {
                let consumed = buf.len() - rest.len();
                buf.drain(..consumed);
                let mut components = tag
                    .expect_constructed()
                    .expect("request envelope")
                    .into_iter();
                let msgid_octets = components
                    .next()
                    .and_then(|t| t.expect_primitive())
                    .expect("message id");
                let (_, msgid) = parse_uint(&msgid_octets).expect("uint");
                let protoop = components.next().expect("protocol op");
                return (msgid as RequestId, protoop);
            }
            Err(e) if e.is_incomplete() => {
                let mut chunk = [0u8; 1024];
                let n = stream.read(&mut chunk).expect("read");
                assert!(n > 0, "peer closed while reading a PDU");
                buf.extend_from_slice(&chunk[..n]);
            }
            Err(e) => panic!("malformed PDU from client: {:?}", e),
        }
    }
}

#[test]
fn sync_facade_roundtrip() {
    use std::io::Write;

    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let url = format!(
        "ldap://127.0.0.1:{}",
        listener.local_addr().expect("local addr").port()
    );
    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut buf = Vec::new();
        let (id, op) = read_pdu_blocking(&mut stream, &mut buf);
        assert_eq!(op.id, 0);
        let mut out = BytesMut::new();
        write::encode_into(&mut out, envelope(id, result_op(1, 0, "")).into_structure())
            .expect("encoded");
        stream.write_all(&out).expect("write");

        let (id, op) = read_pdu_blocking(&mut stream, &mut buf);
        assert_eq!(op.id, 14);
        let mut out = BytesMut::new();
        write::encode_into(&mut out, envelope(id, result_op(15, 5, "")).into_structure())
            .expect("encoded");
        stream.write_all(&out).expect("write");
    });

    let mut conn = LdapConn::new(&url).expect("connect");
    let res = conn.simple_bind("cn=admin,dc=x", "secret").expect("bind");
    assert_eq!(res.rc, 0);
    let cmp = conn
        .compare("uid=u,dc=x", "objectClass", "device")
        .expect("compare");
    assert!(!cmp.equal().expect("equal"));
    server.join().expect("server");
}

#[tokio::test]
async fn unbind_shuts_the_connection_down() {
    let (listener, url) = start().await;
    let server = tokio::spawn(async move {
        let mut server = MockServer::accept(listener).await;
        let (id, op) = server.read_pdu().await;
        assert_eq!(op.id, 0);
        server.send(id, result_op(1, 0, "")).await;
        let (_, op) = server.read_pdu().await;
        assert_eq!(op.id, 2);
        // unbind carries no response; the client closes the socket
        let mut chunk = [0u8; 16];
        let n = server.stream.read(&mut chunk).await.expect("read");
        assert_eq!(n, 0);
    });

    let (conn, mut ldap) = LdapConnAsync::new(&url).await.expect("connect");
    ldapmux::drive!(conn);
    ldap.simple_bind("", "").await.expect("bind");
    ldap.unbind().await.expect("unbind");
    match ldap.simple_bind("", "").await {
        Err(LdapError::ConnectionClosed) => (),
        other => panic!("expected ConnectionClosed, got {:?}", other.map(|r| r.rc)),
    }
    server.await.expect("server");
}
