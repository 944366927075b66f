mod common;

use bfstats::protocol::{
    Dialect, Error, FieldPath, Namespace, Payload, ProtocolErrorKind, SessionState, Tag, Value,
};
use bfstats::transport::AsyncStreamTransport;
use bfstats::{ClientOptions, Credentials, FeslClient};
use common::{AsyncPeer, fesl_chunked_reply, fesl_reply, login_response, memcheck};
use std::time::Duration;
use tokio::io::DuplexStream;

type Client = FeslClient<AsyncStreamTransport<DuplexStream>>;

fn pair(timeout: Duration) -> (Client, AsyncPeer) {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let options = ClientOptions::default().with_timeout(timeout);
    let client = FeslClient::new(
        AsyncStreamTransport::new(client_end, timeout),
        Credentials::new("user@example.com", "hunter2"),
        &options,
    )
    .unwrap();
    (client, AsyncPeer::new(server_end, Dialect::Fesl))
}

fn stats_payload<K: ToString, V: ToString>(entries: &[(K, V)]) -> Payload {
    let stats = FieldPath::key("stats");
    let mut payload = Payload::new().with("TXN", "GetStats");
    for (index, (key, value)) in entries.iter().enumerate() {
        payload.insert(stats.clone().index(index).child("key"), key.to_string());
        payload.insert(stats.clone().index(index).child("value"), value.to_string());
    }
    payload.insert(stats.list_length(), entries.len());
    payload
}

fn error_payload(txn: &str, code: &str) -> Payload {
    Payload::new()
        .with("TXN", txn)
        .with("errorCode", code)
        .with("localizedMessage", "\"The request failed\"")
}

#[tokio::test]
async fn test_login_answers_memory_check() {
    let (mut client, mut peer) = pair(Duration::from_secs(5));
    let server = tokio::spawn(async move {
        peer.serve_login().await;
        let goodbye = peer.request().await;
        peer.drain().await;
        (peer, goodbye)
    });

    let login = client.login().await.unwrap();
    assert_eq!(login.login_key, "W5NyZzx5");
    assert_eq!(login.account.display_name.as_deref(), Some("Krut0r"));
    assert_eq!(client.state(), SessionState::Authenticated);
    assert_eq!(client.login_key().unwrap(), "W5NyZzx5");

    let theater = client.theater_details().unwrap();
    assert_eq!(theater.host, "127.0.0.1");
    assert_eq!(theater.port, 18325);
    assert_eq!(
        client.session().server_time(),
        Some("Oct-18-2026 12:00:00 UTC")
    );

    // Logging in again reuses the session
    assert_eq!(client.login().await.unwrap().login_key, "W5NyZzx5");

    client.close().await.unwrap();
    let (peer, goodbye) = server.await.unwrap();
    assert_eq!(goodbye.txn(), Some("Goodbye"));

    let answer = &peer.inbox.answers[0];
    assert_eq!(answer.txn(), Some("MemCheck"));
    assert_eq!(answer.sequence_id(), 0);
}

#[tokio::test]
async fn test_memory_check_after_hello_response() {
    let (mut client, mut peer) = pair(Duration::from_secs(5));
    let server = tokio::spawn(async move {
        let hello = peer.request().await;
        peer.send(&fesl_reply(Tag::FSYS, hello.sequence_id(), common::hello_response()))
            .await;
        peer.send(&memcheck()).await;
        let login = peer.request().await;
        peer.send(&fesl_reply(Tag::ACCT, login.sequence_id(), login_response()))
            .await;
        peer
    });

    client.login().await.unwrap();
    assert_eq!(client.state(), SessionState::Authenticated);
    let peer = server.await.unwrap();
    assert_eq!(peer.inbox.answers.len(), 1);
}

#[tokio::test]
async fn test_query_before_login_sends_nothing() {
    let (mut client, mut peer) = pair(Duration::from_secs(5));

    let err = client.get_stats(1, &["kills"]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
    let err = client
        .lookup_username("Krut0r", Namespace::Battlefield)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
    assert!(client.theater_details().is_err());
    assert!(client.login_key().is_err());

    drop(client);
    peer.drain().await;
    assert!(peer.inbox.pop().is_none());
    assert!(peer.inbox.answers.is_empty());
}

#[tokio::test]
async fn test_lookup_then_chunked_stats() {
    let (mut client, mut peer) = pair(Duration::from_secs(5));
    let entries: Vec<(String, String)> = (0..300)
        .map(|i| (format!("key_{i}"), format!("{i}.0")))
        .collect();
    let reply_entries = entries.clone();

    let server = tokio::spawn(async move {
        peer.serve_login().await;

        let lookup = peer.request().await;
        assert_eq!(lookup.txn(), Some("NuLookupUserInfo"));
        let name: FieldPath = "userInfo.0.userName".parse().unwrap();
        assert_eq!(lookup.payload.get(&name), Some("Krut0r"));
        // Keep-alive pushed while a request is outstanding
        peer.send(&fesl_reply(Tag::FSYS, 0, Payload::new().with("TXN", "Ping")))
            .await;
        let user = FieldPath::key("userInfo").index(0);
        let reply = Payload::new()
            .with("TXN", "NuLookupUserInfo")
            .with_path(user.clone().child("userName"), "Krut0r")
            .with_path(user.clone().child("userId"), 2_290_000)
            .with_path(user.child("namespace"), "battlefield")
            .with_path(FieldPath::key("userInfo").list_length(), 1);
        peer.send(&fesl_reply(Tag::ACCT, lookup.sequence_id(), reply))
            .await;

        let stats = peer.request().await;
        assert_eq!(stats.tag, Tag::RANK);
        assert!(stats.is_continued());
        let payload = stats_payload(&reply_entries);
        let bytes = fesl_chunked_reply(Tag::RANK, stats.sequence_id(), &payload);
        // Dribble the response to exercise partial reads
        for piece in bytes.chunks(997) {
            peer.send(piece).await;
        }
        peer
    });

    client.login().await.unwrap();
    let persona = client
        .lookup_username("Krut0r", Namespace::Battlefield)
        .await
        .unwrap();
    assert_eq!(persona.user_id, 2_290_000);
    assert_eq!(persona.namespace.as_deref(), Some("battlefield"));

    let no_keys: [&str; 0] = [];
    let stats = client.get_stats(persona.user_id, &no_keys).await.unwrap();
    assert_eq!(stats.len(), entries.len());
    assert_eq!(stats["key_0"], Value::Float(0.0));
    assert_eq!(stats["key_299"], Value::Float(299.0));

    let peer = server.await.unwrap();
    assert!(peer.inbox.answers.iter().any(|f| f.txn() == Some("Ping")));
}

#[tokio::test]
async fn test_search_errors_are_distinct() {
    let (mut client, mut peer) = pair(Duration::from_secs(5));
    let server = tokio::spawn(async move {
        peer.serve_login().await;
        let first = peer.request().await;
        peer.send(&fesl_reply(
            Tag::ACCT,
            first.sequence_id(),
            error_payload("NuSearchOwner", "104"),
        ))
        .await;
        let second = peer.request().await;
        peer.send(&fesl_reply(
            Tag::ACCT,
            second.sequence_id(),
            error_payload("NuSearchOwner", "105"),
        ))
        .await;
        peer
    });

    client.login().await.unwrap();
    let err = client
        .search_name("nobody*", Namespace::Battlefield)
        .await
        .unwrap_err();
    assert_eq!(err.protocol_kind(), Some(ProtocolErrorKind::NotFound));
    let err = client
        .search_name("a*", Namespace::Battlefield)
        .await
        .unwrap_err();
    assert_eq!(err.protocol_kind(), Some(ProtocolErrorKind::TooManyResults));
    assert_eq!(client.state(), SessionState::Authenticated);
    server.await.unwrap();
}

#[tokio::test]
async fn test_leaderboard_bounds_checked_locally() {
    let (mut client, mut peer) = pair(Duration::from_secs(5));
    let server = tokio::spawn(async move {
        peer.serve_login().await;
        peer.drain().await;
        peer
    });

    client.login().await.unwrap();
    let no_keys: [&str; 0] = [];
    for (min, max) in [(0, 10), (10, 10), (20, 10), (1, 5000)] {
        let err = client
            .get_leaderboard(min, max, "score", &no_keys)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{min}..{max}: {err}");
    }
    assert_eq!(client.state(), SessionState::Authenticated);
    drop(client);

    let mut peer = server.await.unwrap();
    assert!(peer.inbox.pop().is_none());
}

#[tokio::test]
async fn test_timeout_makes_connection_unusable() {
    let (mut client, mut peer) = pair(Duration::from_millis(100));

    let err = client.hello().await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "{err}");
    assert!(err.is_fatal());
    assert_eq!(client.state(), SessionState::Closed);

    let err = client.login().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }), "{err}");

    let hello = peer.request().await;
    assert_eq!(hello.txn(), Some("Hello"));
}

#[tokio::test]
async fn test_pipelined_stats_matched_by_sequence_id() {
    let (mut client, mut peer) = pair(Duration::from_secs(5));
    let user_ids = [11_i64, 22, 33];
    let server = tokio::spawn(async move {
        peer.serve_login().await;
        let mut requests = Vec::new();
        for _ in 0..user_ids.len() {
            requests.push(peer.request().await);
        }
        // Answer in reverse order of arrival
        for (index, request) in requests.iter().enumerate().rev() {
            let kills = (user_ids[index] * 10).to_string();
            let payload = stats_payload(&[("kills", kills)]);
            peer.send(&fesl_chunked_reply(Tag::RANK, request.sequence_id(), &payload))
                .await;
        }
        peer
    });

    client.login().await.unwrap();
    let records = client.get_stats_many(&user_ids, &["kills"]).await.unwrap();
    let kills: Vec<_> = records.iter().map(|r| r["kills"].clone()).collect();
    assert_eq!(
        kills,
        vec![Value::Float(110.0), Value::Float(220.0), Value::Float(330.0)]
    );
    server.await.unwrap();
}

#[tokio::test]
async fn test_pipelined_error_collects_every_response() {
    let (mut client, mut peer) = pair(Duration::from_secs(5));
    let user_ids = [11_i64, 22, 33];
    let server = tokio::spawn(async move {
        peer.serve_login().await;
        let mut requests = Vec::new();
        for _ in 0..user_ids.len() {
            requests.push(peer.request().await);
        }
        peer.send(&fesl_reply(
            Tag::RANK,
            requests[0].sequence_id(),
            error_payload("GetStats", "101"),
        ))
        .await;
        for request in &requests[1..] {
            let payload = stats_payload(&[("kills", "5")]);
            peer.send(&fesl_chunked_reply(Tag::RANK, request.sequence_id(), &payload))
                .await;
        }

        let next = peer.request().await;
        let payload = stats_payload(&[("kills", "7")]);
        peer.send(&fesl_chunked_reply(Tag::RANK, next.sequence_id(), &payload))
            .await;
        peer
    });

    client.login().await.unwrap();
    let err = client.get_stats_many(&user_ids, &["kills"]).await.unwrap_err();
    assert_eq!(err.protocol_kind(), Some(ProtocolErrorKind::NotFound));
    assert_eq!(client.state(), SessionState::Authenticated);
    assert_eq!(client.outstanding_requests(), 0);

    let stats = client.get_stats(44, &["kills"]).await.unwrap();
    assert_eq!(stats["kills"], Value::Float(7.0));
    assert_eq!(client.outstanding_requests(), 0);
    server.await.unwrap();
}
