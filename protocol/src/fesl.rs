//! FESL operations
//!
//! Each operation builds one request and interprets its reassembled
//! response. Sequencing, reassembly and state gating happen in the
//! [`Engine`](crate::engine::Engine); this module only knows what the
//! fields mean.

use crate::catalog::StatsCatalog;
use crate::constants::{
    CLIENT_PLATFORM, DEFAULT_LEADERBOARD_KEYS, FRAGMENT_SIZE, MAX_LEADERBOARD_SPAN,
    NULL_MAC_ADDRESS, Namespace,
};
use crate::correlation::{LogicalResponse, Request};
use crate::engine::Operation;
use crate::error::{Error, ProtocolError, ProtocolErrorKind, Result};
use crate::packets::Tag;
use crate::payload::{FieldPath, Payload};
use crate::session::{Account, Session, SessionState, TheaterEndpoint};
use crate::value::{KeyTable, Value, ValueKind, unquote};
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Decoded statistics, keyed by stat name in response order
pub type StatsRecord = IndexMap<String, Value>;

fn lookup_table() -> KeyTable {
    KeyTable::from_static(
        &[
            ("userId", ValueKind::Integer),
            ("masterUserId", ValueKind::Integer),
            ("xuid", ValueKind::Integer),
        ],
        ValueKind::Text,
    )
}

fn search_table() -> KeyTable {
    KeyTable::from_static(
        &[("id", ValueKind::Integer), ("type", ValueKind::Integer)],
        ValueKind::Text,
    )
}

fn leaderboard_table() -> KeyTable {
    KeyTable::from_static(
        &[("owner", ValueKind::Integer), ("rank", ValueKind::Integer)],
        ValueKind::Text,
    )
}

fn required<'a>(record: &'a Payload, name: &'static str, key: &str) -> Result<&'a str> {
    record.field(key).ok_or_else(|| Error::MissingField {
        record: name,
        key: key.to_string(),
    })
}

fn integer(table: &KeyTable, record: &Payload, key: &str) -> Result<Option<i64>> {
    match record.field(key) {
        Some(raw) if !raw.is_empty() => Ok(table.decode(key, raw)?.as_i64()),
        _ => Ok(None),
    }
}

fn text(record: &Payload, key: &str) -> Option<String> {
    record.field(key).map(unquote)
}

fn key_list(payload: &mut Payload, keys: &[String]) {
    payload.insert_list("keys", None, keys);
}

/// Server facts announced in the hello response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HelloInfo {
    pub theater: TheaterEndpoint,
    pub server_time: Option<String>,
}

/// Client identification, the first FESL exchange
#[derive(Debug, Clone, Copy, Default)]
pub struct Hello;

impl Operation for Hello {
    type Output = HelloInfo;

    fn name(&self) -> &'static str {
        "hello"
    }

    fn required_state(&self) -> SessionState {
        SessionState::Connected
    }

    fn request(&self, session: &mut Session) -> Result<Request> {
        let backend = session.platform().backend();
        let payload = Payload::new()
            .with("TXN", "Hello")
            .with("clientString", backend.client_string)
            .with("sku", CLIENT_PLATFORM)
            .with("locale", "en_US")
            .with("clientPlatform", CLIENT_PLATFORM)
            .with("clientVersion", "2.0")
            .with("SDKVersion", "5.1.2.0.0")
            .with("protocolVersion", "2.0")
            .with("fragmentSize", FRAGMENT_SIZE)
            .with("clientType", "server");
        session.transition(SessionState::HelloSent)?;
        Ok(Request::new(Tag::FSYS, payload))
    }

    fn complete(self, session: &mut Session, response: LogicalResponse) -> Result<HelloInfo> {
        let payload = response.payload();
        let host = unquote(required(payload, "hello", "theaterIp")?);
        let raw_port = required(payload, "hello", "theaterPort")?;
        let port = raw_port.trim().parse().map_err(|_| Error::InvalidValue {
            key: "theaterPort".into(),
            value: raw_port.to_string(),
            kind: ValueKind::Integer,
        })?;
        let theater = TheaterEndpoint { host, port };
        let server_time = text(payload, "curTime");

        session.set_theater(theater.clone());
        session.set_server_time(server_time.clone());
        Ok(HelloInfo {
            theater,
            server_time,
        })
    }

    fn rejected(&self, session: &mut Session, error: ProtocolError) -> Error {
        session.close();
        Error::Protocol(error)
    }
}

/// Result of a successful login
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginInfo {
    pub login_key: String,
    pub account: Account,
}

/// Credential login, answered with the `lkey` session token
#[derive(Clone)]
pub struct Login {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Login {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Operation for Login {
    type Output = LoginInfo;

    fn name(&self) -> &'static str {
        "login"
    }

    fn required_state(&self) -> SessionState {
        SessionState::ChallengePending
    }

    fn request(&self, _session: &mut Session) -> Result<Request> {
        let payload = Payload::new()
            .with("TXN", "NuLogin")
            .with("returnEncryptedInfo", 0)
            .with("nuid", &self.username)
            .with("password", &self.password)
            .with("macAddr", NULL_MAC_ADDRESS);
        Ok(Request::new(Tag::ACCT, payload))
    }

    fn complete(self, session: &mut Session, response: LogicalResponse) -> Result<LoginInfo> {
        let payload = response.payload();
        let table = lookup_table();
        let parsed = required(payload, "login", "lkey").and_then(|login_key| {
            let account = Account {
                user_id: integer(&table, payload, "userId")?,
                profile_id: integer(&table, payload, "profileId")?,
                display_name: text(payload, "displayName"),
            };
            Ok((login_key.to_string(), account))
        });
        let (login_key, account) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                session.close();
                return Err(e);
            }
        };

        session.transition(SessionState::Authenticated)?;
        session.set_login(login_key.clone(), account.clone());
        info!(
            "logged in as {} (user id {:?})",
            account.display_name.as_deref().unwrap_or(&self.username),
            account.user_id
        );
        Ok(LoginInfo { login_key, account })
    }

    fn rejected(&self, session: &mut Session, error: ProtocolError) -> Error {
        session.close();
        Error::Protocol(error.with_kind(ProtocolErrorKind::AuthenticationFailed))
    }
}

/// Final message before disconnecting; no response is sent
pub fn goodbye_request() -> Request {
    Request::new(
        Tag::FSYS,
        Payload::new()
            .with("TXN", "Goodbye")
            .with("reason", "GOODBYE_CLIENT_NORMAL")
            .with("message", "\"Disconnected via front-end\""),
    )
}

/// Field a persona lookup matches on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupType {
    ByName,
    ById,
}

impl LookupType {
    fn field(self) -> &'static str {
        match self {
            Self::ByName => "userName",
            Self::ById => "userId",
        }
    }
}

/// A player identity within a namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Persona {
    pub user_id: i64,
    pub name: String,
    pub namespace: Option<String>,
    pub master_user_id: Option<i64>,
    pub xuid: Option<i64>,
}

/// Exact-match persona lookup by names or ids
#[derive(Debug, Clone)]
pub struct LookupUsers {
    pub identifiers: Vec<String>,
    pub lookup_type: LookupType,
    pub namespace: Namespace,
}

impl Operation for LookupUsers {
    type Output = Vec<Persona>;

    fn name(&self) -> &'static str {
        "persona lookup"
    }

    fn request(&self, _session: &mut Session) -> Result<Request> {
        if self.identifiers.is_empty() {
            return Err(Error::InvalidArgument("lookup needs at least one identifier".into()));
        }
        let mut payload = Payload::new().with("TXN", "NuLookupUserInfo");
        let entries = FieldPath::key("userInfo");
        for (index, identifier) in self.identifiers.iter().enumerate() {
            let entry = entries.clone().index(index);
            payload.insert(entry.clone().child(self.lookup_type.field()), identifier);
            if self.namespace.is_legacy() {
                payload.insert(entry.child("namespace"), self.namespace);
            }
        }
        payload.insert(entries.list_length(), self.identifiers.len());
        Ok(Request::new(Tag::ACCT, payload))
    }

    fn complete(self, _session: &mut Session, response: LogicalResponse) -> Result<Vec<Persona>> {
        let table = lookup_table();
        let mut personas = Vec::new();
        for entry in response.payload().list(&FieldPath::key("userInfo"))? {
            // Unmatched identifiers are echoed back without a user id
            let Some(user_id) = integer(&table, &entry, "userId")? else {
                continue;
            };
            personas.push(Persona {
                user_id,
                name: text(&entry, "userName").unwrap_or_default(),
                namespace: text(&entry, "namespace"),
                master_user_id: integer(&table, &entry, "masterUserId")?,
                xuid: integer(&table, &entry, "xuid")?,
            });
        }
        Ok(personas)
    }
}

/// One result of a name search
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub name: String,
    pub kind: Option<i64>,
}

/// Partial name search; `*` acts as a wildcard
///
/// The backend rejects searches with no match (`NotFound`) and searches
/// with too many matches (`TooManyResults`).
#[derive(Debug, Clone)]
pub struct Search {
    pub screen_name: String,
    pub namespace: Namespace,
}

impl Operation for Search {
    type Output = Vec<SearchHit>;

    fn name(&self) -> &'static str {
        "name search"
    }

    fn request(&self, _session: &mut Session) -> Result<Request> {
        if self.screen_name.is_empty() {
            return Err(Error::InvalidArgument("search name is empty".into()));
        }
        let payload = Payload::new()
            .with("TXN", "NuSearchOwner")
            .with("screenName", &self.screen_name)
            .with("searchType", 1)
            .with("retrieveUserIds", 0)
            .with("retrieveMasterUserIds", 1)
            .with("nameSpaceId", self.namespace);
        Ok(Request::new(Tag::ACCT, payload))
    }

    fn complete(self, _session: &mut Session, response: LogicalResponse) -> Result<Vec<SearchHit>> {
        let table = search_table();
        response
            .payload()
            .list(&FieldPath::key("users"))?
            .into_iter()
            .map(|user| {
                let id = integer(&table, &user, "id")?.ok_or_else(|| Error::MissingField {
                    record: "search",
                    key: "id".into(),
                })?;
                Ok(SearchHit {
                    id,
                    name: text(&user, "name").unwrap_or_default(),
                    kind: integer(&table, &user, "type")?,
                })
            })
            .collect()
    }
}

/// Decodes a `key`/`value` pair list through the catalog
fn decode_stats(catalog: &StatsCatalog, entries: Vec<Payload>) -> Result<StatsRecord> {
    let mut stats = StatsRecord::new();
    for entry in entries {
        let key = required(&entry, "stat", "key")?.to_string();
        let raw = entry.field("value").unwrap_or_default();
        let value = catalog.decode(&key, raw)?;
        stats.insert(key, value);
    }
    Ok(stats)
}

/// Statistics of one player
#[derive(Debug, Clone)]
pub struct GetStats {
    pub user_id: i64,
    /// Keys to fetch; empty means every catalog key
    pub keys: Vec<String>,
    pub catalog: Arc<StatsCatalog>,
}

impl GetStats {
    fn requested_keys(&self) -> Result<Vec<String>> {
        let keys = if self.keys.is_empty() {
            self.catalog.keys()
        } else {
            self.keys.clone()
        };
        if keys.is_empty() {
            return Err(Error::InvalidArgument("no stats keys requested".into()));
        }
        Ok(keys)
    }
}

impl Operation for GetStats {
    type Output = StatsRecord;

    fn name(&self) -> &'static str {
        "stats"
    }

    fn request(&self, _session: &mut Session) -> Result<Request> {
        let keys = self.requested_keys()?;
        let mut payload = Payload::new()
            .with("TXN", "GetStats")
            .with("owner", self.user_id)
            .with("ownerType", 1)
            .with("periodId", 0)
            .with("periodPast", 0);
        key_list(&mut payload, &keys);
        Ok(Request::new(Tag::RANK, payload).chunked())
    }

    fn complete(self, _session: &mut Session, response: LogicalResponse) -> Result<StatsRecord> {
        let entries = response.payload().list(&FieldPath::key("stats"))?;
        decode_stats(&self.catalog, entries)
    }
}

/// One row of a leaderboard
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: i64,
    pub user_id: i64,
    pub name: String,
    pub stats: StatsRecord,
}

/// Players ranked by one stat, between two ranks inclusive
#[derive(Debug, Clone)]
pub struct GetLeaderboard {
    pub sort_by: String,
    pub min_rank: u32,
    pub max_rank: u32,
    /// Stats returned per row; empty means the default leaderboard keys
    pub keys: Vec<String>,
    pub catalog: Arc<StatsCatalog>,
}

impl GetLeaderboard {
    fn validate(&self) -> Result<()> {
        if self.min_rank < 1 || self.min_rank >= self.max_rank {
            return Err(Error::InvalidArgument(format!(
                "leaderboard ranks must satisfy 1 <= min < max, got {}..{}",
                self.min_rank, self.max_rank
            )));
        }
        if self.max_rank - self.min_rank >= MAX_LEADERBOARD_SPAN {
            return Err(Error::InvalidArgument(format!(
                "leaderboard span {}..{} exceeds {} ranks",
                self.min_rank, self.max_rank, MAX_LEADERBOARD_SPAN
            )));
        }
        if self.sort_by.is_empty() {
            return Err(Error::InvalidArgument("leaderboard sort key is empty".into()));
        }
        Ok(())
    }
}

impl Operation for GetLeaderboard {
    type Output = Vec<LeaderboardEntry>;

    fn name(&self) -> &'static str {
        "leaderboard"
    }

    fn request(&self, _session: &mut Session) -> Result<Request> {
        self.validate()?;
        let keys: Vec<String> = if self.keys.is_empty() {
            DEFAULT_LEADERBOARD_KEYS.iter().map(|k| k.to_string()).collect()
        } else {
            self.keys.clone()
        };
        let mut payload = Payload::new()
            .with("TXN", "GetTopNAndStats")
            .with("key", &self.sort_by)
            .with("ownerType", 1)
            .with("minRank", self.min_rank)
            .with("maxRank", self.max_rank)
            .with("periodId", 0)
            .with("periodPast", 0)
            .with("rankOrder", 0);
        key_list(&mut payload, &keys);
        Ok(Request::new(Tag::RANK, payload).chunked())
    }

    fn complete(
        self,
        _session: &mut Session,
        response: LogicalResponse,
    ) -> Result<Vec<LeaderboardEntry>> {
        let table = leaderboard_table();
        let missing = |key: &str| Error::MissingField {
            record: "leaderboard",
            key: key.to_string(),
        };
        response
            .payload()
            .list(&FieldPath::key("stats"))?
            .into_iter()
            .map(|row| {
                let extra = row.list(&FieldPath::key("addStats"))?;
                Ok(LeaderboardEntry {
                    rank: integer(&table, &row, "rank")?.ok_or_else(|| missing("rank"))?,
                    user_id: integer(&table, &row, "owner")?.ok_or_else(|| missing("owner"))?,
                    name: text(&row, "name").unwrap_or_default(),
                    stats: decode_stats(&self.catalog, extra)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FrameDecoder;
    use crate::constants::{Platform, TransmissionType, error_codes};
    use crate::correlation::chunk_frames;
    use crate::engine::Engine;
    use crate::packets::{Dialect, Frame};

    fn sent_frames(engine: &mut Engine) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new(Dialect::Fesl);
        let mut frames = Vec::new();
        while let Some(bytes) = engine.take_outgoing() {
            frames.extend(decoder.push(&bytes).unwrap());
        }
        frames
    }

    fn reply(tag: Tag, sequence_id: u32, payload: Payload) -> Vec<u8> {
        Frame::fesl(tag, TransmissionType::SingleResponse, sequence_id, payload)
            .to_bytes()
            .unwrap()
    }

    fn memcheck() -> Vec<u8> {
        reply(Tag::FSYS, 0, Payload::new().with("TXN", "MemCheck"))
    }

    fn run<O: Operation>(engine: &mut Engine, operation: O, response: Payload) -> Result<O::Output> {
        let ticket = engine.start(&operation)?;
        let request = sent_frames(engine);
        let tag = request[0].tag;
        engine.receive(&reply(tag, ticket.sequence_id(), response))?;
        let response = engine.take_response(ticket).unwrap();
        engine.finish(operation, response)
    }

    fn hello_response() -> Payload {
        Payload::new()
            .with("TXN", "Hello")
            .with("theaterIp", "bfbc2-pc-server.theater.ea.com")
            .with("theaterPort", 18326)
            .with("curTime", "\"Oct-18-2026%2012%3a00%3a00%20UTC\"")
    }

    fn challenged_engine() -> Engine {
        let mut engine = Engine::new(Dialect::Fesl, Platform::Pc);
        engine.connected().unwrap();
        let ticket = engine.start(&Hello).unwrap();
        sent_frames(&mut engine);
        engine.receive(&memcheck()).unwrap();
        engine
            .receive(&reply(Tag::FSYS, ticket.sequence_id(), hello_response()))
            .unwrap();
        let response = engine.take_response(ticket).unwrap();
        engine.finish(Hello, response).unwrap();
        sent_frames(&mut engine);
        engine
    }

    fn login() -> Login {
        Login {
            username: "user@example.com".into(),
            password: "hunter2".into(),
        }
    }

    fn authenticated_engine() -> Engine {
        let mut engine = challenged_engine();
        run(
            &mut engine,
            login(),
            Payload::new()
                .with("TXN", "NuLogin")
                .with("lkey", "W5NyZzx5")
                .with("userId", 2_290_000)
                .with("profileId", 2_290_000)
                .with("displayName", "Krut0r"),
        )
        .unwrap();
        engine
    }

    fn error_payload(txn: &str, code: &str) -> Payload {
        Payload::new()
            .with("TXN", txn)
            .with("errorCode", code)
            .with("localizedMessage", "\"request failed\"")
    }

    #[test]
    fn test_hello_request_fields() {
        let mut engine = Engine::new(Dialect::Fesl, Platform::Xbox360);
        engine.connected().unwrap();
        engine.start(&Hello).unwrap();
        assert_eq!(engine.state(), SessionState::HelloSent);

        let frames = sent_frames(&mut engine);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].tag, Tag::FSYS);
        assert_eq!(frames[0].payload.field("clientString"), Some("bfbc2-360"));
        assert_eq!(frames[0].payload.field("fragmentSize"), Some("8096"));
    }

    #[test]
    fn test_handshake_reaches_challenge_and_stores_theater() {
        let engine = challenged_engine();
        assert_eq!(engine.state(), SessionState::ChallengePending);
        assert_eq!(
            engine.session().server_time(),
            Some("Oct-18-2026 12:00:00 UTC")
        );
        // Theater details stay hidden until login completes
        assert!(engine.session().theater_endpoint().is_err());
    }

    #[test]
    fn test_login_without_key_closes_session() {
        let mut engine = challenged_engine();
        let response = Payload::new()
            .with("TXN", "NuLogin")
            .with("userId", 2_290_000)
            .with("displayName", "Krut0r");
        assert!(matches!(
            run(&mut engine, login(), response),
            Err(Error::MissingField { .. })
        ));
        assert_eq!(engine.state(), SessionState::Closed);
        assert!(engine.session().login_key().is_err());
    }

    #[test]
    fn test_login_before_challenge_fails_without_io() {
        let mut engine = Engine::new(Dialect::Fesl, Platform::Pc);
        engine.connected().unwrap();
        assert!(matches!(
            engine.start(&login()),
            Err(Error::InvalidState {
                state: SessionState::Connected,
                ..
            })
        ));
        assert!(!engine.has_outgoing());
    }

    #[test]
    fn test_login_stores_key_and_account() {
        let engine = authenticated_engine();
        let session = engine.session();
        assert!(session.state().is_authenticated());
        assert_eq!(session.login_key().unwrap(), "W5NyZzx5");
        assert_eq!(session.theater_endpoint().unwrap().port, 18326);
        let account = session.account().unwrap();
        assert_eq!(account.user_id, Some(2_290_000));
        assert_eq!(account.display_name.as_deref(), Some("Krut0r"));
    }

    #[test]
    fn test_login_rejection_closes_session() {
        let mut engine = challenged_engine();
        let result = run(
            &mut engine,
            login(),
            error_payload("NuLogin", error_codes::INVALID_PASSWORD),
        );
        assert_eq!(
            result.unwrap_err().protocol_kind(),
            Some(ProtocolErrorKind::AuthenticationFailed)
        );
        assert!(engine.session().is_closed());
    }

    #[test]
    fn test_stats_before_login_fails_without_io() {
        let mut engine = Engine::new(Dialect::Fesl, Platform::Pc);
        let stats = GetStats {
            user_id: 1,
            keys: vec![],
            catalog: Arc::new(StatsCatalog::default()),
        };
        assert!(matches!(engine.start(&stats), Err(Error::InvalidState { .. })));
        assert!(!engine.has_outgoing());
    }

    #[test]
    fn test_lookup_request_shape() {
        let mut engine = authenticated_engine();
        let lookup = LookupUsers {
            identifiers: vec!["Krut0r".into(), "Other".into()],
            lookup_type: LookupType::ByName,
            namespace: Namespace::XblSub,
        };
        engine.start(&lookup).unwrap();
        let frames = sent_frames(&mut engine);
        let payload = &frames[0].payload;
        assert_eq!(frames[0].tag, Tag::ACCT);
        assert_eq!(payload.get(&"userInfo.1.userName".parse().unwrap()), Some("Other"));
        assert_eq!(payload.get(&"userInfo.0.namespace".parse().unwrap()), Some("XBL_SUB"));
        assert_eq!(payload.get(&"userInfo.[]".parse().unwrap()), Some("2"));
    }

    #[test]
    fn test_lookup_without_matches_is_empty() {
        let mut engine = authenticated_engine();
        let lookup = LookupUsers {
            identifiers: vec!["Krut0r".into()],
            lookup_type: LookupType::ByName,
            namespace: Namespace::Battlefield,
        };
        let entries = FieldPath::key("userInfo");
        let response = Payload::new()
            .with("TXN", "NuLookupUserInfo")
            .with_path(entries.clone().index(0).child("userName"), "Krut0r")
            .with_path(entries.list_length(), 1);
        assert!(run(&mut engine, lookup, response).unwrap().is_empty());
    }

    #[test]
    fn test_lookup_decodes_personas() {
        let mut engine = authenticated_engine();
        let lookup = LookupUsers {
            identifiers: vec!["226804555".into()],
            lookup_type: LookupType::ById,
            namespace: Namespace::Battlefield,
        };
        let entry = FieldPath::key("userInfo").index(0);
        let response = Payload::new()
            .with("TXN", "NuLookupUserInfo")
            .with_path(entry.clone().child("userName"), "Krut0r")
            .with_path(entry.clone().child("userId"), 226_804_555)
            .with_path(entry.clone().child("masterUserId"), 226_804_555)
            .with_path(entry.child("namespace"), "battlefield")
            .with_path(FieldPath::key("userInfo").list_length(), 1);
        let personas = run(&mut engine, lookup, response).unwrap();
        assert_eq!(
            personas,
            vec![Persona {
                user_id: 226_804_555,
                name: "Krut0r".into(),
                namespace: Some("battlefield".into()),
                master_user_id: Some(226_804_555),
                xuid: None,
            }]
        );
    }

    #[test]
    fn test_search_too_many_results() {
        let mut engine = authenticated_engine();
        let search = Search {
            screen_name: "ab*".into(),
            namespace: Namespace::Battlefield,
        };
        let error = run(
            &mut engine,
            search,
            error_payload("NuSearchOwner", error_codes::TOO_MANY_RESULTS),
        )
        .unwrap_err();
        assert_eq!(error.protocol_kind(), Some(ProtocolErrorKind::TooManyResults));
        assert!(!engine.session().is_closed());
    }

    #[test]
    fn test_search_no_match() {
        let mut engine = authenticated_engine();
        let search = Search {
            screen_name: "zzzz*".into(),
            namespace: Namespace::Battlefield,
        };
        let error = run(
            &mut engine,
            search,
            error_payload("NuSearchOwner", error_codes::NO_MATCH),
        )
        .unwrap_err();
        assert_eq!(error.protocol_kind(), Some(ProtocolErrorKind::NotFound));
    }

    #[test]
    fn test_search_hits() {
        let mut engine = authenticated_engine();
        let search = Search {
            screen_name: "Krut*".into(),
            namespace: Namespace::Battlefield,
        };
        let users = FieldPath::key("users");
        let response = Payload::new()
            .with("TXN", "NuSearchOwner")
            .with_path(users.clone().index(0).child("id"), 42)
            .with_path(users.clone().index(0).child("name"), "Krut0r")
            .with_path(users.clone().index(0).child("type"), 1)
            .with_path(users.list_length(), 1);
        let hits = run(&mut engine, search, response).unwrap();
        assert_eq!(
            hits,
            vec![SearchHit {
                id: 42,
                name: "Krut0r".into(),
                kind: Some(1)
            }]
        );
    }

    #[test]
    fn test_stats_request_is_chunked_rank() {
        let mut engine = authenticated_engine();
        let stats = GetStats {
            user_id: 226_804_555,
            keys: vec!["kills".into(), "deaths".into()],
            catalog: Arc::new(StatsCatalog::default()),
        };
        engine.start(&stats).unwrap();
        let frames = sent_frames(&mut engine);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].tag, Tag::RANK);
        assert_eq!(frames[0].transmission(), Some(TransmissionType::MultiRequest));
        assert!(frames[0].payload.field("size").is_some());
        assert!(frames[0].payload.field("data").is_some());
    }

    #[test]
    fn test_stats_decoded_through_catalog() {
        let mut engine = authenticated_engine();
        let catalog = StatsCatalog::default().with_key("veteran", ValueKind::Integer);
        let stats = GetStats {
            user_id: 1,
            keys: vec!["kills".into(), "veteran".into()],
            catalog: Arc::new(catalog),
        };
        let ticket = engine.start(&stats).unwrap();
        sent_frames(&mut engine);

        let entries = FieldPath::key("stats");
        let response = Payload::new()
            .with("TXN", "GetStats")
            .with_path(entries.clone().index(0).child("key"), "kills")
            .with_path(entries.clone().index(0).child("value"), "1502.0")
            .with_path(entries.clone().index(1).child("key"), "veteran")
            .with_path(entries.clone().index(1).child("value"), "2.0")
            .with_path(entries.list_length(), 2);
        for chunk in chunk_frames(
            Tag::RANK,
            TransmissionType::MultiResponse,
            ticket.sequence_id(),
            &response,
            FRAGMENT_SIZE,
        )
        .unwrap()
        {
            engine.receive(&chunk.to_bytes().unwrap()).unwrap();
        }
        let result = engine.take_response(ticket).unwrap();
        let stats = engine.finish(stats, result).unwrap();
        assert_eq!(stats["kills"], Value::Float(1502.0));
        assert_eq!(stats["veteran"], Value::Integer(2));
    }

    #[test]
    fn test_leaderboard_bounds() {
        let catalog = Arc::new(StatsCatalog::default());
        let board = |min_rank, max_rank| GetLeaderboard {
            sort_by: "score".into(),
            min_rank,
            max_rank,
            keys: vec![],
            catalog: catalog.clone(),
        };
        let mut engine = authenticated_engine();
        for (min, max) in [(0, 50), (50, 50), (51, 50), (1, 1 + MAX_LEADERBOARD_SPAN)] {
            assert!(matches!(
                engine.start(&board(min, max)),
                Err(Error::InvalidArgument(_))
            ));
        }
        assert!(!engine.has_outgoing());
        assert!(engine.start(&board(1, MAX_LEADERBOARD_SPAN)).is_ok());
    }

    #[test]
    fn test_leaderboard_reassembled_from_three_frames() {
        let mut engine = authenticated_engine();
        let board = GetLeaderboard {
            sort_by: "time".into(),
            min_rank: 1,
            max_rank: 50,
            keys: vec![],
            catalog: Arc::new(StatsCatalog::default()),
        };
        let ticket = engine.start(&board).unwrap();
        let request = sent_frames(&mut engine);
        assert_eq!(request[0].tag, Tag::RANK);

        let rows = FieldPath::key("stats");
        let mut response = Payload::new().with("TXN", "GetTopNAndStats");
        for i in 0..50 {
            let row = rows.clone().index(i);
            response.insert(row.clone().child("owner"), 1000 + i);
            response.insert(row.clone().child("name"), format!("player{i}"));
            response.insert(row.clone().child("rank"), i + 1);
            let extra = row.child("addStats");
            response.insert(extra.clone().index(0).child("key"), "time");
            response.insert(extra.clone().index(0).child("value"), 90_000 - i);
            response.insert(extra.list_length(), 1);
        }
        response.insert(rows.list_length(), 50);

        let encoded_length = response.to_bytes().unwrap().len() * 4 / 3;
        let chunks = chunk_frames(
            Tag::RANK,
            TransmissionType::MultiResponse,
            ticket.sequence_id(),
            &response,
            encoded_length / 3 + 64,
        )
        .unwrap();
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            engine.receive(&chunk.to_bytes().unwrap()).unwrap();
        }

        let result = engine.take_response(ticket).unwrap();
        let entries = engine.finish(board, result).unwrap();
        assert_eq!(entries.len(), 50);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.rank, i as i64 + 1);
            assert_eq!(entry.user_id, 1000 + i as i64);
            assert_eq!(entry.stats["time"], Value::Float(90_000.0 - i as f64));
        }
    }

    #[test]
    fn test_goodbye_request() {
        let request = goodbye_request();
        assert_eq!(request.tag, Tag::FSYS);
        assert_eq!(request.payload.field("TXN"), Some("Goodbye"));
        assert!(!request.is_chunked());
    }
}
