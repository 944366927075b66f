//! Theater operations
//!
//! Theater answers list queries with a leading frame followed by a counted
//! run of record frames. The correlator reassembles them; the lead sits
//! under its own tag (`GLST.NUM-GAMES`) and records form a list
//! (`GDAT.0.NAME`), which this module turns into typed records.

use crate::constants::{CLIENT_PLATFORM, NULL_MAC_ADDRESS, THEATER_SKU};
use crate::correlation::{LogicalResponse, Request, TrailerCount};
use crate::engine::Operation;
use crate::error::{Error, ProtocolError, ProtocolErrorKind, Result};
use crate::packets::Tag;
use crate::payload::{FieldPath, Payload};
use crate::session::{Session, SessionState};
use crate::value::{KeyTable, Value, ValueKind, unquote};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;

/// Decoded record fields other than the identifiers lifted into struct fields
pub type Attributes = IndexMap<String, Value>;

fn lobby_table() -> KeyTable {
    use ValueKind::Integer;
    KeyTable::from_static(
        &[
            ("PASSING", Integer),
            ("TID", Integer),
            ("MAX-GAMES", Integer),
            ("NUM-GAMES", Integer),
            ("FAVORITE-GAMES", Integer),
            ("FAVORITE-PLAYERS", Integer),
            ("LID", Integer),
        ],
        ValueKind::Text,
    )
}

fn server_table() -> KeyTable {
    use ValueKind::{Boolean, Integer};
    KeyTable::from_static(
        &[
            ("JP", Integer),
            ("F", Integer),
            ("B-U-sguid", Integer),
            ("HU", Integer),
            ("P", Integer),
            ("B-U-Hardcore", Boolean),
            ("B-U-Softcore", Boolean),
            ("B-numObservers", Integer),
            ("LID", Integer),
            ("B-U-QueueLength", Integer),
            ("QP", Integer),
            ("MP", Integer),
            ("B-U-HasPassword", Boolean),
            ("GID", Integer),
            ("B-U-public", Boolean),
            ("B-U-EA", Boolean),
            ("B-U-Punkbuster", Boolean),
            ("NF", Integer),
            ("B-U-elo", Integer),
            ("B-maxObservers", Integer),
            ("PW", Boolean),
            ("AP", Integer),
            ("TID", Integer),
            ("B-U-playgroup", Boolean),
            ("B-U-coralsea", Boolean),
        ],
        ValueKind::Text,
    )
}

fn details_table() -> KeyTable {
    use ValueKind::{Boolean, Float, Integer};
    KeyTable::from_static(
        &[
            ("D-ThreeDSpotting", Boolean),
            ("D-FriendlyFire", Float),
            ("D-ServerDescriptionCount", Integer),
            ("LID", Integer),
            ("D-AutoBalance", Boolean),
            ("D-Minimap", Boolean),
            ("D-ThirdPersonVehicleCameras", Boolean),
            ("GID", Integer),
            ("TID", Integer),
            ("D-Crosshair", Boolean),
            ("D-MinimapSpotting", Boolean),
            ("D-KillCam", Boolean),
        ],
        ValueKind::Text,
    )
}

fn player_table() -> KeyTable {
    use ValueKind::Integer;
    KeyTable::from_static(
        &[
            ("TID", Integer),
            ("PID", Integer),
            ("UID", Integer),
            ("LID", Integer),
            ("GID", Integer),
        ],
        ValueKind::Text,
    )
}

/// Decodes a record, dropping the per-frame transaction id
fn attributes(table: &KeyTable, record: &Payload) -> Result<Attributes> {
    let mut decoded = table.decode_record(record)?;
    decoded.shift_remove("TID");
    Ok(decoded)
}

fn id(attributes: &Attributes, record: &'static str, key: &str) -> Result<u64> {
    attributes
        .get(key)
        .and_then(Value::as_i64)
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| Error::MissingField {
            record,
            key: key.to_string(),
        })
}

fn int(attributes: &Attributes, key: &str) -> Option<i64> {
    attributes.get(key).and_then(Value::as_i64)
}

fn string(attributes: &Attributes, key: &str) -> Option<String> {
    attributes.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Query filters shared by lobby and server listings
fn with_filters(payload: Payload) -> Payload {
    payload
        .with("FILTER-FAV-ONLY", 0)
        .with("FILTER-NOT-FULL", 0)
        .with("FILTER-NOT-PRIVATE", 0)
        .with("FILTER-NOT-CLOSED", 0)
        .with("FILTER-MIN-SIZE", 0)
        .with("FAV-PLAYER", "")
        .with("FAV-GAME", "")
        .with("FAV-PLAYER-UID", "")
        .with("FAV-GAME-UID", "")
}

fn require_observed(session: &Session, lobby_id: u64) -> Result<()> {
    if session.has_observed_lobby(lobby_id) {
        Ok(())
    } else {
        Err(Error::Protocol(ProtocolError::new(
            ProtocolErrorKind::NotFound,
            format!("lobby {lobby_id} was not part of a lobby listing on this connection"),
        )))
    }
}

/// Server facts from the connect acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectInfo {
    pub server_time: Option<String>,
    pub activity_timeout_secs: Option<u64>,
}

/// Theater connect handshake
#[derive(Debug, Clone)]
pub struct Connect {
    pub client_string: String,
}

impl Operation for Connect {
    type Output = ConnectInfo;

    fn name(&self) -> &'static str {
        "theater connect"
    }

    fn required_state(&self) -> SessionState {
        SessionState::Connected
    }

    fn request(&self, session: &mut Session) -> Result<Request> {
        let payload = Payload::new()
            .with("PROT", 2)
            .with("PROD", &self.client_string)
            .with("VERS", "1.0")
            .with("PLAT", CLIENT_PLATFORM)
            .with("LOCALE", "en_US")
            .with("SDKVERSION", "5.0.0.0.0");
        session.transition(SessionState::HelloSent)?;
        Ok(Request::new(Tag::CONN, payload))
    }

    fn complete(self, session: &mut Session, response: LogicalResponse) -> Result<ConnectInfo> {
        let payload = response.payload();
        session.transition(SessionState::ChallengePending)?;
        Ok(ConnectInfo {
            server_time: payload.field("TIME").map(unquote),
            activity_timeout_secs: payload
                .field("activityTimeoutSecs")
                .and_then(|raw| raw.trim().parse().ok()),
        })
    }

    fn rejected(&self, session: &mut Session, error: ProtocolError) -> Error {
        session.close();
        Error::Protocol(error)
    }
}

/// Authenticates the Theater connection with a FESL login key
#[derive(Debug, Clone)]
pub struct Authenticate {
    pub login_key: String,
}

impl Operation for Authenticate {
    type Output = String;

    fn name(&self) -> &'static str {
        "theater authentication"
    }

    fn required_state(&self) -> SessionState {
        SessionState::ChallengePending
    }

    fn request(&self, _session: &mut Session) -> Result<Request> {
        if self.login_key.is_empty() {
            return Err(Error::InvalidArgument("login key is empty".into()));
        }
        let payload = Payload::new()
            .with("MAC", NULL_MAC_ADDRESS)
            .with("SKU", THEATER_SKU)
            .with("LKEY", &self.login_key)
            .with("NAME", "");
        Ok(Request::new(Tag::USER, payload))
    }

    fn complete(self, session: &mut Session, response: LogicalResponse) -> Result<String> {
        let name = response.payload().field("NAME").map(unquote).unwrap_or_default();
        session.transition(SessionState::Authenticated)?;
        info!("theater session authenticated as {:?}", name);
        Ok(name)
    }

    fn rejected(&self, session: &mut Session, error: ProtocolError) -> Error {
        session.close();
        Error::Protocol(error.with_kind(ProtocolErrorKind::AuthenticationFailed))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lobby {
    pub id: u64,
    pub name: String,
    pub num_games: Option<i64>,
    pub max_games: Option<i64>,
    pub attributes: Attributes,
}

/// Lists the lobbies of the platform
#[derive(Debug, Clone, Copy, Default)]
pub struct GetLobbies;

impl Operation for GetLobbies {
    type Output = Vec<Lobby>;

    fn name(&self) -> &'static str {
        "lobby list"
    }

    fn request(&self, _session: &mut Session) -> Result<Request> {
        Ok(
            Request::new(Tag::LLST, with_filters(Payload::new()))
                .followed_by(Tag::LDAT, TrailerCount::Field("NUM-LOBBIES")),
        )
    }

    fn complete(self, session: &mut Session, response: LogicalResponse) -> Result<Vec<Lobby>> {
        let table = lobby_table();
        let mut lobbies = Vec::new();
        for record in response.payload().list(&FieldPath::key(Tag::LDAT.as_str()))? {
            let attributes = attributes(&table, &record)?;
            let id = id(&attributes, "lobby", "LID")?;
            session.observe_lobby(id);
            lobbies.push(Lobby {
                id,
                name: string(&attributes, "NAME").unwrap_or_default(),
                num_games: int(&attributes, "NUM-GAMES"),
                max_games: int(&attributes, "MAX-GAMES"),
                attributes,
            });
        }
        Ok(lobbies)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Server {
    pub lobby_id: u64,
    pub game_id: u64,
    pub name: String,
    pub address: Option<String>,
    pub port: Option<i64>,
    pub active_players: Option<i64>,
    pub max_players: Option<i64>,
    pub attributes: Attributes,
}

impl Server {
    fn from_record(table: &KeyTable, record: &Payload) -> Result<Self> {
        let attributes = attributes(table, record)?;
        Ok(Self {
            lobby_id: id(&attributes, "server", "LID")?,
            game_id: id(&attributes, "server", "GID")?,
            name: string(&attributes, "N").unwrap_or_default(),
            address: string(&attributes, "I"),
            port: int(&attributes, "P"),
            active_players: int(&attributes, "AP"),
            max_players: int(&attributes, "MP"),
            attributes,
        })
    }
}

/// Lists the game servers in one previously listed lobby
#[derive(Debug, Clone, Copy)]
pub struct GetServers {
    pub lobby_id: u64,
}

impl Operation for GetServers {
    type Output = Vec<Server>;

    fn name(&self) -> &'static str {
        "server list"
    }

    fn request(&self, session: &mut Session) -> Result<Request> {
        require_observed(session, self.lobby_id)?;
        let payload = with_filters(Payload::new().with("LID", self.lobby_id).with("TYPE", ""))
            .with("COUNT", -1);
        Ok(Request::new(Tag::GLST, payload)
            .followed_by(Tag::GDAT, TrailerCount::Field("NUM-GAMES")))
    }

    fn complete(self, _session: &mut Session, response: LogicalResponse) -> Result<Vec<Server>> {
        let table = server_table();
        response
            .payload()
            .list(&FieldPath::key(Tag::GDAT.as_str()))?
            .iter()
            .map(|record| Server::from_record(&table, record))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Player {
    pub name: String,
    pub user_id: Option<i64>,
    pub persona_id: Option<i64>,
    pub attributes: Attributes,
}

/// General info, detailed settings and players of one server
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerDetails {
    pub general: Server,
    pub details: Attributes,
    pub players: Vec<Player>,
}

/// Fetches everything known about one server
#[derive(Debug, Clone, Copy)]
pub struct GetServerDetails {
    pub lobby_id: u64,
    pub game_id: u64,
}

impl Operation for GetServerDetails {
    type Output = ServerDetails;

    fn name(&self) -> &'static str {
        "server details"
    }

    fn request(&self, session: &mut Session) -> Result<Request> {
        require_observed(session, self.lobby_id)?;
        let payload = Payload::new()
            .with("LID", self.lobby_id)
            .with("GID", self.game_id);
        Ok(Request::new(Tag::GDAT, payload)
            .followed_by(Tag::GDET, TrailerCount::Fixed(1))
            .followed_by(Tag::PDAT, TrailerCount::Field("AP")))
    }

    fn complete(self, _session: &mut Session, response: LogicalResponse) -> Result<ServerDetails> {
        let payload = response.payload();
        let general = Server::from_record(
            &server_table(),
            &payload.subtree(&FieldPath::key(Tag::GDAT.as_str())),
        )?;

        let details_table = details_table();
        let details = match payload.list(&FieldPath::key(Tag::GDET.as_str()))?.first() {
            Some(record) => attributes(&details_table, record)?,
            None => Attributes::new(),
        };

        let player_table = player_table();
        let players = payload
            .list(&FieldPath::key(Tag::PDAT.as_str()))?
            .iter()
            .map(|record| {
                let attributes = attributes(&player_table, record)?;
                Ok(Player {
                    name: string(&attributes, "NAME").unwrap_or_default(),
                    user_id: int(&attributes, "UID"),
                    persona_id: int(&attributes, "PID"),
                    attributes,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ServerDetails {
            general,
            details,
            players,
        })
    }
}
