//! Async FESL client

use crate::connection::Connection;
use crate::options::ClientOptions;
use crate::transport::{
    AsyncStream, AsyncStreamTransport, AsyncTransport, connect_tcp_async, connect_tls_async,
};
use protocol::fesl::{
    GetLeaderboard, GetStats, Hello, HelloInfo, LeaderboardEntry, Login, LoginInfo, LookupType,
    LookupUsers, Persona, Search, SearchHit, StatsRecord, goodbye_request,
};
use protocol::{
    Dialect, Error, Namespace, ProtocolError, ProtocolErrorKind, Result, Session, SessionState,
    StatsCatalog, TheaterEndpoint,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Account credentials for the FESL login
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Transport type produced by [`FeslClient::connect`]
pub type DefaultTransport = AsyncStreamTransport<Box<dyn AsyncStream>>;

pub(crate) fn first_or_not_found(mut personas: Vec<Persona>, what: String) -> Result<Persona> {
    if personas.is_empty() {
        return Err(Error::Protocol(ProtocolError::new(
            ProtocolErrorKind::NotFound,
            format!("no persona matches {what}"),
        )));
    }
    Ok(personas.swap_remove(0))
}

/// Client for the account and stats service
///
/// Queries require [`login`](Self::login) to have completed; calling them
/// earlier fails with [`Error::InvalidState`] before anything is sent.
pub struct FeslClient<T = DefaultTransport> {
    connection: Connection<T>,
    credentials: Credentials,
    catalog: Arc<StatsCatalog>,
    namespace: Namespace,
}

impl FeslClient<DefaultTransport> {
    /// Opens the platform's FESL connection
    pub async fn connect(credentials: Credentials, options: &ClientOptions) -> Result<Self> {
        let (host, port) = options.endpoint();
        let stream: Box<dyn AsyncStream> = if options.use_tls {
            Box::new(connect_tls_async(&host, port, options.timeout).await?)
        } else {
            Box::new(connect_tcp_async(&host, port, options.timeout).await?)
        };
        info!("connected to FESL at {}:{}", host, port);
        Self::new(
            AsyncStreamTransport::new(stream, options.timeout),
            credentials,
            options,
        )
    }
}

impl<T: AsyncTransport> FeslClient<T> {
    /// Wraps an already connected transport
    pub fn new(transport: T, credentials: Credentials, options: &ClientOptions) -> Result<Self> {
        Ok(Self {
            connection: Connection::new(transport, Dialect::Fesl, options.platform)?,
            credentials,
            catalog: options.catalog.clone(),
            namespace: options.namespace,
        })
    }

    pub fn session(&self) -> &Session {
        self.connection.session()
    }

    pub fn state(&self) -> SessionState {
        self.connection.state()
    }

    pub fn outstanding_requests(&self) -> usize {
        self.connection.outstanding()
    }

    /// Namespace used by the lookup and search shorthands
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub async fn hello(&mut self) -> Result<HelloInfo> {
        self.connection.call(Hello).await
    }

    /// Runs the handshake as far as needed and logs in
    pub async fn login(&mut self) -> Result<LoginInfo> {
        if self.state() == SessionState::Authenticated {
            return self.login_info();
        }
        if self.state() == SessionState::Connected {
            self.hello().await?;
        }
        // The memory check push may arrive after the hello response
        self.connection
            .wait_until(|state| state != SessionState::HelloSent)
            .await?;
        let login = Login {
            username: self.credentials.username.clone(),
            password: self.credentials.password.clone(),
        };
        self.connection.call(login).await
    }

    fn login_info(&self) -> Result<LoginInfo> {
        let session = self.session();
        Ok(LoginInfo {
            login_key: session.login_key()?.to_string(),
            account: session.account().cloned().unwrap_or_default(),
        })
    }

    async fn lookup(
        &mut self,
        identifiers: Vec<String>,
        lookup_type: LookupType,
        namespace: Namespace,
    ) -> Result<Vec<Persona>> {
        self.connection
            .call(LookupUsers {
                identifiers,
                lookup_type,
                namespace,
            })
            .await
    }

    /// Exact-name lookup; unknown names are left out of the result
    pub async fn lookup_usernames<S: AsRef<str>>(
        &mut self,
        names: &[S],
        namespace: Namespace,
    ) -> Result<Vec<Persona>> {
        let names = names.iter().map(|n| n.as_ref().to_string()).collect();
        self.lookup(names, LookupType::ByName, namespace).await
    }

    pub async fn lookup_user_ids(&mut self, ids: &[i64], namespace: Namespace) -> Result<Vec<Persona>> {
        let ids = ids.iter().map(i64::to_string).collect();
        self.lookup(ids, LookupType::ById, namespace).await
    }

    /// Single-name lookup; no match is [`ProtocolErrorKind::NotFound`]
    pub async fn lookup_username(&mut self, name: &str, namespace: Namespace) -> Result<Persona> {
        let personas = self.lookup_usernames(&[name], namespace).await?;
        first_or_not_found(personas, format!("name {name:?}"))
    }

    pub async fn lookup_user_id(&mut self, id: i64, namespace: Namespace) -> Result<Persona> {
        let personas = self.lookup_user_ids(&[id], namespace).await?;
        first_or_not_found(personas, format!("user id {id}"))
    }

    pub async fn search_name(&mut self, screen_name: &str, namespace: Namespace) -> Result<Vec<SearchHit>> {
        self.connection
            .call(Search {
                screen_name: screen_name.to_string(),
                namespace,
            })
            .await
    }

    /// Stats of one player; an empty key list requests every catalog key
    pub async fn get_stats<S: AsRef<str>>(&mut self, user_id: i64, keys: &[S]) -> Result<StatsRecord> {
        let operation = self.stats_operation(user_id, keys);
        self.connection.call(operation).await
    }

    /// Stats of several players, pipelined on this connection
    pub async fn get_stats_many<S: AsRef<str>>(
        &mut self,
        user_ids: &[i64],
        keys: &[S],
    ) -> Result<Vec<StatsRecord>> {
        let operations = user_ids
            .iter()
            .map(|user_id| self.stats_operation(*user_id, keys))
            .collect();
        self.connection.call_many(operations).await
    }

    fn stats_operation<S: AsRef<str>>(&self, user_id: i64, keys: &[S]) -> GetStats {
        GetStats {
            user_id,
            keys: keys.iter().map(|k| k.as_ref().to_string()).collect(),
            catalog: self.catalog.clone(),
        }
    }

    /// Ranks `min_rank..=max_rank` ordered by `sort_by`
    pub async fn get_leaderboard<S: AsRef<str>>(
        &mut self,
        min_rank: u32,
        max_rank: u32,
        sort_by: &str,
        keys: &[S],
    ) -> Result<Vec<LeaderboardEntry>> {
        self.connection
            .call(GetLeaderboard {
                sort_by: sort_by.to_string(),
                min_rank,
                max_rank,
                keys: keys.iter().map(|k| k.as_ref().to_string()).collect(),
                catalog: self.catalog.clone(),
            })
            .await
    }

    /// Theater endpoint announced during the handshake
    pub fn theater_details(&self) -> Result<TheaterEndpoint> {
        self.session().theater_endpoint().cloned()
    }

    /// Login key for authenticating a Theater connection
    pub fn login_key(&self) -> Result<String> {
        self.session().login_key().map(str::to_string)
    }

    /// Says goodbye when logged in, then ends the session and shuts the
    /// transport down
    pub async fn logout(&mut self) -> Result<()> {
        if self.state() == SessionState::Authenticated {
            debug!("sending goodbye");
            self.connection.notify(goodbye_request()).await?;
        }
        self.connection.close().await
    }

    /// Consuming form of [`logout`](Self::logout)
    pub async fn close(mut self) -> Result<()> {
        self.logout().await
    }
}
