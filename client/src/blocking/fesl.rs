use super::DefaultTransport;
use super::connection::Connection;
use crate::fesl::{Credentials, first_or_not_found};
use crate::options::ClientOptions;
use crate::transport::{Stream, StreamTransport, Transport, connect_tcp, connect_tls};
use protocol::fesl::{
    GetLeaderboard, GetStats, Hello, HelloInfo, LeaderboardEntry, Login, LoginInfo, LookupType,
    LookupUsers, Persona, Search, SearchHit, StatsRecord, goodbye_request,
};
use protocol::{
    Dialect, Namespace, Result, Session, SessionState, StatsCatalog, TheaterEndpoint,
};
use std::sync::Arc;
use tracing::info;

/// Blocking client for the account and stats service
pub struct FeslClient<T = DefaultTransport> {
    connection: Connection<T>,
    credentials: Credentials,
    catalog: Arc<StatsCatalog>,
    namespace: Namespace,
}

impl FeslClient<DefaultTransport> {
    pub fn connect(credentials: Credentials, options: &ClientOptions) -> Result<Self> {
        let (host, port) = options.endpoint();
        let stream: Box<dyn Stream> = if options.use_tls {
            Box::new(connect_tls(&host, port, options.timeout)?)
        } else {
            Box::new(connect_tcp(&host, port, options.timeout)?)
        };
        info!("connected to FESL at {}:{}", host, port);
        Self::new(
            StreamTransport::new(stream, options.timeout),
            credentials,
            options,
        )
    }
}

impl<T: Transport> FeslClient<T> {
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

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn hello(&mut self) -> Result<HelloInfo> {
        self.connection.call(Hello)
    }

    pub fn login(&mut self) -> Result<LoginInfo> {
        if self.state() == SessionState::Authenticated {
            let session = self.session();
            return Ok(LoginInfo {
                login_key: session.login_key()?.to_string(),
                account: session.account().cloned().unwrap_or_default(),
            });
        }
        if self.state() == SessionState::Connected {
            self.hello()?;
        }
        self.connection
            .wait_until(|state| state != SessionState::HelloSent)?;
        self.connection.call(Login {
            username: self.credentials.username.clone(),
            password: self.credentials.password.clone(),
        })
    }

    fn lookup(
        &mut self,
        identifiers: Vec<String>,
        lookup_type: LookupType,
        namespace: Namespace,
    ) -> Result<Vec<Persona>> {
        self.connection.call(LookupUsers {
            identifiers,
            lookup_type,
            namespace,
        })
    }

    pub fn lookup_usernames<S: AsRef<str>>(
        &mut self,
        names: &[S],
        namespace: Namespace,
    ) -> Result<Vec<Persona>> {
        let names = names.iter().map(|n| n.as_ref().to_string()).collect();
        self.lookup(names, LookupType::ByName, namespace)
    }

    pub fn lookup_user_ids(&mut self, ids: &[i64], namespace: Namespace) -> Result<Vec<Persona>> {
        let ids = ids.iter().map(i64::to_string).collect();
        self.lookup(ids, LookupType::ById, namespace)
    }

    pub fn lookup_username(&mut self, name: &str, namespace: Namespace) -> Result<Persona> {
        let personas = self.lookup_usernames(&[name], namespace)?;
        first_or_not_found(personas, format!("name {name:?}"))
    }

    pub fn lookup_user_id(&mut self, id: i64, namespace: Namespace) -> Result<Persona> {
        let personas = self.lookup_user_ids(&[id], namespace)?;
        first_or_not_found(personas, format!("user id {id}"))
    }

    pub fn search_name(&mut self, screen_name: &str, namespace: Namespace) -> Result<Vec<SearchHit>> {
        self.connection.call(Search {
            screen_name: screen_name.to_string(),
            namespace,
        })
    }

    pub fn get_stats<S: AsRef<str>>(&mut self, user_id: i64, keys: &[S]) -> Result<StatsRecord> {
        self.connection.call(GetStats {
            user_id,
            keys: keys.iter().map(|k| k.as_ref().to_string()).collect(),
            catalog: self.catalog.clone(),
        })
    }

    pub fn get_leaderboard<S: AsRef<str>>(
        &mut self,
        min_rank: u32,
        max_rank: u32,
        sort_by: &str,
        keys: &[S],
    ) -> Result<Vec<LeaderboardEntry>> {
        self.connection.call(GetLeaderboard {
            sort_by: sort_by.to_string(),
            min_rank,
            max_rank,
            keys: keys.iter().map(|k| k.as_ref().to_string()).collect(),
            catalog: self.catalog.clone(),
        })
    }

    pub fn theater_details(&self) -> Result<TheaterEndpoint> {
        self.session().theater_endpoint().cloned()
    }

    pub fn login_key(&self) -> Result<String> {
        self.session().login_key().map(str::to_string)
    }

    pub fn logout(&mut self) -> Result<()> {
        if self.state() == SessionState::Authenticated {
            self.connection.notify(goodbye_request())?;
        }
        self.connection.close()
    }

    pub fn close(mut self) -> Result<()> {
        self.logout()
    }
}
