//! Async Theater client

use crate::connection::Connection;
use crate::fesl::DefaultTransport;
use crate::options::ClientOptions;
use crate::transport::{AsyncStream, AsyncStreamTransport, AsyncTransport, connect_tcp_async};
use protocol::theater::{
    Authenticate, Connect, ConnectInfo, GetLobbies, GetServerDetails, GetServers, Lobby, Server,
    ServerDetails,
};
use protocol::{Dialect, Result, Session, SessionState, TheaterEndpoint};
use tracing::info;

/// Client for the lobby and server listing service
///
/// Authentication needs the login key of a logged in
/// [`FeslClient`](crate::FeslClient) on the same platform.
pub struct TheaterClient<T = DefaultTransport> {
    connection: Connection<T>,
    client_string: &'static str,
}

impl TheaterClient<DefaultTransport> {
    /// Opens a plain TCP connection to the announced endpoint
    pub async fn connect(endpoint: &TheaterEndpoint, options: &ClientOptions) -> Result<Self> {
        let stream = connect_tcp_async(&endpoint.host, endpoint.port, options.timeout).await?;
        info!("connected to Theater at {}:{}", endpoint.host, endpoint.port);
        let stream: Box<dyn AsyncStream> = Box::new(stream);
        Self::new(AsyncStreamTransport::new(stream, options.timeout), options)
    }
}

impl<T: AsyncTransport> TheaterClient<T> {
    pub fn new(transport: T, options: &ClientOptions) -> Result<Self> {
        Ok(Self {
            connection: Connection::new(transport, Dialect::Theater, options.platform)?,
            client_string: options.client_string(),
        })
    }

    pub fn session(&self) -> &Session {
        self.connection.session()
    }

    pub fn state(&self) -> SessionState {
        self.connection.state()
    }

    pub async fn hello(&mut self) -> Result<ConnectInfo> {
        let connect = Connect {
            client_string: self.client_string.to_string(),
        };
        self.connection.call(connect).await
    }

    /// Runs the connect handshake if needed, then presents the login key
    pub async fn authenticate(&mut self, login_key: &str) -> Result<String> {
        if self.state() == SessionState::Connected {
            self.hello().await?;
        }
        let authenticate = Authenticate {
            login_key: login_key.to_string(),
        };
        self.connection.call(authenticate).await
    }

    pub async fn get_lobbies(&mut self) -> Result<Vec<Lobby>> {
        self.connection.call(GetLobbies).await
    }

    /// Servers of a lobby returned by [`get_lobbies`](Self::get_lobbies)
    pub async fn get_servers(&mut self, lobby_id: u64) -> Result<Vec<Server>> {
        self.connection.call(GetServers { lobby_id }).await
    }

    pub async fn get_server_details(&mut self, lobby_id: u64, game_id: u64) -> Result<ServerDetails> {
        self.connection
            .call(GetServerDetails { lobby_id, game_id })
            .await
    }

    pub async fn close(mut self) -> Result<()> {
        self.connection.close().await
    }
}
