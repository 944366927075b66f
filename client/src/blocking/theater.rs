use super::DefaultTransport;
use super::connection::Connection;
use crate::options::ClientOptions;
use crate::transport::{Stream, StreamTransport, Transport, connect_tcp};
use protocol::theater::{
    Authenticate, Connect, ConnectInfo, GetLobbies, GetServerDetails, GetServers, Lobby, Server,
    ServerDetails,
};
use protocol::{Dialect, Result, Session, SessionState, TheaterEndpoint};
use tracing::info;

/// Blocking client for the lobby and server listing service
pub struct TheaterClient<T = DefaultTransport> {
    connection: Connection<T>,
    client_string: &'static str,
}

impl TheaterClient<DefaultTransport> {
    pub fn connect(endpoint: &TheaterEndpoint, options: &ClientOptions) -> Result<Self> {
        let stream = connect_tcp(&endpoint.host, endpoint.port, options.timeout)?;
        info!("connected to Theater at {}:{}", endpoint.host, endpoint.port);
        let stream: Box<dyn Stream> = Box::new(stream);
        Self::new(StreamTransport::new(stream, options.timeout), options)
    }
}

impl<T: Transport> TheaterClient<T> {
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

    pub fn hello(&mut self) -> Result<ConnectInfo> {
        self.connection.call(Connect {
            client_string: self.client_string.to_string(),
        })
    }

    pub fn authenticate(&mut self, login_key: &str) -> Result<String> {
        if self.state() == SessionState::Connected {
            self.hello()?;
        }
        self.connection.call(Authenticate {
            login_key: login_key.to_string(),
        })
    }

    pub fn get_lobbies(&mut self) -> Result<Vec<Lobby>> {
        self.connection.call(GetLobbies)
    }

    pub fn get_servers(&mut self, lobby_id: u64) -> Result<Vec<Server>> {
        self.connection.call(GetServers { lobby_id })
    }

    pub fn get_server_details(&mut self, lobby_id: u64, game_id: u64) -> Result<ServerDetails> {
        self.connection.call(GetServerDetails { lobby_id, game_id })
    }

    pub fn close(mut self) -> Result<()> {
        self.connection.close()
    }
}
