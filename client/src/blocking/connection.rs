//! Blocking driver loop around the protocol engine

use crate::transport::Transport;
use protocol::{
    Dialect, Engine, Error, LogicalResponse, Operation, Platform, Request, Result, Session,
    SessionState, Ticket,
};
use tracing::debug;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// One engine bound to one blocking transport
pub struct Connection<T> {
    engine: Engine,
    transport: T,
    buffer: Vec<u8>,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T, dialect: Dialect, platform: Platform) -> Result<Self> {
        let mut engine = Engine::new(dialect, platform);
        engine.connected()?;
        Ok(Self {
            engine,
            transport,
            buffer: vec![0; READ_BUFFER_SIZE],
        })
    }

    pub fn session(&self) -> &Session {
        self.engine.session()
    }

    pub fn state(&self) -> SessionState {
        self.engine.state()
    }

    pub fn call<O: Operation>(&mut self, operation: O) -> Result<O::Output> {
        let ticket = self.engine.start(&operation)?;
        let response = self.await_response(ticket)?;
        self.engine.finish(operation, response)
    }

    pub fn wait_until(&mut self, done: impl Fn(SessionState) -> bool) -> Result<()> {
        loop {
            self.flush()?;
            let state = self.engine.state();
            if done(state) {
                return Ok(());
            }
            if state.is_closed() {
                return Err(Error::InvalidState {
                    operation: "wait",
                    state,
                });
            }
            self.fill()?;
        }
    }

    pub fn notify(&mut self, request: Request) -> Result<()> {
        self.engine.notify(request)?;
        self.flush()
    }

    pub fn close(&mut self) -> Result<()> {
        self.engine.close();
        self.transport.shutdown()
    }

    fn await_response(&mut self, ticket: Ticket) -> Result<Result<LogicalResponse>> {
        loop {
            self.flush()?;
            if let Some(response) = self.engine.take_response(ticket) {
                return Ok(response);
            }
            self.fill()?;
        }
    }

    fn flush(&mut self) -> Result<()> {
        while let Some(bytes) = self.engine.take_outgoing() {
            debug!("writing {} bytes", bytes.len());
            if let Err(e) = self.transport.write_all(&bytes) {
                return Err(self.engine.poison(e));
            }
        }
        Ok(())
    }

    fn fill(&mut self) -> Result<()> {
        let read = match self.transport.read_some(&mut self.buffer) {
            Ok(read) => read,
            Err(e) => return Err(self.engine.poison(e)),
        };
        self.engine.receive(&self.buffer[..read])
    }
}
