//! Async driver loop around the protocol engine

use crate::transport::AsyncTransport;
use protocol::{
    Dialect, Engine, Error, LogicalResponse, Operation, Platform, Request, Result, Session,
    SessionState, Ticket,
};
use tracing::debug;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// One engine bound to one async transport
///
/// Only transport reads and writes suspend. A failed read or write poisons
/// the engine, so every later call fails fast with an invalid state error.
pub struct Connection<T> {
    engine: Engine,
    transport: T,
    buffer: Vec<u8>,
}

impl<T: AsyncTransport> Connection<T> {
    /// Wraps a freshly opened transport
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

    /// Requests sent on this connection whose results nobody collected yet
    pub fn outstanding(&self) -> usize {
        self.engine.outstanding()
    }

    /// Runs one operation to completion
    pub async fn call<O: Operation>(&mut self, operation: O) -> Result<O::Output> {
        let ticket = self.engine.start(&operation)?;
        let response = self.await_response(ticket).await?;
        self.engine.finish(operation, response)
    }

    /// Sends every request before awaiting any response
    ///
    /// Responses are matched by sequence id, so the peer may answer in any
    /// order. Outputs are returned in request order. Every response is
    /// collected before the first failure is reported.
    pub async fn call_many<O: Operation>(&mut self, operations: Vec<O>) -> Result<Vec<O::Output>> {
        let mut tickets = Vec::with_capacity(operations.len());
        for operation in &operations {
            match self.engine.start(operation) {
                Ok(ticket) => tickets.push(ticket),
                Err(e) => {
                    self.discard_all(tickets);
                    return Err(e);
                }
            }
        }
        if let Err(e) = self.flush().await {
            self.discard_all(tickets);
            return Err(e);
        }

        let mut outputs = Vec::with_capacity(operations.len());
        let mut first_error = None;
        for (operation, ticket) in operations.into_iter().zip(tickets) {
            if first_error.is_some() && self.engine.state().is_closed() {
                self.engine.discard(ticket);
                continue;
            }
            let result = match self.await_response(ticket).await {
                Ok(response) => self.engine.finish(operation, response),
                Err(e) => {
                    self.engine.discard(ticket);
                    Err(e)
                }
            };
            match result {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(outputs),
        }
    }

    fn discard_all(&mut self, tickets: Vec<Ticket>) {
        for ticket in tickets {
            self.engine.discard(ticket);
        }
    }

    /// Reads until the session state satisfies `done`
    pub async fn wait_until(&mut self, done: impl Fn(SessionState) -> bool) -> Result<()> {
        loop {
            self.flush().await?;
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
            self.fill().await?;
        }
    }

    /// Sends a request without waiting for an answer
    pub async fn notify(&mut self, request: Request) -> Result<()> {
        self.engine.notify(request)?;
        self.flush().await
    }

    /// Closes the session and shuts the transport down
    pub async fn close(&mut self) -> Result<()> {
        self.engine.close();
        self.transport.shutdown().await
    }

    async fn await_response(&mut self, ticket: Ticket) -> Result<Result<LogicalResponse>> {
        loop {
            self.flush().await?;
            if let Some(response) = self.engine.take_response(ticket) {
                return Ok(response);
            }
            self.fill().await?;
        }
    }

    async fn flush(&mut self) -> Result<()> {
        while let Some(bytes) = self.engine.take_outgoing() {
            debug!("writing {} bytes", bytes.len());
            if let Err(e) = self.transport.write_all(&bytes).await {
                return Err(self.engine.poison(e));
            }
        }
        Ok(())
    }

    async fn fill(&mut self) -> Result<()> {
        let read = match self.transport.read_some(&mut self.buffer).await {
            Ok(read) => read,
            Err(e) => return Err(self.engine.poison(e)),
        };
        self.engine.receive(&self.buffer[..read])
    }
}
