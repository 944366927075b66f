//! Sans-IO protocol engine
//!
//! The engine owns the session, the frame decoder and the correlator of one
//! connection, but never touches a socket. Drivers feed it received bytes,
//! drain the bytes it wants written and hand completed responses back to the
//! operation that asked for them. Both the blocking and the async clients
//! are thin loops around this type.

use crate::codec::FrameDecoder;
use crate::constants::{Platform, TransmissionType};
use crate::correlation::{Correlator, LogicalResponse, Request, Routed};
use crate::error::{Error, ProtocolError, Result};
use crate::packets::{Dialect, Frame, Tag, TheaterStatus};
use crate::payload::Payload;
use crate::session::{Session, SessionState};
use tracing::{debug, warn};

/// One request/response exchange with typed output
pub trait Operation {
    type Output;

    /// Name used in state errors and logs
    fn name(&self) -> &'static str;

    /// State the session must be in before anything is sent
    fn required_state(&self) -> SessionState {
        SessionState::Authenticated
    }

    /// Builds the request; may advance the session
    fn request(&self, session: &mut Session) -> Result<Request>;

    /// Interprets the reassembled response
    fn complete(self, session: &mut Session, response: LogicalResponse) -> Result<Self::Output>;

    /// Maps a backend rejection to the error returned to the caller
    fn rejected(&self, _session: &mut Session, error: ProtocolError) -> Error {
        Error::Protocol(error)
    }
}

/// Handle for a started operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u32);

impl Ticket {
    pub fn sequence_id(&self) -> u32 {
        self.0
    }
}

#[derive(Debug)]
pub struct Engine {
    session: Session,
    decoder: FrameDecoder,
    correlator: Correlator,
}

impl Engine {
    pub fn new(dialect: Dialect, platform: Platform) -> Self {
        Self {
            session: Session::new(dialect, platform),
            decoder: FrameDecoder::new(dialect),
            correlator: Correlator::new(dialect),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn dialect(&self) -> Dialect {
        self.session.dialect()
    }

    /// Records that the transport is up
    pub fn connected(&mut self) -> Result<()> {
        self.session.transition(SessionState::Connected)
    }

    /// Checks the state gate and queues the operation's request
    ///
    /// Nothing is queued when the gate fails.
    pub fn start<O: Operation>(&mut self, operation: &O) -> Result<Ticket> {
        self.session
            .require(operation.name(), operation.required_state())?;
        let request = operation.request(&mut self.session)?;
        let tag = request.tag;
        match self.correlator.send(request) {
            Ok(sequence_id) => {
                debug!("{} sent as {} request {}", operation.name(), tag, sequence_id);
                Ok(Ticket(sequence_id))
            }
            Err(e) => Err(self.poison(e)),
        }
    }

    /// Queues a request whose response is never read
    pub fn notify(&mut self, request: Request) -> Result<()> {
        if self.session.is_closed() {
            return Err(Error::InvalidState {
                operation: "notify",
                state: self.session.state(),
            });
        }
        match self.correlator.notify(request) {
            Ok(_) => Ok(()),
            Err(e) => Err(self.poison(e)),
        }
    }

    pub fn take_outgoing(&mut self) -> Option<Vec<u8>> {
        self.correlator.take_outgoing()
    }

    pub fn has_outgoing(&self) -> bool {
        self.correlator.has_outgoing()
    }

    /// Feeds received bytes through the decoder and correlator
    pub fn receive(&mut self, data: &[u8]) -> Result<()> {
        let decoded: Result<Vec<Frame>> = self.decoder.feed(data).collect();
        let frames = match decoded {
            Ok(frames) => frames,
            Err(e) => return Err(self.poison(e)),
        };
        for frame in frames {
            match self.correlator.on_frame(frame) {
                Ok(Routed::Unsolicited(frame)) => {
                    if let Err(e) = self.handle_unsolicited(frame) {
                        return Err(self.poison(e));
                    }
                }
                Ok(Routed::Resolved(_) | Routed::Partial(_)) => {}
                Err(e) => return Err(self.poison(e)),
            }
        }
        Ok(())
    }

    fn handle_unsolicited(&mut self, frame: Frame) -> Result<()> {
        match (self.dialect(), frame.tag, frame.txn()) {
            (Dialect::Fesl, Tag::FSYS, Some("MemCheck")) => {
                debug!("answering memory check");
                self.correlator.reply(&Frame::fesl(
                    Tag::FSYS,
                    TransmissionType::SingleResponse,
                    0,
                    Payload::new().with("TXN", "MemCheck").with("result", ""),
                ))?;
                if self.session.state() == SessionState::HelloSent {
                    self.session.transition(SessionState::ChallengePending)?;
                }
                Ok(())
            }
            (Dialect::Fesl, Tag::FSYS, Some("Ping")) => {
                debug!("answering keep-alive ping");
                self.correlator.reply(&Frame::fesl(
                    Tag::FSYS,
                    TransmissionType::SingleResponse,
                    0,
                    Payload::new().with("TXN", "Ping"),
                ))
            }
            (Dialect::Theater, Tag::PING, _) => {
                debug!("answering theater ping");
                let tid = frame.payload.field("TID").unwrap_or("0").to_string();
                self.correlator.reply(&Frame::theater(
                    Tag::PING,
                    TheaterStatus::Ok,
                    Payload::new().with("TID", tid),
                ))
            }
            _ => {
                warn!(
                    "dropping unsolicited {} frame with sequence id {}",
                    frame.tag,
                    frame.sequence_id()
                );
                Ok(())
            }
        }
    }

    /// Removes the result for a ticket once its response is complete
    pub fn take_response(&mut self, ticket: Ticket) -> Option<Result<LogicalResponse>> {
        self.correlator.take(ticket.0)
    }

    /// Drops a ticket whose response will never be collected
    pub fn discard(&mut self, ticket: Ticket) {
        self.correlator.discard(ticket.0);
    }

    pub fn outstanding(&self) -> usize {
        self.correlator.outstanding()
    }

    pub fn is_pending(&self, ticket: Ticket) -> bool {
        self.correlator.is_pending(ticket.0)
    }

    /// Hands a response result to its operation
    pub fn finish<O: Operation>(
        &mut self,
        operation: O,
        response: Result<LogicalResponse>,
    ) -> Result<O::Output> {
        let name = operation.name();
        let result = match response {
            Ok(response) => operation.complete(&mut self.session, response),
            Err(Error::Protocol(error)) => Err(operation.rejected(&mut self.session, error)),
            Err(e) => Err(e),
        };
        match result {
            Ok(output) => Ok(output),
            Err(e) => {
                debug!("{} failed: {}", name, e);
                Err(self.poison(e))
            }
        }
    }

    /// Closes the session if `error` leaves the connection unusable
    pub fn poison(&mut self, error: Error) -> Error {
        if error.is_fatal() && !self.session.is_closed() {
            warn!("{:?} connection unusable: {}", self.dialect(), error);
            self.session.close();
            self.correlator.abandon(&error.to_string());
            self.decoder.reset();
        }
        error
    }

    /// Closes the session without an error
    pub fn close(&mut self) {
        self.session.close();
        self.correlator.abandon("connection closed");
    }
}
