//! Request/response correlation for one connection
//!
//! The correlator allocates sequence ids, encodes requests into an outbox,
//! routes inbound frames to their pending request and reassembles
//! multi-frame responses into one [`LogicalResponse`].
//!
//! Two reassembly rules exist:
//!
//! - FESL responses are either a single frame, or a run of continued frames
//!   each carrying `size` (total encoded length) and `data` (a percent-quoted
//!   base64 chunk). The run is complete once the decoded chunks add up to
//!   `size`. Every chunk but the last must be as long as the first.
//! - Theater responses are count driven: the leading frame announces how
//!   many trailing frames of each tag follow, e.g. `NUM-GAMES` `GDAT` frames
//!   after a `GLST`.
//!
//! FESL requests are pipelined. Theater matches responses by `TID` but
//! servers answer strictly in order, so Theater requests are released one
//! at a time; later requests wait in the outbox until the current one
//! resolves.

use crate::constants::{FRAGMENT_SIZE, HEADER_LENGTH, MAX_CHUNKED_SIZE, TransmissionType};
use crate::error::{Error, Result};
use crate::packets::{Dialect, Direction, Frame, Tag, TheaterStatus};
use crate::payload::{FieldPath, Payload};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, percent_encode};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace};

/// Characters left unescaped in chunk data, matching URL quoting rules
const CHUNK_DATA: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// How requests share a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// Any number of requests in flight, matched by sequence id
    Pipelined,
    /// One request in flight, the rest held back in order
    Serial,
}

impl Discipline {
    pub fn for_dialect(dialect: Dialect) -> Self {
        match dialect {
            Dialect::Fesl => Self::Pipelined,
            Dialect::Theater => Self::Serial,
        }
    }
}

/// How many trailing frames of a tag follow the leading frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrailerCount {
    Fixed(usize),
    /// Count announced by a field of the leading frame
    Field(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    pub tag: Tag,
    pub count: TrailerCount,
}

/// A logical request before sequence id allocation
#[derive(Debug, Clone)]
pub struct Request {
    pub tag: Tag,
    pub payload: Payload,
    chunked: bool,
    trailers: Vec<Trailer>,
}

impl Request {
    pub fn new(tag: Tag, payload: Payload) -> Self {
        Self {
            tag,
            payload,
            chunked: false,
            trailers: Vec::new(),
        }
    }

    /// Send the payload base64 encoded across continued frames
    pub fn chunked(mut self) -> Self {
        self.chunked = true;
        self
    }

    /// Expect trailing frames after the leading response frame
    pub fn followed_by(mut self, tag: Tag, count: TrailerCount) -> Self {
        self.trailers.push(Trailer { tag, count });
        self
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn trailers(&self) -> &[Trailer] {
        &self.trailers
    }
}

/// A complete response, reassembled from one or more frames
///
/// For count-driven responses the leading frame's fields sit below its tag
/// (`GDAT.NAME`) and trailing frames form lists (`PDAT.0.UID`, `PDAT.[]`).
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalResponse {
    tag: Tag,
    sequence_id: u32,
    frame_count: usize,
    payload: Payload,
}

impl LogicalResponse {
    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn sequence_id(&self) -> u32 {
        self.sequence_id
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

/// Outcome of routing one inbound frame
#[derive(Debug)]
pub enum Routed {
    /// The frame completed (or failed) the request with this id
    Resolved(u32),
    /// The frame was absorbed into a still incomplete response
    Partial(u32),
    /// No request is waiting for this frame
    Unsolicited(Frame),
}

/// Splits `payload` into base64 chunk frames that fit `fragment_size`
pub fn chunk_frames(
    tag: Tag,
    transmission: TransmissionType,
    sequence_id: u32,
    payload: &Payload,
    fragment_size: usize,
) -> Result<Vec<Frame>> {
    let encoded = BASE64.encode(payload.to_bytes()?);
    let size = encoded.len().to_string();
    let overhead = HEADER_LENGTH + 1 + "size=".len() + size.len() + "\ndata=".len();
    // Worst case every character is escaped as %XX
    let capacity = fragment_size
        .checked_sub(overhead)
        .map(|available| available / 3)
        .filter(|capacity| *capacity > 0)
        .ok_or_else(|| {
            Error::InvalidArgument(format!("fragment size {fragment_size} is too small"))
        })?;

    let frame = |chunk: &[u8]| {
        Frame::fesl(
            tag,
            transmission,
            sequence_id,
            Payload::new()
                .with("size", &size)
                .with("data", percent_encode(chunk, CHUNK_DATA)),
        )
    };
    if encoded.is_empty() {
        return Ok(vec![frame(&[])]);
    }
    Ok(encoded.as_bytes().chunks(capacity).map(frame).collect())
}

#[derive(Debug)]
struct ChunkAssembly {
    size: usize,
    chunk_length: usize,
    saw_short_chunk: bool,
    data: String,
    frames: usize,
}

impl ChunkAssembly {
    fn new(size: usize, chunk_length: usize) -> Self {
        Self {
            size,
            chunk_length,
            saw_short_chunk: false,
            data: String::new(),
            frames: 0,
        }
    }

    fn accept(&mut self, size: usize, chunk: &str) -> Result<()> {
        if size != self.size {
            return Err(Error::MalformedFrame(format!(
                "chunk declares size {size}, earlier chunks declared {}",
                self.size
            )));
        }
        if self.saw_short_chunk {
            return Err(Error::MalformedFrame("chunk received after the final chunk".into()));
        }
        if chunk.len() > self.chunk_length {
            return Err(Error::MalformedFrame(format!(
                "chunk of {} bytes is longer than the leading chunk of {}",
                chunk.len(),
                self.chunk_length
            )));
        }
        self.saw_short_chunk = chunk.len() < self.chunk_length;
        self.data.push_str(chunk);
        self.frames += 1;
        if self.data.len() > self.size {
            return Err(Error::MalformedFrame(format!(
                "chunks carry {} bytes, more than the declared {}",
                self.data.len(),
                self.size
            )));
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.data.len() == self.size
    }

    fn decode(&self) -> Result<Payload> {
        let mut decoded = BASE64
            .decode(self.data.as_bytes())
            .map_err(|e| Error::MalformedFrame(format!("invalid base64 chunk data: {e}")))?;
        while decoded.last() == Some(&0) {
            decoded.pop();
        }
        Payload::from_bytes(&decoded)
    }
}

#[derive(Debug)]
struct CountedAssembly {
    payload: Payload,
    plan: VecDeque<(Tag, usize)>,
    lengths: Vec<(Tag, usize)>,
    received: usize,
    frames: usize,
}

impl CountedAssembly {
    fn new(lead: Frame, trailers: &[Trailer]) -> Result<Self> {
        let mut plan = VecDeque::with_capacity(trailers.len());
        for trailer in trailers {
            let count = match trailer.count {
                TrailerCount::Fixed(count) => count,
                TrailerCount::Field(field) => lead
                    .payload
                    .field(field)
                    .and_then(|raw| raw.trim().parse().ok())
                    .ok_or_else(|| {
                        Error::MalformedFrame(format!(
                            "{} frame lacks a valid {field} count",
                            lead.tag
                        ))
                    })?,
            };
            plan.push_back((trailer.tag, count));
        }

        let mut assembly = Self {
            payload: lead.payload.nested_under(&FieldPath::key(lead.tag.as_str())),
            lengths: plan.iter().copied().collect(),
            plan,
            received: 0,
            frames: 1,
        };
        assembly.settle();
        Ok(assembly)
    }

    /// Drops fully received trailer groups from the front of the plan
    fn settle(&mut self) {
        while let Some(&(_, count)) = self.plan.front() {
            if self.received < count {
                break;
            }
            self.plan.pop_front();
            self.received = 0;
        }
    }

    fn accept(&mut self, frame: Frame) -> Result<()> {
        let Some(&(expected, _)) = self.plan.front() else {
            return Err(Error::MalformedFrame(format!(
                "unexpected {} frame after a complete response",
                frame.tag
            )));
        };
        if frame.tag != expected {
            return Err(Error::MalformedFrame(format!(
                "expected a {expected} frame, got {}",
                frame.tag
            )));
        }
        let prefix = FieldPath::key(expected.as_str()).index(self.received);
        self.payload.extend(frame.payload.nested_under(&prefix));
        self.received += 1;
        self.frames += 1;
        self.settle();
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.plan.is_empty()
    }

    fn finish(mut self) -> (Payload, usize) {
        for (tag, count) in self.lengths {
            self.payload
                .insert(FieldPath::key(tag.as_str()).list_length(), count);
        }
        (self.payload, self.frames)
    }
}

#[derive(Debug)]
enum Assembly {
    Waiting,
    Chunks(ChunkAssembly),
    Counted(CountedAssembly),
}

#[derive(Debug)]
struct Pending {
    tag: Tag,
    trailers: Vec<Trailer>,
    assembly: Assembly,
}

impl Pending {
    fn absorb(&mut self, sequence_id: u32, frame: Frame) -> Result<Option<LogicalResponse>> {
        let response = |tag, frame_count, payload| LogicalResponse {
            tag,
            sequence_id,
            frame_count,
            payload,
        };

        match &mut self.assembly {
            Assembly::Waiting if !self.trailers.is_empty() => {
                self.expect_tag(&frame)?;
                let assembly = CountedAssembly::new(frame, &self.trailers)?;
                if assembly.is_complete() {
                    let (payload, frames) = assembly.finish();
                    return Ok(Some(response(self.tag, frames, payload)));
                }
                self.assembly = Assembly::Counted(assembly);
                Ok(None)
            }
            Assembly::Counted(assembly) => {
                assembly.accept(frame)?;
                if !assembly.is_complete() {
                    return Ok(None);
                }
                let Assembly::Counted(assembly) =
                    std::mem::replace(&mut self.assembly, Assembly::Waiting)
                else {
                    return Ok(None);
                };
                let (payload, frames) = assembly.finish();
                Ok(Some(response(self.tag, frames, payload)))
            }
            Assembly::Waiting if !frame.is_continued() => {
                self.expect_tag(&frame)?;
                Ok(Some(response(self.tag, 1, frame.payload)))
            }
            Assembly::Chunks(_) if !frame.is_continued() => Err(Error::MalformedFrame(
                "single frame interrupted a chunked response".into(),
            )),
            Assembly::Waiting | Assembly::Chunks(_) => {
                self.expect_tag(&frame)?;
                let (size, chunk) = chunk_fields(&frame)?;
                if !matches!(self.assembly, Assembly::Chunks(_)) {
                    self.assembly = Assembly::Chunks(ChunkAssembly::new(size, chunk.len()));
                }
                let Assembly::Chunks(chunks) = &mut self.assembly else {
                    return Ok(None);
                };
                chunks.accept(size, &chunk)?;
                trace!(
                    "chunk {} of response {}: {}/{} bytes",
                    chunks.frames,
                    sequence_id,
                    chunks.data.len(),
                    chunks.size
                );
                if !chunks.is_complete() {
                    return Ok(None);
                }
                let payload = chunks.decode()?;
                Ok(Some(response(self.tag, chunks.frames, payload)))
            }
        }
    }

    fn expect_tag(&self, frame: &Frame) -> Result<()> {
        if frame.tag == self.tag {
            Ok(())
        } else {
            Err(Error::MalformedFrame(format!(
                "response tag {} does not match request tag {}",
                frame.tag, self.tag
            )))
        }
    }
}

fn chunk_fields(frame: &Frame) -> Result<(usize, String)> {
    let size = frame
        .payload
        .field("size")
        .and_then(|raw| raw.trim().parse().ok())
        .ok_or_else(|| Error::MalformedFrame("chunk lacks a valid size".into()))?;
    if size > MAX_CHUNKED_SIZE {
        return Err(Error::MalformedFrame(format!(
            "chunk declares size {size}, more than the maximum of {MAX_CHUNKED_SIZE}"
        )));
    }
    let data = frame
        .payload
        .field("data")
        .ok_or_else(|| Error::MalformedFrame("chunk lacks data".into()))?;
    let chunk = percent_decode_str(data)
        .decode_utf8()
        .map_err(|e| Error::MalformedFrame(format!("chunk data is not valid UTF-8: {e}")))?;
    Ok((size, chunk.into_owned()))
}

/// Sequence id allocation and response routing for one connection
#[derive(Debug)]
pub struct Correlator {
    dialect: Dialect,
    discipline: Discipline,
    next_sequence_id: u64,
    pending: HashMap<u32, Pending>,
    completed: HashMap<u32, Result<LogicalResponse>>,
    outbox: VecDeque<Vec<u8>>,
    held: VecDeque<(u32, Vec<u8>)>,
    in_flight: Option<u32>,
}

impl Correlator {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            discipline: Discipline::for_dialect(dialect),
            next_sequence_id: 1,
            pending: HashMap::new(),
            completed: HashMap::new(),
            outbox: VecDeque::new(),
            held: VecDeque::new(),
            in_flight: None,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    fn allocate(&mut self) -> Result<u32> {
        let max = self.dialect.max_sequence_id();
        if self.next_sequence_id > u64::from(max) {
            return Err(Error::SequenceExhausted { max });
        }
        let sequence_id = self.next_sequence_id as u32;
        self.next_sequence_id += 1;
        Ok(sequence_id)
    }

    fn encode(&self, sequence_id: u32, request: &Request) -> Result<Vec<u8>> {
        match self.dialect {
            Dialect::Fesl if request.chunked => {
                let mut bytes = Vec::new();
                for frame in chunk_frames(
                    request.tag,
                    TransmissionType::MultiRequest,
                    sequence_id,
                    &request.payload,
                    FRAGMENT_SIZE,
                )? {
                    bytes.extend(frame.to_bytes()?);
                }
                Ok(bytes)
            }
            Dialect::Fesl => Frame::fesl(
                request.tag,
                TransmissionType::SingleRequest,
                sequence_id,
                request.payload.clone(),
            )
            .to_bytes(),
            Dialect::Theater => Frame::theater(
                request.tag,
                TheaterStatus::Request,
                request.payload.clone().with("TID", sequence_id),
            )
            .to_bytes(),
        }
    }

    /// Registers a request and queues its bytes, returning its sequence id
    pub fn send(&mut self, request: Request) -> Result<u32> {
        let sequence_id = self.allocate()?;
        let bytes = self.encode(sequence_id, &request)?;
        self.pending.insert(
            sequence_id,
            Pending {
                tag: request.tag,
                trailers: request.trailers,
                assembly: Assembly::Waiting,
            },
        );

        match self.discipline {
            Discipline::Serial if self.in_flight.is_some() => {
                debug!("holding {} request {} behind {:?}", request.tag, sequence_id, self.in_flight);
                self.held.push_back((sequence_id, bytes));
            }
            Discipline::Serial => {
                self.in_flight = Some(sequence_id);
                self.outbox.push_back(bytes);
            }
            Discipline::Pipelined => self.outbox.push_back(bytes),
        }
        Ok(sequence_id)
    }

    /// Queues a request that expects no response
    pub fn notify(&mut self, request: Request) -> Result<u32> {
        let sequence_id = self.allocate()?;
        let bytes = self.encode(sequence_id, &request)?;
        self.outbox.push_back(bytes);
        Ok(sequence_id)
    }

    /// Queues a frame answering a server push
    pub fn reply(&mut self, frame: &Frame) -> Result<()> {
        self.outbox.push_back(frame.to_bytes()?);
        Ok(())
    }

    /// Next chunk of bytes ready for the transport
    pub fn take_outgoing(&mut self) -> Option<Vec<u8>> {
        self.outbox.pop_front()
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Routes one inbound frame
    pub fn on_frame(&mut self, frame: Frame) -> Result<Routed> {
        let sequence_id = frame.sequence_id();
        if frame.direction() == Direction::Request || !self.pending.contains_key(&sequence_id) {
            return Ok(Routed::Unsolicited(frame));
        }

        if let Some(error) = frame.error() {
            debug!("request {} rejected: {}", sequence_id, error);
            self.resolve(sequence_id, Err(Error::Protocol(error)));
            return Ok(Routed::Resolved(sequence_id));
        }

        let absorbed = match self.pending.get_mut(&sequence_id) {
            Some(pending) => pending.absorb(sequence_id, frame),
            None => return Ok(Routed::Partial(sequence_id)),
        };
        match absorbed {
            Ok(Some(response)) => {
                debug!(
                    "response {} complete: {} frame(s), {} field(s)",
                    sequence_id,
                    response.frame_count,
                    response.payload.len()
                );
                self.resolve(sequence_id, Ok(response));
                Ok(Routed::Resolved(sequence_id))
            }
            Ok(None) => Ok(Routed::Partial(sequence_id)),
            Err(e) => {
                self.pending.remove(&sequence_id);
                self.release_next(sequence_id);
                Err(e)
            }
        }
    }

    fn resolve(&mut self, sequence_id: u32, result: Result<LogicalResponse>) {
        if self.pending.remove(&sequence_id).is_some() {
            self.completed.insert(sequence_id, result);
            self.release_next(sequence_id);
        }
    }

    fn release_next(&mut self, resolved: u32) {
        if self.in_flight != Some(resolved) {
            return;
        }
        self.in_flight = None;
        if let Some((sequence_id, bytes)) = self.held.pop_front() {
            self.in_flight = Some(sequence_id);
            self.outbox.push_back(bytes);
        }
    }

    /// Removes and returns the result for `sequence_id`, once resolved
    pub fn take(&mut self, sequence_id: u32) -> Option<Result<LogicalResponse>> {
        self.completed.remove(&sequence_id)
    }

    pub fn is_pending(&self, sequence_id: u32) -> bool {
        self.pending.contains_key(&sequence_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Requests still awaiting a response or an owner to take it
    pub fn outstanding(&self) -> usize {
        self.pending.len() + self.completed.len()
    }

    /// Fails every unresolved request after the connection became unusable
    /// Forgets `sequence_id` whether or not its response has arrived
    ///
    /// A response arriving later is treated as unsolicited.
    pub fn discard(&mut self, sequence_id: u32) {
        self.pending.remove(&sequence_id);
        self.completed.remove(&sequence_id);
        self.held.retain(|(held, _)| *held != sequence_id);
        self.release_next(sequence_id);
    }

    pub fn abandon(&mut self, reason: &str) {
        let ids: Vec<u32> = self.pending.keys().copied().collect();
        for sequence_id in ids {
            self.pending.remove(&sequence_id);
            self.completed.insert(
                sequence_id,
                Err(Error::Transport(format!(
                    "connection unusable before response arrived: {reason}"
                ))),
            );
        }
        self.held.clear();
        self.outbox.clear();
        self.in_flight = None;
    }
}
