//! Wire frame structures for the FESL and Theater dialects
//!
//! Every frame is a 12 byte header followed by a NUL terminated body:
//!
//! ```text
//! +--------+---------------+----------------------+----------------+
//! | tag(4) | status word(4)| total length(4, BE)  | body ... | 0x00 |
//! +--------+---------------+----------------------+----------------+
//! ```
//!
//! The status word differs per dialect. FESL packs a transmission type in
//! the high byte and a 24 bit sequence id below it. Theater uses `@\0\0\0`
//! for requests, zero for success and a four character error indicator,
//! carrying its sequence id as a `TID` payload field instead.

use crate::constants::{HEADER_LENGTH, MAX_FRAME_SIZE, MAX_FESL_SEQUENCE_ID, TransmissionType};
use crate::error::{Error, ProtocolError, Result};
use crate::payload::Payload;
use std::fmt;

/// Four character frame tag
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag([u8; 4]);

impl Tag {
    pub const ACCT: Tag = Tag(*b"acct");
    pub const FSYS: Tag = Tag(*b"fsys");
    pub const RANK: Tag = Tag(*b"rank");
    pub const RECP: Tag = Tag(*b"recp");

    pub const CONN: Tag = Tag(*b"CONN");
    pub const USER: Tag = Tag(*b"USER");
    pub const LLST: Tag = Tag(*b"LLST");
    pub const LDAT: Tag = Tag(*b"LDAT");
    pub const GLST: Tag = Tag(*b"GLST");
    pub const GDAT: Tag = Tag(*b"GDAT");
    pub const GDET: Tag = Tag(*b"GDET");
    pub const PDAT: Tag = Tag(*b"PDAT");
    pub const PING: Tag = Tag(*b"PING");

    pub const fn new(bytes: &[u8; 4]) -> Self {
        Self(*bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self.as_str())
    }
}

const FESL_TAGS: [Tag; 4] = [Tag::ACCT, Tag::FSYS, Tag::RANK, Tag::RECP];

const THEATER_TAGS: [Tag; 9] = [
    Tag::CONN,
    Tag::USER,
    Tag::LLST,
    Tag::LDAT,
    Tag::GLST,
    Tag::GDAT,
    Tag::GDET,
    Tag::PDAT,
    Tag::PING,
];

const THEATER_ERROR_INDICATORS: [Tag; 4] = [
    Tag(*b"ngam"),
    Tag(*b"nrom"),
    Tag(*b"bpar"),
    Tag(*b"ntfn"),
];

/// Protocol dialect spoken on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Account and stats service, spoken over TLS
    Fesl,
    /// Lobby and server browser, spoken over plain TCP
    Theater,
}

impl Dialect {
    pub fn accepts(self, tag: Tag) -> bool {
        match self {
            Self::Fesl => FESL_TAGS.contains(&tag),
            Self::Theater => THEATER_TAGS.contains(&tag),
        }
    }

    pub fn max_sequence_id(self) -> u32 {
        match self {
            Self::Fesl => MAX_FESL_SEQUENCE_ID,
            Self::Theater => crate::constants::MAX_THEATER_SEQUENCE_ID,
        }
    }
}

/// Theater status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TheaterStatus {
    Request,
    Ok,
    Error(Tag),
}

impl TheaterStatus {
    const REQUEST: [u8; 4] = *b"@\0\0\0";
    const OK: [u8; 4] = [0; 4];

    pub fn from_bytes(word: [u8; 4]) -> Option<Self> {
        match word {
            Self::REQUEST => Some(Self::Request),
            Self::OK => Some(Self::Ok),
            other => {
                let indicator = Tag(other);
                THEATER_ERROR_INDICATORS
                    .contains(&indicator)
                    .then_some(Self::Error(indicator))
            }
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        match self {
            Self::Request => Self::REQUEST,
            Self::Ok => Self::OK,
            Self::Error(indicator) => indicator.0,
        }
    }
}

/// Dialect specific part of a frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    Fesl {
        transmission: TransmissionType,
        sequence_id: u32,
    },
    Theater {
        status: TheaterStatus,
    },
}

impl Header {
    fn status_word(&self) -> Result<[u8; 4]> {
        match *self {
            Header::Fesl {
                transmission,
                sequence_id,
            } => {
                if sequence_id > MAX_FESL_SEQUENCE_ID {
                    return Err(Error::SequenceExhausted {
                        max: MAX_FESL_SEQUENCE_ID,
                    });
                }
                let [_, a, b, c] = sequence_id.to_be_bytes();
                Ok([transmission.to_u8(), a, b, c])
            }
            Header::Theater { status } => Ok(status.to_bytes()),
        }
    }
}

/// Whether a frame asks, answers or rejects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
    Error,
}

/// A single decoded wire frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub tag: Tag,
    pub header: Header,
    pub payload: Payload,
}

impl Frame {
    pub fn fesl(tag: Tag, transmission: TransmissionType, sequence_id: u32, payload: Payload) -> Self {
        Self {
            tag,
            header: Header::Fesl {
                transmission,
                sequence_id,
            },
            payload,
        }
    }

    pub fn theater(tag: Tag, status: TheaterStatus, payload: Payload) -> Self {
        Self {
            tag,
            header: Header::Theater { status },
            payload,
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self.header {
            Header::Fesl { .. } => Dialect::Fesl,
            Header::Theater { .. } => Dialect::Theater,
        }
    }

    pub fn theater_status(&self) -> Option<TheaterStatus> {
        match self.header {
            Header::Theater { status } => Some(status),
            Header::Fesl { .. } => None,
        }
    }

    pub fn transmission(&self) -> Option<TransmissionType> {
        match self.header {
            Header::Fesl { transmission, .. } => Some(transmission),
            Header::Theater { .. } => None,
        }
    }

    pub fn direction(&self) -> Direction {
        match self.header {
            Header::Fesl { transmission, .. } => {
                if transmission.is_request() || transmission == TransmissionType::Ping {
                    Direction::Request
                } else if self.payload.field("errorCode").is_some() {
                    Direction::Error
                } else {
                    Direction::Response
                }
            }
            Header::Theater { status } => match status {
                TheaterStatus::Request => Direction::Request,
                TheaterStatus::Ok => Direction::Response,
                TheaterStatus::Error(_) => Direction::Error,
            },
        }
    }

    /// Sequence id used to match this frame to its request
    ///
    /// Theater frames without a parsable `TID` report 0, which is never
    /// allocated to a request.
    pub fn sequence_id(&self) -> u32 {
        match self.header {
            Header::Fesl { sequence_id, .. } => sequence_id,
            Header::Theater { .. } => self
                .payload
                .field("TID")
                .and_then(|tid| tid.trim().parse().ok())
                .unwrap_or(0),
        }
    }

    /// Whether this frame is one chunk of a multi-frame transmission
    pub fn is_continued(&self) -> bool {
        self.transmission().is_some_and(TransmissionType::is_multi)
    }

    pub fn txn(&self) -> Option<&str> {
        self.payload.field("TXN")
    }

    pub fn error(&self) -> Option<ProtocolError> {
        ProtocolError::from_frame(self)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = self.payload.to_bytes()?;
        let total = HEADER_LENGTH + body.len() + 1;
        if total > MAX_FRAME_SIZE {
            return Err(Error::InvalidArgument(format!(
                "{} frame of {total} bytes exceeds maximum of {MAX_FRAME_SIZE}",
                self.tag
            )));
        }

        let mut bytes = Vec::with_capacity(total);
        bytes.extend_from_slice(self.tag.as_bytes());
        bytes.extend_from_slice(&self.header.status_word()?);
        bytes.extend_from_slice(&(total as u32).to_be_bytes());
        bytes.extend_from_slice(&body);
        bytes.push(0);
        Ok(bytes)
    }

    /// Decodes exactly one complete frame
    pub fn from_bytes(dialect: Dialect, data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LENGTH {
            return Err(Error::MalformedFrame(format!(
                "frame too small: expected at least {HEADER_LENGTH}, got {}",
                data.len()
            )));
        }
        let (tag, header, length) = decode_header(dialect, &data[..HEADER_LENGTH])?;
        if length != data.len() {
            return Err(Error::MalformedFrame(format!(
                "frame declares {length} bytes but {} were given",
                data.len()
            )));
        }
        let payload = decode_body(&data[HEADER_LENGTH..])?;
        Ok(Self {
            tag,
            header,
            payload,
        })
    }
}

/// Parses a header, returning tag, header and total frame length
pub fn decode_header(dialect: Dialect, header: &[u8]) -> Result<(Tag, Header, usize)> {
    let [t0, t1, t2, t3, s0, s1, s2, s3, l0, l1, l2, l3] = header else {
        return Err(Error::MalformedFrame(format!(
            "header must be {HEADER_LENGTH} bytes, got {}",
            header.len()
        )));
    };

    let tag = Tag([*t0, *t1, *t2, *t3]);
    if !dialect.accepts(tag) {
        return Err(Error::MalformedFrame(format!(
            "unknown {dialect:?} tag {:?}",
            tag.as_bytes()
        )));
    }

    let header = match dialect {
        Dialect::Fesl => {
            let transmission = TransmissionType::from_u8(*s0).ok_or_else(|| {
                Error::MalformedFrame(format!("unknown transmission type 0x{s0:02x}"))
            })?;
            Header::Fesl {
                transmission,
                sequence_id: u32::from_be_bytes([0, *s1, *s2, *s3]),
            }
        }
        Dialect::Theater => {
            let word = [*s0, *s1, *s2, *s3];
            let status = TheaterStatus::from_bytes(word).ok_or_else(|| {
                Error::MalformedFrame(format!("unknown theater status word {word:?}"))
            })?;
            Header::Theater { status }
        }
    };

    let length = u32::from_be_bytes([*l0, *l1, *l2, *l3]) as usize;
    if length <= HEADER_LENGTH {
        return Err(Error::MalformedFrame(format!(
            "declared length {length} leaves no room for a body"
        )));
    }
    if length > MAX_FRAME_SIZE {
        return Err(Error::MalformedFrame(format!(
            "declared length {length} exceeds maximum of {MAX_FRAME_SIZE}"
        )));
    }
    Ok((tag, header, length))
}

/// Parses a NUL terminated body
pub fn decode_body(body: &[u8]) -> Result<Payload> {
    match body.split_last() {
        Some((0, data)) => Payload::from_bytes(data),
        _ => Err(Error::MalformedFrame("body is not NUL terminated".into())),
    }
}
