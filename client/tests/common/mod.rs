//! Scripted backend peers for the integration tests
#![allow(dead_code)]

use bfstats::protocol::constants::{FRAGMENT_SIZE, TransmissionType};
use bfstats::protocol::correlation::chunk_frames;
use bfstats::protocol::packets::TheaterStatus;
use bfstats::protocol::value::unquote;
use bfstats::protocol::{Dialect, Frame, FrameDecoder, Payload, Tag};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::TcpStream;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Decodes client bytes into logical requests
///
/// Chunked requests are reported once, by their first frame, after every
/// chunk has arrived. Responses the client sends (memory check answers,
/// pings) are collected separately.
pub struct Inbox {
    decoder: FrameDecoder,
    requests: VecDeque<Frame>,
    pub answers: Vec<Frame>,
    chunked: Option<(Frame, usize, usize)>,
}

impl Inbox {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            decoder: FrameDecoder::new(dialect),
            requests: VecDeque::new(),
            answers: Vec::new(),
            chunked: None,
        }
    }

    pub fn offer(&mut self, bytes: &[u8]) {
        for frame in self.decoder.push(bytes).unwrap() {
            self.accept(frame);
        }
    }

    fn accept(&mut self, frame: Frame) {
        let is_request = match frame.dialect() {
            Dialect::Fesl => frame.transmission().is_some_and(TransmissionType::is_request),
            Dialect::Theater => frame.theater_status() == Some(TheaterStatus::Request),
        };
        if !is_request {
            self.answers.push(frame);
            return;
        }
        if !frame.is_continued() {
            self.requests.push_back(frame);
            return;
        }

        let size: usize = frame.payload.field("size").unwrap().parse().unwrap();
        let chunk = unquote(frame.payload.field("data").unwrap()).len();
        let (first, size, received) = match self.chunked.take() {
            Some((first, size, received)) => (first, size, received + chunk),
            None => (frame, size, chunk),
        };
        if received >= size {
            self.requests.push_back(first);
        } else {
            self.chunked = Some((first, size, received));
        }
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.requests.pop_front()
    }
}

pub fn fesl_reply(tag: Tag, sequence_id: u32, payload: Payload) -> Vec<u8> {
    Frame::fesl(tag, TransmissionType::SingleResponse, sequence_id, payload)
        .to_bytes()
        .unwrap()
}

/// Encodes `payload` as a chunked response spread over several frames
pub fn fesl_chunked_reply(tag: Tag, sequence_id: u32, payload: &Payload) -> Vec<u8> {
    chunk_frames(
        tag,
        TransmissionType::MultiResponse,
        sequence_id,
        payload,
        FRAGMENT_SIZE,
    )
    .unwrap()
    .iter()
    .flat_map(|frame| frame.to_bytes().unwrap())
    .collect()
}

pub fn memcheck() -> Vec<u8> {
    fesl_reply(Tag::FSYS, 0, Payload::new().with("TXN", "MemCheck"))
}

pub fn theater_reply(tag: Tag, request: &Frame, payload: Payload) -> Vec<u8> {
    let tid = request.payload.field("TID").unwrap().to_string();
    Frame::theater(tag, TheaterStatus::Ok, payload.with("TID", tid))
        .to_bytes()
        .unwrap()
}

pub fn hello_response() -> Payload {
    Payload::new()
        .with("TXN", "Hello")
        .with("theaterIp", "127.0.0.1")
        .with("theaterPort", 18325)
        .with("curTime", "\"Oct-18-2026%2012%3a00%3a00%20UTC\"")
        .with("messengerIp", "messaging.ea.com")
        .with("messengerPort", 13505)
}

pub fn login_response() -> Payload {
    Payload::new()
        .with("TXN", "NuLogin")
        .with("lkey", "W5NyZzx5")
        .with("userId", 2_290_000)
        .with("profileId", 2_290_000)
        .with("displayName", "Krut0r")
}

/// Async peer over one end of a `tokio::io::duplex` pipe
pub struct AsyncPeer {
    stream: DuplexStream,
    pub inbox: Inbox,
}

impl AsyncPeer {
    pub fn new(stream: DuplexStream, dialect: Dialect) -> Self {
        Self {
            stream,
            inbox: Inbox::new(dialect),
        }
    }

    pub async fn request(&mut self) -> Frame {
        let mut buffer = [0u8; 4096];
        loop {
            if let Some(frame) = self.inbox.pop() {
                return frame;
            }
            let read = self.stream.read(&mut buffer).await.unwrap();
            assert!(read > 0, "client hung up while a request was expected");
            self.inbox.offer(&buffer[..read]);
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Answers hello and login, pushing the memory check in between
    pub async fn serve_login(&mut self) {
        let hello = self.request().await;
        assert_eq!(hello.txn(), Some("Hello"));
        self.send(&memcheck()).await;
        self.send(&fesl_reply(Tag::FSYS, hello.sequence_id(), hello_response()))
            .await;
        let login = self.request().await;
        assert_eq!(login.txn(), Some("NuLogin"));
        self.send(&fesl_reply(Tag::ACCT, login.sequence_id(), login_response()))
            .await;
    }

    /// Reads until the client closes its end
    pub async fn drain(&mut self) {
        let mut buffer = [0u8; 4096];
        while let Ok(read) = self.stream.read(&mut buffer).await {
            if read == 0 {
                break;
            }
            self.inbox.offer(&buffer[..read]);
        }
    }
}

/// Blocking peer over an accepted TCP stream
pub struct BlockingPeer {
    stream: TcpStream,
    pub inbox: Inbox,
}

impl BlockingPeer {
    pub fn new(stream: TcpStream, dialect: Dialect) -> Self {
        Self {
            stream,
            inbox: Inbox::new(dialect),
        }
    }

    pub fn request(&mut self) -> Frame {
        let mut buffer = [0u8; 4096];
        loop {
            if let Some(frame) = self.inbox.pop() {
                return frame;
            }
            let read = self.stream.read(&mut buffer).unwrap();
            assert!(read > 0, "client hung up while a request was expected");
            self.inbox.offer(&buffer[..read]);
        }
    }

    pub fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    pub fn serve_login(&mut self) {
        let hello = self.request();
        assert_eq!(hello.txn(), Some("Hello"));
        self.send(&memcheck());
        self.send(&fesl_reply(Tag::FSYS, hello.sequence_id(), hello_response()));
        let login = self.request();
        assert_eq!(login.txn(), Some("NuLogin"));
        self.send(&fesl_reply(Tag::ACCT, login.sequence_id(), login_response()));
    }

    pub fn drain(&mut self) {
        let mut buffer = [0u8; 4096];
        while let Ok(read) = self.stream.read(&mut buffer) {
            if read == 0 {
                break;
            }
            self.inbox.offer(&buffer[..read]);
        }
    }
}
