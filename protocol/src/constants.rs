//! Protocol constants, transmission types and backend details

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of the fixed frame header: tag, status word and total length
pub const HEADER_LENGTH: usize = 12;

/// Maximum accepted frame size including the header (64 KB)
pub const MAX_FRAME_SIZE: usize = 65536;

/// Fragment size announced during the FESL hello and used to chunk encoded queries
pub const FRAGMENT_SIZE: usize = 8096;

/// Largest encoded size a chunked FESL message may declare (16 MB)
pub const MAX_CHUNKED_SIZE: usize = 16 * 1024 * 1024;

/// FESL sequence ids live in the low 24 bits of the status word
pub const MAX_FESL_SEQUENCE_ID: u32 = 0x00FF_FFFF;

/// Theater sequence ids travel as a decimal `TID` field
pub const MAX_THEATER_SEQUENCE_ID: u32 = i32::MAX as u32;

/// Platform code sent in `sku`, `clientPlatform` and `PLAT` regardless of backend
pub const CLIENT_PLATFORM: &str = "PC";

/// Hardware address sent with logins and Theater user records
pub const NULL_MAC_ADDRESS: &str = "$000000000000";

/// SKU sent in the Theater `USER` message
pub const THEATER_SKU: &str = "125170";

/// Leaderboard stat keys requested when the caller does not name any
pub const DEFAULT_LEADERBOARD_KEYS: [&str; 4] = ["deaths", "kills", "score", "time"];

/// Widest rank window a single leaderboard query may cover
pub const MAX_LEADERBOARD_SPAN: u32 = 1000;

/// FESL error codes with a dedicated error kind
pub mod error_codes {
    pub const INVALID_PARAMETER: &str = "21";
    pub const RECORD_NOT_FOUND: &str = "101";
    pub const NO_MATCH: &str = "104";
    pub const TOO_MANY_RESULTS: &str = "105";
    pub const SESSION_NOT_AUTHORIZED: &str = "112";
    pub const INVALID_PASSWORD: &str = "122";
}

/// FESL transmission types, carried in the high byte of the status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransmissionType {
    /// Keep-alive pushed by the server
    Ping = 0x00,

    /// Complete response in one frame
    SingleResponse = 0x80,

    /// One chunk of an encoded response
    MultiResponse = 0xB0,

    /// Complete request in one frame
    SingleRequest = 0xC0,

    /// One chunk of an encoded request
    MultiRequest = 0xF0,
}

impl TransmissionType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Ping),
            0x80 => Some(Self::SingleResponse),
            0xB0 => Some(Self::MultiResponse),
            0xC0 => Some(Self::SingleRequest),
            0xF0 => Some(Self::MultiRequest),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn is_request(self) -> bool {
        matches!(self, Self::SingleRequest | Self::MultiRequest)
    }

    pub fn is_multi(self) -> bool {
        matches!(self, Self::MultiRequest | Self::MultiResponse)
    }
}

/// Console platforms with their own backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Pc,
    Xbox360,
    Ps3,
}

/// Connection details of a platform's FESL backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backend {
    pub host: &'static str,
    pub port: u16,
    pub client_string: &'static str,
}

impl Platform {
    pub fn backend(self) -> Backend {
        match self {
            Self::Pc => Backend {
                host: "bfbc2-pc-server.fesl.ea.com",
                port: 18321,
                client_string: "bfbc2-pc",
            },
            Self::Xbox360 => Backend {
                host: "bfbc2-360-server.fesl.ea.com",
                port: 18341,
                client_string: "bfbc2-360",
            },
            Self::Ps3 => Backend {
                host: "bfbc2-ps3-server.fesl.ea.com",
                port: 18331,
                client_string: "bfbc2-ps3",
            },
        }
    }

    /// Namespace personas of this platform are registered in
    pub fn default_namespace(self) -> Namespace {
        match self {
            Self::Pc => Namespace::Battlefield,
            Self::Xbox360 => Namespace::Xbox,
            Self::Ps3 => Namespace::Ps3,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pc => "pc",
            Self::Xbox360 => "xbox360",
            Self::Ps3 => "ps3",
        };
        f.write_str(name)
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pc" => Ok(Self::Pc),
            "xbox360" | "360" | "xbox" => Ok(Self::Xbox360),
            "ps3" => Ok(Self::Ps3),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Hosts whose public DNS records no longer resolve
const DNS_OVERRIDES: [(&str, &str); 2] = [
    ("bfbc2-360-server.fesl.ea.com", "159.153.64.190"),
    ("bfbc2-360-server.theater.ea.com", "159.153.64.191"),
];

/// Returns the fixed address to use for `host`, if one is known
pub fn dns_override(host: &str) -> Option<&'static str> {
    DNS_OVERRIDES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(host))
        .map(|(_, address)| *address)
}

/// Persona namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Battlefield,
    Xbox,
    Ps3,
    CemEaId,
    XblSub,
    Ps3Sub,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Battlefield => "battlefield",
            Self::Xbox => "xbox",
            Self::Ps3 => "ps3",
            Self::CemEaId => "cem_ea_id",
            Self::XblSub => "XBL_SUB",
            Self::Ps3Sub => "PS3_SUB",
        }
    }

    /// Legacy namespaces must be named explicitly in lookups
    pub fn is_legacy(self) -> bool {
        matches!(self, Self::XblSub | Self::Ps3Sub)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Battlefield,
            Self::Xbox,
            Self::Ps3,
            Self::CemEaId,
            Self::XblSub,
            Self::Ps3Sub,
        ]
        .into_iter()
        .find(|ns| ns.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("unknown namespace: {s}"))
    }
}
