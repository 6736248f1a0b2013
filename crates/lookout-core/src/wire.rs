//! Lookout wire format: the reference encoding of discovery packets.
//!
//! Every packet, multicast or unicast, is a fixed 12-byte header followed by
//! a JSON body. The header is #[repr(C, packed)] and uses zerocopy derives
//! so it can be read straight out of a datagram buffer without copying.
//!
//! Multicast requests may be split across several datagrams when the group
//! list does not fit in one packet. Announcements carry a sequence number;
//! all packets belonging to one logical announcement share it.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use static_assertions::assert_eq_size;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// First four bytes of every Lookout packet.
pub const MAGIC: [u8; 4] = *b"LKUP";

/// The only protocol version the reference codec speaks.
pub const PROTOCOL_VERSION: u8 = 2;

/// IPv4 group that registries announce themselves on.
pub const ANNOUNCEMENT_ADDR: &str = "224.0.1.85";

/// IPv4 group that discovery requests are sent to.
pub const REQUEST_ADDR: &str = "224.0.1.84";

/// Well-known discovery port, shared by requests, announcements and unicast.
pub const DISCOVERY_PORT: u16 = 4160;

/// Default upper bound on a multicast datagram.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 512;

/// Upper bound on a unicast frame body. Anything larger is rejected unread.
pub const MAX_UNICAST_BODY: usize = 64 * 1024;

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Opaque, globally unique registry identifier.
///
/// Serialized as a 32-character lowercase hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(pub [u8; 16]);

impl ServiceId {
    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn from_hex(s: &str) -> Result<Self, WireError> {
        let bytes = hex::decode(s).map_err(|_| WireError::InvalidServiceId(s.to_string()))?;
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| WireError::InvalidServiceId(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceId({})", hex::encode(self.0))
    }
}

impl Serialize for ServiceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for ServiceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ServiceId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Where a registry accepts unicast discovery: host name or address plus port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Locator {
    pub host: String,
    pub port: u16,
}

impl Locator {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// ── Packet header ────────────────────────────────────────────────────────────

/// Fixed header preceding every packet body.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct PacketHeader {
    /// Always `MAGIC`. Anything else is not ours and is dropped.
    pub magic: [u8; 4],

    /// Protocol version the body is encoded with.
    pub protocol: u8,

    /// One of `PacketKind`.
    pub kind: u8,

    /// Reserved, must be zero.
    pub flags: u8,

    /// Reserved, must be zero.
    pub reserved: u8,

    /// Body length in bytes, little-endian.
    pub body_len: u32,
}

assert_eq_size!(PacketHeader, [u8; 12]);

pub const HEADER_SIZE: usize = std::mem::size_of::<PacketHeader>();

/// What a packet body contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    MulticastRequest = 0x01,
    MulticastAnnouncement = 0x02,
    UnicastRequest = 0x03,
    UnicastResponse = 0x04,
}

impl TryFrom<u8> for PacketKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PacketKind::MulticastRequest),
            0x02 => Ok(PacketKind::MulticastAnnouncement),
            0x03 => Ok(PacketKind::UnicastRequest),
            0x04 => Ok(PacketKind::UnicastResponse),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl PacketHeader {
    fn new(kind: PacketKind, protocol: u8, body_len: usize) -> Self {
        Self {
            magic: MAGIC,
            protocol,
            kind: kind as u8,
            flags: 0,
            reserved: 0,
            body_len: (body_len as u32).to_le(),
        }
    }

    fn body_len(&self) -> usize {
        u32::from_le(self.body_len) as usize
    }

    /// Check magic and kind. Returns the protocol version on success.
    fn validate(&self, expected: PacketKind) -> Result<u8, WireError> {
        if self.magic != MAGIC {
            return Err(WireError::BadMagic);
        }
        let kind = PacketKind::try_from(self.kind)?;
        if kind != expected {
            return Err(WireError::UnexpectedKind(self.kind));
        }
        Ok(self.protocol)
    }
}

// ── Packet bodies ────────────────────────────────────────────────────────────

/// A multicast discovery request.
///
/// An empty `groups` list asks every registry to respond, whatever its groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MulticastRequest {
    /// TCP port on the requester that registries connect back to.
    pub response_port: u16,
    /// Groups the requester is interested in.
    pub groups: Vec<String>,
    /// Registries the requester has already heard from; they need not respond.
    pub heard: Vec<ServiceId>,
}

/// A multicast announcement from a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MulticastAnnouncement {
    pub service_id: ServiceId,
    pub locator: Locator,
    pub groups: Vec<String>,
    /// Monotonic per registry. `None` when the sender does not number announcements.
    pub sequence: Option<u64>,
}

/// Body of a unicast discovery response, as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnicastBody {
    pub service_id: ServiceId,
    pub locator: Locator,
    pub groups: Vec<String>,
}

/// Body of a unicast discovery request. Carries nothing yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnicastRequestBody {}

// ── Datagram encoding ────────────────────────────────────────────────────────

/// Encode a header plus JSON body into one buffer.
pub fn encode_packet<T: Serialize>(
    kind: PacketKind,
    protocol: u8,
    body: &T,
) -> Result<Vec<u8>, WireError> {
    let json = serde_json::to_vec(body)?;
    let header = PacketHeader::new(kind, protocol, json.len());
    let mut out = Vec::with_capacity(HEADER_SIZE + json.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&json);
    Ok(out)
}

/// Decode a single datagram of the expected kind.
///
/// Returns the sender's protocol version alongside the body.
pub fn decode_packet<T: DeserializeOwned>(
    bytes: &[u8],
    expected: PacketKind,
) -> Result<(u8, T), WireError> {
    let header = PacketHeader::read_from_prefix(bytes).ok_or(WireError::TooShort(bytes.len()))?;
    let protocol = header.validate(expected)?;
    let declared = header.body_len();
    let actual = bytes.len() - HEADER_SIZE;
    if declared != actual {
        return Err(WireError::LengthMismatch { declared, actual });
    }
    let body = serde_json::from_slice(&bytes[HEADER_SIZE..])?;
    Ok((protocol, body))
}

/// Encode a request into as many datagrams as it takes to keep each one
/// within `max_packet_size`.
///
/// Groups are packed greedily; each packet then carries as many heard
/// identifiers as still fit. A single group name too large for one packet
/// is an error.
pub fn encode_request_packets(
    request: &MulticastRequest,
    protocol: u8,
    max_packet_size: usize,
) -> Result<Vec<Vec<u8>>, WireError> {
    let size_of = |req: &MulticastRequest| -> Result<usize, WireError> {
        Ok(HEADER_SIZE + serde_json::to_vec(req)?.len())
    };

    let mut chunks: Vec<Vec<String>> = Vec::new();
    let mut current = MulticastRequest {
        response_port: request.response_port,
        groups: Vec::new(),
        heard: Vec::new(),
    };

    for group in &request.groups {
        current.groups.push(group.clone());
        let size = size_of(&current)?;
        if size > max_packet_size {
            current.groups.pop();
            if current.groups.is_empty() {
                return Err(WireError::PacketTooLarge {
                    size,
                    max: max_packet_size,
                });
            }
            chunks.push(std::mem::take(&mut current.groups));
            current.groups.push(group.clone());
        }
    }
    // An all-groups request is a single packet with an empty group list.
    if !current.groups.is_empty() || chunks.is_empty() {
        chunks.push(current.groups);
    }

    let mut packets = Vec::with_capacity(chunks.len());
    for groups in chunks {
        let mut req = MulticastRequest {
            response_port: request.response_port,
            groups,
            heard: Vec::new(),
        };
        let size = size_of(&req)?;
        if size > max_packet_size {
            return Err(WireError::PacketTooLarge {
                size,
                max: max_packet_size,
            });
        }
        for id in &request.heard {
            req.heard.push(*id);
            if size_of(&req)? > max_packet_size {
                req.heard.pop();
                break;
            }
        }
        packets.push(encode_packet(PacketKind::MulticastRequest, protocol, &req)?);
    }
    Ok(packets)
}

/// Decode one request datagram. Used by registries and tests.
pub fn decode_request(bytes: &[u8]) -> Result<MulticastRequest, WireError> {
    decode_packet(bytes, PacketKind::MulticastRequest).map(|(_, req)| req)
}

/// Encode an announcement datagram. Used by registries and tests.
pub fn encode_announcement(
    announcement: &MulticastAnnouncement,
    protocol: u8,
) -> Result<Vec<u8>, WireError> {
    encode_packet(PacketKind::MulticastAnnouncement, protocol, announcement)
}

// ── Unicast framing ──────────────────────────────────────────────────────────

/// Write one header-plus-body frame to a stream.
pub async fn write_frame<W, T>(
    stream: &mut W,
    kind: PacketKind,
    protocol: u8,
    body: &T,
) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = encode_packet(kind, protocol, body)?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one frame of the expected kind from a stream.
pub async fn read_frame<R, T>(stream: &mut R, expected: PacketKind) -> Result<(u8, T), WireError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header_buf).await?;
    let header = PacketHeader::read_from(&header_buf[..]).ok_or(WireError::TooShort(HEADER_SIZE))?;
    let protocol = header.validate(expected)?;

    let len = header.body_len();
    if len > MAX_UNICAST_BODY {
        return Err(WireError::BodyTooLarge(len));
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok((protocol, serde_json::from_slice(&body)?))
}

/// Registry side of the unicast exchange: wait for the request frame,
/// then answer with `response`.
pub async fn serve_unicast<S>(stream: &mut S, response: &UnicastBody) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (protocol, _req): (u8, UnicastRequestBody) =
        read_frame(stream, PacketKind::UnicastRequest).await?;
    if protocol != PROTOCOL_VERSION {
        return Err(WireError::UnsupportedProtocol(protocol));
    }
    write_frame(stream, PacketKind::UnicastResponse, protocol, response).await
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum WireError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),
    #[error("bad magic")]
    BadMagic,
    #[error("unknown packet kind {0:#04x}")]
    UnknownKind(u8),
    #[error("unexpected packet kind {0:#04x}")]
    UnexpectedKind(u8),
    #[error("unsupported protocol version {0}")]
    UnsupportedProtocol(u8),
    #[error("body length {declared} does not match {actual} available bytes")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("unicast body too large: {0} bytes")]
    BodyTooLarge(usize),
    #[error("packet of {size} bytes exceeds max packet size {max}")]
    PacketTooLarge { size: usize, max: usize },
    #[error("malformed body: {0}")]
    Body(#[from] serde_json::Error),
    #[error("invalid service id: {0}")]
    InvalidServiceId(String),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}
