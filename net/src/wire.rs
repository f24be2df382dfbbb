//! Byte-exact wire codec. Every structural type gets a pair of pure functions: `encode` appends
//! to a growable `Vec<u8>` and is total, `decode` consumes a fixed prefix of a `&[u8]` cursor and
//! never panics. Because `&[u8]` advances itself as `io::Read` consumes it, a `&mut &[u8]` cursor
//! *is* the "value, rest" pair the codec needs - decoding the next field just means calling the
//! next `decode_*` on the same cursor.
use crate::error::DecodeError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read};

/// Frame magic. Written in clear; never XOR-obfuscated.
pub const MAGIC: u32 = 0x4364_8279;
/// Datagram terminator consumed (never returned) by the reassembly buffer.
pub const EOF_MARKER: u32 = 0x6767_6767;

#[inline]
fn eof_to_decode_error(err: io::Error) -> DecodeError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => DecodeError::Truncated,
        _ => DecodeError::Malformed,
    }
}

#[inline]
pub fn decode_u8(stream: &mut &[u8]) -> Result<u8, DecodeError> {
    stream.read_u8().map_err(eof_to_decode_error)
}

#[inline]
pub fn decode_u16(stream: &mut &[u8]) -> Result<u16, DecodeError> {
    stream.read_u16::<LittleEndian>().map_err(eof_to_decode_error)
}

#[inline]
pub fn decode_u32(stream: &mut &[u8]) -> Result<u32, DecodeError> {
    stream.read_u32::<LittleEndian>().map_err(eof_to_decode_error)
}

#[inline]
pub fn decode_u64(stream: &mut &[u8]) -> Result<u64, DecodeError> {
    stream.read_u64::<LittleEndian>().map_err(eof_to_decode_error)
}

/// `length(u32) | bytes` - the rest of `body-to-end` fields (`SENDCOMP`/`SENDEVENT` payloads)
/// are not length-prefixed; callers take whatever remains in the cursor instead.
#[inline]
pub fn decode_string(stream: &mut &[u8]) -> Result<String, DecodeError> {
    let len = decode_u32(stream)? as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).map_err(eof_to_decode_error)?;
    String::from_utf8(buf).map_err(|_| DecodeError::Malformed)
}

/// `present(u8) | value?`. `encode_value` is invoked only when `value` is `Some`.
#[inline]
pub fn decode_option<T>(
    stream: &mut &[u8],
    decode_value: impl FnOnce(&mut &[u8]) -> Result<T, DecodeError>,
) -> Result<Option<T>, DecodeError> {
    match decode_u8(stream)? {
        0 => Ok(None),
        1 => Ok(Some(decode_value(stream)?)),
        _ => Err(DecodeError::Malformed),
    }
}

/// Takes every remaining byte in the cursor. Used for `data:bytes-to-end` fields.
#[inline]
pub fn decode_remainder(stream: &mut &[u8]) -> Vec<u8> {
    let rest = stream.to_vec();
    *stream = &[];
    rest
}

#[inline]
pub fn encode_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

#[inline]
pub fn encode_u16(out: &mut Vec<u8>, value: u16) {
    out.write_u16::<LittleEndian>(value).expect("Vec<u8> writes never fail");
}

#[inline]
pub fn encode_u32(out: &mut Vec<u8>, value: u32) {
    out.write_u32::<LittleEndian>(value).expect("Vec<u8> writes never fail");
}

#[inline]
pub fn encode_u64(out: &mut Vec<u8>, value: u64) {
    out.write_u64::<LittleEndian>(value).expect("Vec<u8> writes never fail");
}

#[inline]
pub fn encode_string(out: &mut Vec<u8>, value: &str) {
    encode_u32(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}

#[inline]
pub fn encode_option<T>(out: &mut Vec<u8>, value: &Option<T>, encode_value: impl FnOnce(&mut Vec<u8>, &T)) {
    match value {
        Some(inner) => {
            encode_u8(out, 1);
            encode_value(out, inner);
        }
        None => encode_u8(out, 0),
    }
}

/// One opcode byte per connectionless command, in declaration order from the wire spec.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum ConnectionlessOpcode {
    GetChallenge = 0,
    ChallengeResponse = 1,
    Connect = 2,
    ConnectResponse = 3,
    GetInfo = 4,
    InfoResponse = 5,
    GetStatus = 6,
    StatusResponse = 7,
    Disconnect = 8,
}

impl ConnectionlessOpcode {
    pub fn from_byte(byte: u8) -> Result<ConnectionlessOpcode, DecodeError> {
        use ConnectionlessOpcode::*;
        match byte {
            0 => Ok(GetChallenge),
            1 => Ok(ChallengeResponse),
            2 => Ok(Connect),
            3 => Ok(ConnectResponse),
            4 => Ok(GetInfo),
            5 => Ok(InfoResponse),
            6 => Ok(GetStatus),
            7 => Ok(StatusResponse),
            8 => Ok(Disconnect),
            _ => Err(DecodeError::Malformed),
        }
    }
}

/// One opcode byte per connected command.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum ConnectedOpcode {
    SendComp = 0,
    SendEvent = 1,
}

impl ConnectedOpcode {
    pub fn from_byte(byte: u8) -> Result<ConnectedOpcode, DecodeError> {
        match byte {
            0 => Ok(ConnectedOpcode::SendComp),
            1 => Ok(ConnectedOpcode::SendEvent),
            _ => Err(DecodeError::Malformed),
        }
    }
}

/// `GETCHALLENGE body: user_id:u32`
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GetChallenge {
    pub user_id: u32,
}

impl GetChallenge {
    pub fn encode(&self, out: &mut Vec<u8>) {
        encode_u32(out, self.user_id);
    }

    pub fn decode(stream: &mut &[u8]) -> Result<GetChallenge, DecodeError> {
        Ok(GetChallenge { user_id: decode_u32(stream)? })
    }
}

/// `CHALLENGERESP body: challenge:u32`
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChallengeResponse {
    pub challenge: u32,
}

impl ChallengeResponse {
    pub fn encode(&self, out: &mut Vec<u8>) {
        encode_u32(out, self.challenge);
    }

    pub fn decode(stream: &mut &[u8]) -> Result<ChallengeResponse, DecodeError> {
        Ok(ChallengeResponse { challenge: decode_u32(stream)? })
    }
}

/// `CONNECT body: challenge:u32 | name:string`
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Connect {
    pub challenge: u32,
    pub name: String,
}

impl Connect {
    pub fn encode(&self, out: &mut Vec<u8>) {
        encode_u32(out, self.challenge);
        encode_string(out, &self.name);
    }

    pub fn decode(stream: &mut &[u8]) -> Result<Connect, DecodeError> {
        let challenge = decode_u32(stream)?;
        let name = decode_string(stream)?;
        Ok(Connect { challenge, name })
    }
}

/// `CONNECTRESP body: client_id:u8 | server_id:u32`
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConnectResponse {
    pub client_id: u8,
    pub server_id: u32,
}

impl ConnectResponse {
    pub fn encode(&self, out: &mut Vec<u8>) {
        encode_u8(out, self.client_id);
        encode_u32(out, self.server_id);
    }

    pub fn decode(stream: &mut &[u8]) -> Result<ConnectResponse, DecodeError> {
        let client_id = decode_u8(stream)?;
        let server_id = decode_u32(stream)?;
        Ok(ConnectResponse { client_id, server_id })
    }
}

/// `DISCONNECT body: reason:string`
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Disconnect {
    pub reason: String,
}

impl Disconnect {
    pub fn encode(&self, out: &mut Vec<u8>) {
        encode_string(out, &self.reason);
    }

    pub fn decode(stream: &mut &[u8]) -> Result<Disconnect, DecodeError> {
        Ok(Disconnect { reason: decode_string(stream)? })
    }
}

/// `GETINFO` carries no body.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GetInfo;

/// Server identity blurb, returned for `GETINFO`. Field set follows the hostname/map-name
/// constants the original server carried around for its server-browser listing.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InfoResponse {
    pub hostname: String,
    pub map_name: String,
    pub player_count: u8,
    pub max_players: u8,
}

impl InfoResponse {
    pub fn encode(&self, out: &mut Vec<u8>) {
        encode_string(out, &self.hostname);
        encode_string(out, &self.map_name);
        encode_u8(out, self.player_count);
        encode_u8(out, self.max_players);
    }

    pub fn decode(stream: &mut &[u8]) -> Result<InfoResponse, DecodeError> {
        let hostname = decode_string(stream)?;
        let map_name = decode_string(stream)?;
        let player_count = decode_u8(stream)?;
        let max_players = decode_u8(stream)?;
        Ok(InfoResponse { hostname, map_name, player_count, max_players })
    }
}

/// `GETSTATUS` carries no body.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GetStatus;

/// Per-player line in a `STATUSRESPONSE`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PlayerStatus {
    pub name: String,
    pub score: u32,
    pub ping: u8,
}

/// `STATUSRESPONSE body: count:u32 | (name:string | score:u32 | ping:u8) x count`
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StatusResponse {
    pub players: Vec<PlayerStatus>,
}

impl StatusResponse {
    pub fn encode(&self, out: &mut Vec<u8>) {
        encode_u32(out, self.players.len() as u32);
        for player in &self.players {
            encode_string(out, &player.name);
            encode_u32(out, player.score);
            encode_u8(out, player.ping);
        }
    }

    pub fn decode(stream: &mut &[u8]) -> Result<StatusResponse, DecodeError> {
        let count = decode_u32(stream)? as usize;
        let mut players = Vec::with_capacity(count);
        for _ in 0..count {
            let name = decode_string(stream)?;
            let score = decode_u32(stream)?;
            let ping = decode_u8(stream)?;
            players.push(PlayerStatus { name, score, ping });
        }
        Ok(StatusResponse { players })
    }
}

/// A decoded connectionless command: opcode plus type-specific body.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ConnectionlessPayload {
    GetChallenge(GetChallenge),
    ChallengeResponse(ChallengeResponse),
    Connect(Connect),
    ConnectResponse(ConnectResponse),
    GetInfo,
    InfoResponse(InfoResponse),
    GetStatus,
    StatusResponse(StatusResponse),
    Disconnect(Disconnect),
}

impl ConnectionlessPayload {
    pub fn encode(&self, out: &mut Vec<u8>) {
        use ConnectionlessPayload::*;
        match self {
            GetChallenge(body) => {
                encode_u8(out, ConnectionlessOpcode::GetChallenge as u8);
                body.encode(out);
            }
            ChallengeResponse(body) => {
                encode_u8(out, ConnectionlessOpcode::ChallengeResponse as u8);
                body.encode(out);
            }
            Connect(body) => {
                encode_u8(out, ConnectionlessOpcode::Connect as u8);
                body.encode(out);
            }
            ConnectResponse(body) => {
                encode_u8(out, ConnectionlessOpcode::ConnectResponse as u8);
                body.encode(out);
            }
            GetInfo => encode_u8(out, ConnectionlessOpcode::GetInfo as u8),
            InfoResponse(body) => {
                encode_u8(out, ConnectionlessOpcode::InfoResponse as u8);
                body.encode(out);
            }
            GetStatus => encode_u8(out, ConnectionlessOpcode::GetStatus as u8),
            StatusResponse(body) => {
                encode_u8(out, ConnectionlessOpcode::StatusResponse as u8);
                body.encode(out);
            }
            Disconnect(body) => {
                encode_u8(out, ConnectionlessOpcode::Disconnect as u8);
                body.encode(out);
            }
        }
    }

    pub fn decode(stream: &mut &[u8]) -> Result<ConnectionlessPayload, DecodeError> {
        use ConnectionlessOpcode::*;
        match ConnectionlessOpcode::from_byte(decode_u8(stream)?)? {
            GetChallenge => Ok(ConnectionlessPayload::GetChallenge(self::GetChallenge::decode(stream)?)),
            ChallengeResponse => {
                Ok(ConnectionlessPayload::ChallengeResponse(self::ChallengeResponse::decode(stream)?))
            }
            Connect => Ok(ConnectionlessPayload::Connect(self::Connect::decode(stream)?)),
            ConnectResponse => Ok(ConnectionlessPayload::ConnectResponse(self::ConnectResponse::decode(stream)?)),
            self::ConnectionlessOpcode::GetInfo => Ok(ConnectionlessPayload::GetInfo),
            InfoResponse => Ok(ConnectionlessPayload::InfoResponse(self::InfoResponse::decode(stream)?)),
            self::ConnectionlessOpcode::GetStatus => Ok(ConnectionlessPayload::GetStatus),
            StatusResponse => Ok(ConnectionlessPayload::StatusResponse(self::StatusResponse::decode(stream)?)),
            Disconnect => Ok(ConnectionlessPayload::Disconnect(self::Disconnect::decode(stream)?)),
        }
    }
}

/// A component update: `entity(u64) | component_key(string) | data(bytes-to-end)`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ComponentUpdate {
    pub entity: u64,
    pub component_key: String,
    pub data: Vec<u8>,
}

impl ComponentUpdate {
    pub fn encode(&self, out: &mut Vec<u8>) {
        encode_u64(out, self.entity);
        encode_string(out, &self.component_key);
        out.extend_from_slice(&self.data);
    }

    pub fn decode(stream: &mut &[u8]) -> Result<ComponentUpdate, DecodeError> {
        let entity = decode_u64(stream)?;
        let component_key = decode_string(stream)?;
        let data = decode_remainder(stream);
        Ok(ComponentUpdate { entity, component_key, data })
    }
}

/// An event: `event_id(string) | data(bytes-to-end)`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EventUpdate {
    pub event_id: String,
    pub data: Vec<u8>,
}

impl EventUpdate {
    pub fn encode(&self, out: &mut Vec<u8>) {
        encode_string(out, &self.event_id);
        out.extend_from_slice(&self.data);
    }

    pub fn decode(stream: &mut &[u8]) -> Result<EventUpdate, DecodeError> {
        let event_id = decode_string(stream)?;
        let data = decode_remainder(stream);
        Ok(EventUpdate { event_id, data })
    }
}

/// The body of a connected package: `opcode(u8) | body`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ConnectedCommand {
    SendComp(ComponentUpdate),
    SendEvent(EventUpdate),
}

impl ConnectedCommand {
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            ConnectedCommand::SendComp(body) => {
                encode_u8(out, ConnectedOpcode::SendComp as u8);
                body.encode(out);
            }
            ConnectedCommand::SendEvent(body) => {
                encode_u8(out, ConnectedOpcode::SendEvent as u8);
                body.encode(out);
            }
        }
    }

    pub fn decode(stream: &mut &[u8]) -> Result<ConnectedCommand, DecodeError> {
        match ConnectedOpcode::from_byte(decode_u8(stream)?)? {
            ConnectedOpcode::SendComp => Ok(ConnectedCommand::SendComp(ComponentUpdate::decode(stream)?)),
            ConnectedOpcode::SendEvent => Ok(ConnectedCommand::SendEvent(EventUpdate::decode(stream)?)),
        }
    }
}

/// `sequence(u64) | acknowledge(u64) | end_of_content(u8) | body`. Fragmentation is reserved:
/// `end_of_content` is always written as `1`; a `0` is logged and dropped on receive.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConnectedPackage {
    pub sequence: u64,
    pub acknowledge: u64,
    pub end_of_content: bool,
    pub command: ConnectedCommand,
}

impl ConnectedPackage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_u64(&mut out, self.sequence);
        encode_u64(&mut out, self.acknowledge);
        encode_u8(&mut out, self.end_of_content as u8);
        self.command.encode(&mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<ConnectedPackage, DecodeError> {
        let mut stream = bytes;
        let sequence = decode_u64(&mut stream)?;
        let acknowledge = decode_u64(&mut stream)?;
        let end_of_content = decode_u8(&mut stream)? != 0;
        let command = ConnectedCommand::decode(&mut stream)?;
        Ok(ConnectedPackage { sequence, acknowledge, end_of_content, command })
    }

    /// Rewrite just the `acknowledge` field of an already-encoded package in place, without
    /// re-encoding the body. Used by retransmission, which must carry the current cumulative ack
    /// rather than the one that was current at the original send time.
    pub fn rewrite_acknowledge(encoded: &mut [u8], acknowledge: u64) {
        debug_assert!(encoded.len() >= 16);
        encoded[8..16].copy_from_slice(&acknowledge.to_le_bytes());
    }
}

/// `lost_packages: sequence<u64>` - the heartbeat's selective-repeat NACK list.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct HeartbeatBody {
    pub lost_packages: Vec<u64>,
}

impl HeartbeatBody {
    pub fn encode(&self, out: &mut Vec<u8>) {
        encode_u32(out, self.lost_packages.len() as u32);
        for &seq in &self.lost_packages {
            encode_u64(out, seq);
        }
    }

    pub fn decode(stream: &mut &[u8]) -> Result<HeartbeatBody, DecodeError> {
        let count = decode_u32(stream)? as usize;
        let mut lost_packages = Vec::with_capacity(count);
        for _ in 0..count {
            lost_packages.push(decode_u64(stream)?);
        }
        Ok(HeartbeatBody { lost_packages })
    }
}

/// What a frame's payload holds, once de-obfuscated and passed through the outer codec.
/// Distinguishing this at the frame level (rather than trying to infer it from session state)
/// means a `DISCONNECT` - itself a connectionless command - can arrive on a session that's
/// already `Connected` without being confused for a connected package.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum FrameKind {
    Connectionless = 0,
    Connected = 1,
    Heartbeat = 2,
}

impl FrameKind {
    pub fn from_byte(byte: u8) -> Result<FrameKind, DecodeError> {
        match byte {
            0 => Ok(FrameKind::Connectionless),
            1 => Ok(FrameKind::Connected),
            2 => Ok(FrameKind::Heartbeat),
            _ => Err(DecodeError::Malformed),
        }
    }
}

/// `MAGIC(4) | KIND(1) | payload | EOF_MARKER(4)`. `encode` produces the full wire bytes
/// including the terminator; `decode` expects the terminator already stripped by the reassembly
/// buffer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 1 + self.payload.len() + 4);
        encode_u32(&mut out, MAGIC);
        encode_u8(&mut out, self.kind as u8);
        out.extend_from_slice(&self.payload);
        encode_u32(&mut out, EOF_MARKER);
        out
    }

    /// True if `bytes` begins with the frame magic. Checked separately from `decode` so callers
    /// can log a bad-magic drop (invariant 5) distinctly from a merely truncated frame.
    pub fn magic_matches(bytes: &[u8]) -> bool {
        let mut stream = bytes;
        decode_u32(&mut stream) == Ok(MAGIC)
    }

    /// Decodes a frame whose trailing `EOF_MARKER` has already been stripped by the reassembly
    /// buffer. Never panics; callers should check `magic_matches` first to log bad-magic drops
    /// distinctly (invariant 5), since this simply reports `Malformed` either way.
    pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
        let mut stream = bytes;
        let magic = decode_u32(&mut stream)?;
        if magic != MAGIC {
            return Err(DecodeError::Malformed);
        }
        let kind = FrameKind::from_byte(decode_u8(&mut stream)?)?;
        Ok(Frame { kind, payload: stream.to_vec() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_roundtrip() {
        let mut out = Vec::new();
        encode_u8(&mut out, 7);
        encode_u16(&mut out, 300);
        encode_u32(&mut out, 70_000);
        encode_u64(&mut out, u64::MAX);
        encode_string(&mut out, "hello");

        let mut stream = out.as_slice();
        assert_eq!(decode_u8(&mut stream).unwrap(), 7);
        assert_eq!(decode_u16(&mut stream).unwrap(), 300);
        assert_eq!(decode_u32(&mut stream).unwrap(), 70_000);
        assert_eq!(decode_u64(&mut stream).unwrap(), u64::MAX);
        assert_eq!(decode_string(&mut stream).unwrap(), "hello");
        assert!(stream.is_empty());
    }

    #[test]
    fn option_roundtrip() {
        let mut out = Vec::new();
        encode_option(&mut out, &Some(42u32), |o, v| encode_u32(o, *v));
        encode_option(&mut out, &None::<u32>, |o, v| encode_u32(o, *v));

        let mut stream = out.as_slice();
        assert_eq!(decode_option(&mut stream, decode_u32).unwrap(), Some(42));
        assert_eq!(decode_option(&mut stream, decode_u32).unwrap(), None);
    }

    #[test]
    fn truncated_primitive_is_truncated_error() {
        let bytes = [0u8, 1, 2];
        let mut stream = bytes.as_slice();
        assert_eq!(decode_u64(&mut stream), Err(DecodeError::Truncated));
    }

    #[test]
    fn bad_string_length_is_truncated() {
        let mut out = Vec::new();
        encode_u32(&mut out, 100);
        out.extend_from_slice(b"short");

        let mut stream = out.as_slice();
        assert_eq!(decode_string(&mut stream), Err(DecodeError::Truncated));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let mut out = Vec::new();
        encode_u32(&mut out, 2);
        out.extend_from_slice(&[0xff, 0xfe]);

        let mut stream = out.as_slice();
        assert_eq!(decode_string(&mut stream), Err(DecodeError::Malformed));
    }

    #[test]
    fn unknown_connectionless_opcode_is_malformed() {
        assert_eq!(ConnectionlessOpcode::from_byte(200), Err(DecodeError::Malformed));
    }

    #[test]
    fn connect_roundtrip() {
        let payload = ConnectionlessPayload::Connect(Connect { challenge: 0xDEAD_BEEF, name: "Alice".into() });
        let mut out = Vec::new();
        payload.encode(&mut out);

        let mut stream = out.as_slice();
        assert_eq!(ConnectionlessPayload::decode(&mut stream).unwrap(), payload);
    }

    #[test]
    fn connected_package_roundtrip() {
        let package = ConnectedPackage {
            sequence: 7,
            acknowledge: 3,
            end_of_content: true,
            command: ConnectedCommand::SendEvent(EventUpdate { event_id: "ping".into(), data: vec![0xDE, 0xAD] }),
        };

        let bytes = package.encode();
        assert_eq!(ConnectedPackage::decode(&bytes).unwrap(), package);
    }

    #[test]
    fn rewrite_acknowledge_leaves_rest_untouched() {
        let package = ConnectedPackage {
            sequence: 1,
            acknowledge: 0,
            end_of_content: true,
            command: ConnectedCommand::SendEvent(EventUpdate { event_id: "x".into(), data: vec![] }),
        };

        let mut bytes = package.encode();
        ConnectedPackage::rewrite_acknowledge(&mut bytes, 9);

        let decoded = ConnectedPackage::decode(&bytes).unwrap();
        assert_eq!(decoded.acknowledge, 9);
        assert_eq!(decoded.sequence, 1);
    }

    #[test]
    fn frame_roundtrip_strips_and_restores_marker() {
        let frame = Frame { kind: FrameKind::Connected, payload: vec![1, 2, 3] };
        let encoded = frame.encode();

        assert_eq!(&encoded[encoded.len() - 4..], &EOF_MARKER.to_le_bytes());

        let without_marker = &encoded[..encoded.len() - 4];
        assert_eq!(Frame::decode(without_marker).unwrap(), frame);
    }

    #[test]
    fn frame_bad_magic_is_rejected() {
        let mut bytes = Vec::new();
        encode_u32(&mut bytes, 0xBAD_0BAD);
        encode_u8(&mut bytes, 0);
        assert_eq!(Frame::decode(&bytes), Err(DecodeError::Malformed));
    }
}
