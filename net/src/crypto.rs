//! Framing obfuscation, not security (spec §9). The wire format XORs the frame body with a
//! fixed byte after the magic/EOF framing has been applied on send, and before it is stripped on
//! receive - this exists purely so the bytes on the wire aren't plainly readable, not to resist a
//! determined attacker.
use crate::error::NetworkError;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// The fixed XOR key. Keeping the field shape on the wire intact matters more than the key
/// itself ever could.
pub const XOR_KEY: u8 = 0x43;

/// Obfuscates `bytes` in place. Symmetric: calling this twice restores the original data.
#[inline]
pub fn xor_obfuscate(bytes: &mut [u8]) {
    for byte in bytes.iter_mut() {
        *byte ^= XOR_KEY;
    }
}

/// Optional payload transform applied before XOR obfuscation on send, and after de-obfuscation
/// on receive. Resolves the "is compression wired in" open question from spec §9: it's a
/// pluggable outer layer, off by default (see `IdentityCodec`).
pub trait OuterCodec: Send + Sync {
    fn encode(&self, payload: &[u8]) -> Vec<u8>;
    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, NetworkError>;
}

/// The default outer codec: a no-op. Most deployments never need it.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl OuterCodec for IdentityCodec {
    #[inline]
    fn encode(&self, payload: &[u8]) -> Vec<u8> {
        payload.to_vec()
    }

    #[inline]
    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, NetworkError> {
        Ok(bytes.to_vec())
    }
}

/// Zlib-backed outer codec. Never the default - an endpoint must opt in explicitly.
#[derive(Debug, Clone, Copy)]
pub struct DeflateCodec {
    level: Compression,
}

impl DeflateCodec {
    pub fn new() -> DeflateCodec {
        DeflateCodec { level: Compression::default() }
    }
}

impl Default for DeflateCodec {
    fn default() -> Self {
        DeflateCodec::new()
    }
}

impl OuterCodec for DeflateCodec {
    fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
        // A `Vec<u8>` sink never errors.
        encoder.write_all(payload).expect("in-memory zlib write cannot fail");
        encoder.finish().expect("in-memory zlib finish cannot fail")
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, NetworkError> {
        let mut decoder = ZlibDecoder::new(bytes);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(|_| NetworkError::CompressError)?;
        Ok(out)
    }
}
