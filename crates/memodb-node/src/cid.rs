//! Self-describing content identifiers (CIDv1).
//!
//! A CID is the tuple (version, content codec, multihash). The binary wire
//! form is the varint-encoded tuple with no outer framing; the textual form
//! is a multibase-prefixed rendering of the binary form, base32-lower by
//! default (the familiar `bafy…`/`bafk…` strings).
//!
//! New identifiers always use SHA-256 (multihash code 0x12), except that a
//! raw payload of [`INLINE_THRESHOLD`] bytes or fewer is inlined with the
//! identity multihash (code 0x00): the "digest" *is* the content, and such a
//! CID never needs a store lookup. Foreign hash codes round-trip unchanged.

use std::fmt;
use std::str::FromStr;

use multibase::Base;
use sha2::{Digest, Sha256};

use crate::error::CidError;
use crate::varint::{decode_varint, encode_varint};

/// Multihash code for the identity "hash" (digest = content).
pub const HASH_IDENTITY: u64 = 0x00;

/// Multihash code for SHA-256.
pub const HASH_SHA2_256: u64 = 0x12;

/// Raw payloads at most this long are inlined with the identity multihash.
pub const INLINE_THRESHOLD: usize = 32;

const CID_VERSION: u64 = 1;

/// Content codec of the identified payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Codec {
    /// Opaque bytes.
    Raw,
    /// A canonically encoded node.
    DagCbor,
}

impl Codec {
    pub fn code(self) -> u64 {
        match self {
            Codec::Raw => 0x55,
            Codec::DagCbor => 0x71,
        }
    }

    fn from_code(code: u64) -> Result<Self, CidError> {
        match code {
            0x55 => Ok(Codec::Raw),
            0x71 => Ok(Codec::DagCbor),
            other => Err(CidError::UnsupportedCodec(other)),
        }
    }
}

/// A version-1 content identifier.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cid {
    codec: Codec,
    hash_code: u64,
    digest: Vec<u8>,
}

impl Cid {
    /// Identify `bytes` under `codec`: inline raw payloads up to
    /// [`INLINE_THRESHOLD`] with the identity multihash, hash everything
    /// else with SHA-256.
    pub fn of(codec: Codec, bytes: &[u8]) -> Self {
        if codec == Codec::Raw && bytes.len() <= INLINE_THRESHOLD {
            return Cid {
                codec,
                hash_code: HASH_IDENTITY,
                digest: bytes.to_vec(),
            };
        }
        Cid {
            codec,
            hash_code: HASH_SHA2_256,
            digest: Sha256::digest(bytes).to_vec(),
        }
    }

    /// Construct from already-known parts (used when reading foreign CIDs).
    pub fn from_parts(codec: Codec, hash_code: u64, digest: Vec<u8>) -> Self {
        Cid {
            codec,
            hash_code,
            digest,
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn hash_code(&self) -> u64 {
        self.hash_code
    }

    /// The multihash digest. For identity CIDs this is the content itself.
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// True when the digest is the inlined content.
    pub fn is_identity(&self) -> bool {
        self.hash_code == HASH_IDENTITY
    }

    /// Whether `bytes` is content this CID could have been derived from.
    /// Unknown hash codes cannot be checked and verify vacuously.
    pub fn verify(&self, bytes: &[u8]) -> bool {
        match self.hash_code {
            HASH_IDENTITY => self.digest == bytes,
            HASH_SHA2_256 => Sha256::digest(bytes).as_slice() == self.digest,
            _ => true,
        }
    }

    /// The binary wire form: varint(version) varint(codec) varint(hash)
    /// varint(digest-len) digest.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.digest.len() + 8);
        encode_varint(&mut buf, CID_VERSION);
        encode_varint(&mut buf, self.codec.code());
        encode_varint(&mut buf, self.hash_code);
        encode_varint(&mut buf, self.digest.len() as u64);
        buf.extend_from_slice(&self.digest);
        buf
    }

    /// Parse a binary CID that occupies the whole input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CidError> {
        let (cid, consumed) = Self::from_bytes_prefix(bytes)?;
        if consumed != bytes.len() {
            return Err(CidError::TrailingBytes);
        }
        Ok(cid)
    }

    /// Parse a binary CID from the front of `bytes`, returning the CID and
    /// the number of bytes it occupied. Used where a CID prefixes a larger
    /// record, as in archive blocks.
    pub fn from_bytes_prefix(bytes: &[u8]) -> Result<(Self, usize), CidError> {
        fn field(bytes: &[u8], pos: &mut usize) -> Result<u64, CidError> {
            let (value, consumed) = decode_varint(&bytes[*pos..])?;
            *pos += consumed;
            Ok(value)
        }

        let mut pos = 0;
        let version = field(bytes, &mut pos)?;
        if version != CID_VERSION {
            return Err(CidError::UnsupportedVersion(version));
        }
        let codec = Codec::from_code(field(bytes, &mut pos)?)?;
        let hash_code = field(bytes, &mut pos)?;
        let len = usize::try_from(field(bytes, &mut pos)?)
            .map_err(|_| CidError::TruncatedDigest)?;
        if bytes.len() - pos < len {
            return Err(CidError::TruncatedDigest);
        }
        let digest = bytes[pos..pos + len].to_vec();
        Ok((
            Cid {
                codec,
                hash_code,
                digest,
            },
            pos + len,
        ))
    }

    /// Parse a textual CID in any recognized multibase.
    pub fn parse(text: &str) -> Result<Self, CidError> {
        let (_base, bytes) =
            multibase::decode(text).map_err(|e| CidError::InvalidMultibase(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Canonical textual form: base32 lower, `b` prefix.
    pub fn to_text(&self) -> String {
        multibase::encode(Base::Base32Lower, self.to_bytes())
    }

    /// Base64url textual form, for URI path segments that want it short.
    pub fn to_text_base64url(&self) -> String {
        multibase::encode(Base::Base64Url, self.to_bytes())
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cid({:?}, 0x{:x}, {})",
            self.codec,
            self.hash_code,
            hex::encode(&self.digest)
        )
    }
}

impl FromStr for Cid {
    type Err = CidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cid::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_raw_payload_is_inlined() {
        let cid = Cid::of(Codec::Raw, b"hi");
        assert!(cid.is_identity());
        assert_eq!(cid.digest(), b"hi");
    }

    #[test]
    fn threshold_boundary() {
        assert!(Cid::of(Codec::Raw, &[0u8; INLINE_THRESHOLD]).is_identity());
        assert!(!Cid::of(Codec::Raw, &[0u8; INLINE_THRESHOLD + 1]).is_identity());
    }

    #[test]
    fn dag_cbor_is_always_hashed() {
        let cid = Cid::of(Codec::DagCbor, &[0xf6]);
        assert!(!cid.is_identity());
        assert_eq!(cid.hash_code(), HASH_SHA2_256);
        assert_eq!(cid.digest().len(), 32);
    }

    #[test]
    fn same_content_same_cid() {
        let a = Cid::of(Codec::DagCbor, b"deterministic");
        let b = Cid::of(Codec::DagCbor, b"deterministic");
        assert_eq!(a, b);
    }

    #[test]
    fn binary_roundtrip() {
        let cid = Cid::of(Codec::DagCbor, b"roundtrip me");
        let bytes = cid.to_bytes();
        assert_eq!(Cid::from_bytes(&bytes).unwrap(), cid);
    }

    #[test]
    fn binary_identity_roundtrip() {
        // version 1, dag-cbor, identity hash, one-byte digest (CBOR null).
        let bytes = [0x01, 0x71, 0x00, 0x01, 0xf6];
        let cid = Cid::from_bytes(&bytes).unwrap();
        assert!(cid.is_identity());
        assert_eq!(cid.codec(), Codec::DagCbor);
        assert_eq!(cid.digest(), &[0xf6]);
        assert_eq!(cid.to_bytes(), bytes);
    }

    #[test]
    fn foreign_hash_code_roundtrips() {
        // blake2b-256 (0xb220) digest must survive parse/emit unchanged.
        let cid = Cid::from_parts(Codec::DagCbor, 0xb220, vec![0xaa; 32]);
        let parsed = Cid::from_bytes(&cid.to_bytes()).unwrap();
        assert_eq!(parsed.hash_code(), 0xb220);
        assert_eq!(parsed, cid);
    }

    #[test]
    fn text_starts_with_base32_prefix() {
        let cid = Cid::of(Codec::DagCbor, &[0xf6]);
        assert!(cid.to_text().starts_with('b'));
    }

    #[test]
    fn text_roundtrip_base32_and_base64url() {
        let cid = Cid::of(Codec::DagCbor, b"text forms");
        assert_eq!(Cid::parse(&cid.to_text()).unwrap(), cid);
        let b64 = cid.to_text_base64url();
        assert!(b64.starts_with('u'));
        assert_eq!(Cid::parse(&b64).unwrap(), cid);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Cid::parse("").is_err());
        assert!(Cid::parse("not a cid").is_err());
        // Valid multibase, invalid CID payload.
        let text = multibase::encode(Base::Base32Lower, [0x09, 0x01]);
        assert!(Cid::parse(&text).is_err());
    }

    #[test]
    fn rejects_wrong_version() {
        assert!(matches!(
            Cid::from_bytes(&[0x02, 0x71, 0x00, 0x00]),
            Err(CidError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn rejects_unknown_codec() {
        assert!(matches!(
            Cid::from_bytes(&[0x01, 0x70, 0x00, 0x00]),
            Err(CidError::UnsupportedCodec(0x70))
        ));
    }

    #[test]
    fn rejects_truncated_digest() {
        assert_eq!(
            Cid::from_bytes(&[0x01, 0x71, 0x12, 0x20, 0x01, 0x02]),
            Err(CidError::TruncatedDigest)
        );
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = Cid::of(Codec::Raw, b"x").to_bytes();
        bytes.push(0x00);
        assert_eq!(Cid::from_bytes(&bytes), Err(CidError::TrailingBytes));
    }

    #[test]
    fn verify_checks_sha256_and_identity() {
        let cid = Cid::of(Codec::DagCbor, b"payload");
        assert!(cid.verify(b"payload"));
        assert!(!cid.verify(b"tampered"));
        let inline = Cid::of(Codec::Raw, b"tiny");
        assert!(inline.verify(b"tiny"));
        assert!(!inline.verify(b"other"));
        // Unknown hash codes verify vacuously.
        let foreign = Cid::from_parts(Codec::Raw, 0xb220, vec![0; 32]);
        assert!(foreign.verify(b"anything"));
    }

    #[test]
    fn prefix_parse_reports_consumed() {
        let cid = Cid::of(Codec::DagCbor, b"prefixed");
        let mut buf = cid.to_bytes();
        let cid_len = buf.len();
        buf.extend_from_slice(b"payload");
        let (parsed, consumed) = Cid::from_bytes_prefix(&buf).unwrap();
        assert_eq!(parsed, cid);
        assert_eq!(consumed, cid_len);
    }
}
