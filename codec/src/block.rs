//! Envelope encoding for proposer-wrapped blocks.
//!
//! Every envelope is the CBOR array `[version, tag, body]`:
//!
//! - signed (tag 0): `[parent, timestamp, p_chain_height, proposer, signature, inner]`
//! - option (tag 1): `[parent, inner]`
//!
//! An empty proposer together with an empty signature marks an unsigned
//! block. The identity of an envelope is the blake2b-256 digest of its bytes.

use crate::CodecError;
use blake2::{Blake2b, Digest, digest::consts::U32};
use minicbor::{Decoder, Encoder, encode::Write};
use slotgate_common::{BlockId, ChainId, NodeId};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const CODEC_VERSION: u8 = 0;

const SIGNED_TAG: u8 = 0;
const OPTION_TAG: u8 = 1;

type Blake2b256 = Blake2b<U32>;

fn digest(parts: &[&[u8]]) -> BlockId {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut id = [0u8; 32];
    id.copy_from_slice(&hasher.finalize());
    BlockId::new(id)
}

fn to_unix_secs(time: SystemTime) -> Result<u64, CodecError> {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).map_err(|_| CodecError::Timestamp)
}

fn from_unix_secs(secs: u64) -> Result<SystemTime, CodecError> {
    UNIX_EPOCH.checked_add(Duration::from_secs(secs)).ok_or(CodecError::Timestamp)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SignedHeader {
    parent: BlockId,
    timestamp: u64,
    p_chain_height: u64,
    proposer: NodeId,
    signature: Vec<u8>,
    inner: Vec<u8>,
}

impl SignedHeader {
    fn write<W: Write>(&self, e: &mut Encoder<W>) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.array(3)?.u8(CODEC_VERSION)?.u8(SIGNED_TAG)?;
        e.array(6)?
            .encode(self.parent)?
            .u64(self.timestamp)?
            .u64(self.p_chain_height)?
            .encode(self.proposer)?
            .bytes(&self.signature)?
            .bytes(&self.inner)?;
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut e = Encoder::new(Vec::new());
        self.write(&mut e).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(e.into_writer())
    }

    fn read(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        expect_array(d, 6)?;
        let parent = d.decode()?;
        let timestamp = d.u64()?;
        let p_chain_height = d.u64()?;
        let proposer = d.decode()?;
        let signature = d.bytes()?.to_vec();
        let inner = d.bytes()?.to_vec();
        // Reject timestamps we could not represent locally
        from_unix_secs(timestamp)?;
        Ok(Self {
            parent,
            timestamp,
            p_chain_height,
            proposer,
            signature,
            inner,
        })
    }
}

fn expect_array(d: &mut Decoder<'_>, len: u64) -> Result<(), CodecError> {
    match d.array()? {
        Some(n) if n == len => Ok(()),
        _ => Err(minicbor::decode::Error::message(format!("expected array of {len}")).into()),
    }
}

/// Post-fork block carrying proposer metadata around an inner block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBlock {
    id: BlockId,
    bytes: Vec<u8>,
    header: SignedHeader,
}

impl SignedBlock {
    fn from_header(header: SignedHeader) -> Result<Self, CodecError> {
        let bytes = header.to_bytes()?;
        Ok(Self {
            id: digest(&[&bytes]),
            bytes,
            header,
        })
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn parent_id(&self) -> BlockId {
        self.header.parent
    }

    pub fn timestamp(&self) -> SystemTime {
        // Range was checked on construction
        UNIX_EPOCH + Duration::from_secs(self.header.timestamp)
    }

    pub fn p_chain_height(&self) -> u64 {
        self.header.p_chain_height
    }

    /// The claimed proposer, `None` for unsigned blocks
    pub fn proposer(&self) -> Option<NodeId> {
        (!self.header.proposer.is_empty()).then_some(self.header.proposer)
    }

    pub fn signature(&self) -> &[u8] {
        &self.header.signature
    }

    pub fn inner_bytes(&self) -> &[u8] {
        &self.header.inner
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Digest a proposer signs: the chain id followed by the envelope with
    /// an empty signature
    pub fn header_digest(&self, chain_id: &ChainId) -> Result<BlockId, CodecError> {
        let unsigned = SignedHeader {
            signature: Vec::new(),
            ..self.header.clone()
        };
        Ok(digest(&[chain_id.as_ref(), &unsigned.to_bytes()?]))
    }
}

/// Post-fork wrapper around one child of an oracle block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionBlock {
    id: BlockId,
    bytes: Vec<u8>,
    parent: BlockId,
    inner: Vec<u8>,
}

impl OptionBlock {
    fn write<W: Write>(
        parent: &BlockId,
        inner: &[u8],
        e: &mut Encoder<W>,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.array(3)?.u8(CODEC_VERSION)?.u8(OPTION_TAG)?;
        e.array(2)?.encode(parent)?.bytes(inner)?;
        Ok(())
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn parent_id(&self) -> BlockId {
        self.parent
    }

    pub fn inner_bytes(&self) -> &[u8] {
        &self.inner
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// A decoded envelope without any chain state attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatelessBlock {
    Signed(SignedBlock),
    Option(OptionBlock),
}

impl StatelessBlock {
    pub fn id(&self) -> BlockId {
        match self {
            Self::Signed(b) => b.id(),
            Self::Option(b) => b.id(),
        }
    }

    pub fn parent_id(&self) -> BlockId {
        match self {
            Self::Signed(b) => b.parent_id(),
            Self::Option(b) => b.parent_id(),
        }
    }

    pub fn inner_bytes(&self) -> &[u8] {
        match self {
            Self::Signed(b) => b.inner_bytes(),
            Self::Option(b) => b.inner_bytes(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Signed(b) => b.bytes(),
            Self::Option(b) => b.bytes(),
        }
    }

    pub fn is_option(&self) -> bool {
        matches!(self, Self::Option(_))
    }
}

/// Decode an envelope. Fails on anything that is not exactly one envelope.
pub fn parse(bytes: &[u8]) -> Result<StatelessBlock, CodecError> {
    let mut d = Decoder::new(bytes);
    expect_array(&mut d, 3)?;

    let version = d.u8()?;
    if version != CODEC_VERSION {
        return Err(CodecError::Version(version));
    }

    let tag = d.u8()?;
    let id = digest(&[bytes]);
    let block = match tag {
        SIGNED_TAG => StatelessBlock::Signed(SignedBlock {
            id,
            bytes: bytes.to_vec(),
            header: SignedHeader::read(&mut d)?,
        }),
        OPTION_TAG => {
            expect_array(&mut d, 2)?;
            let parent = d.decode()?;
            let inner = d.bytes()?.to_vec();
            StatelessBlock::Option(OptionBlock {
                id,
                bytes: bytes.to_vec(),
                parent,
                inner,
            })
        }
        other => return Err(CodecError::Tag(other)),
    };

    let consumed = d.position();
    if consumed != bytes.len() {
        return Err(CodecError::Trailing(bytes.len() - consumed));
    }
    Ok(block)
}

/// Build an unsigned post-fork block
pub fn build_unsigned(
    parent: BlockId,
    timestamp: SystemTime,
    p_chain_height: u64,
    inner: &[u8],
) -> Result<SignedBlock, CodecError> {
    SignedBlock::from_header(SignedHeader {
        parent,
        timestamp: to_unix_secs(timestamp)?,
        p_chain_height,
        proposer: NodeId::EMPTY,
        signature: Vec::new(),
        inner: inner.to_vec(),
    })
}

/// Build a post-fork block signed by `proposer`. `sign` receives the
/// header digest and returns the signature bytes.
pub fn build_signed<F, E>(
    parent: BlockId,
    timestamp: SystemTime,
    p_chain_height: u64,
    proposer: NodeId,
    chain_id: &ChainId,
    inner: &[u8],
    sign: F,
) -> Result<SignedBlock, E>
where
    F: FnOnce(&BlockId) -> Result<Vec<u8>, E>,
    E: From<CodecError>,
{
    let mut header = SignedHeader {
        parent,
        timestamp: to_unix_secs(timestamp)?,
        p_chain_height,
        proposer,
        signature: Vec::new(),
        inner: inner.to_vec(),
    };
    let unsigned = header.to_bytes()?;
    header.signature = sign(&digest(&[chain_id.as_ref(), &unsigned]))?;
    Ok(SignedBlock::from_header(header)?)
}

/// Build the option wrapper for one child of an oracle block
pub fn build_option(parent: BlockId, inner: &[u8]) -> Result<OptionBlock, CodecError> {
    let mut e = Encoder::new(Vec::new());
    OptionBlock::write(&parent, inner, &mut e).map_err(|e| CodecError::Encode(e.to_string()))?;
    let bytes = e.into_writer();
    Ok(OptionBlock {
        id: digest(&[&bytes]),
        bytes,
        parent,
        inner: inner.to_vec(),
    })
}
