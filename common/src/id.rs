use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, ops::Deref, str::FromStr};

/// Fixed-width identifier of `BYTES` bytes.
///
/// Block and chain identifiers are 32-byte digests, node identifiers are
/// 20 bytes. Identifiers print as lowercase hex, serialise as hex strings
/// and encode to CBOR as a byte string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id<const BYTES: usize>([u8; BYTES]);

/// Identity of a wrapped or inner block.
pub type BlockId = Id<32>;

/// Identity of a chain.
pub type ChainId = Id<32>;

/// Identity of the subnet validating a chain.
pub type SubnetId = Id<32>;

/// Identity of a validator node. The all-zero value means "no proposer".
pub type NodeId = Id<20>;

impl<const BYTES: usize> Default for Id<BYTES> {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl<const BYTES: usize> Id<BYTES> {
    /// The all-zero identifier
    pub const EMPTY: Self = Self([0u8; BYTES]);

    #[inline]
    pub const fn new(bytes: [u8; BYTES]) -> Self {
        Self(bytes)
    }

    /// Identifier whose leading bytes are the big-endian form of `n`, used to
    /// mint distinct ids cheaply
    pub fn from_u64(n: u64) -> Self {
        let mut bytes = [0u8; BYTES];
        let source = n.to_be_bytes();
        let len = BYTES.min(source.len());
        bytes[..len].copy_from_slice(&source[source.len() - len..]);
        Self(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    #[inline]
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    #[inline]
    pub fn into_inner(self) -> [u8; BYTES] {
        self.0
    }

    /// Folds the identifier into a u64 by xor-ing its 8-byte words.
    pub fn fold_u64(&self) -> u64 {
        self.0.chunks(8).fold(0u64, |acc, chunk| {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            acc ^ u64::from_be_bytes(word)
        })
    }
}

impl<const BYTES: usize> From<[u8; BYTES]> for Id<BYTES> {
    fn from(bytes: [u8; BYTES]) -> Self {
        Self(bytes)
    }
}

impl<const BYTES: usize> TryFrom<&[u8]> for Id<BYTES> {
    type Error = std::array::TryFromSliceError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(value.try_into()?))
    }
}

impl<const BYTES: usize> AsRef<[u8]> for Id<BYTES> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<const BYTES: usize> Deref for Id<BYTES> {
    type Target = [u8; BYTES];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<const BYTES: usize> fmt::Debug for Id<BYTES> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(&format!("Id<{BYTES}>")).field(&hex::encode(self.0)).finish()
    }
}

impl<const BYTES: usize> fmt::Display for Id<BYTES> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl<const BYTES: usize> FromStr for Id<BYTES> {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; BYTES];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl<const BYTES: usize> Serialize for Id<BYTES> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de, const BYTES: usize> Deserialize<'de> for Id<BYTES> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl<C, const BYTES: usize> minicbor::Encode<C> for Id<BYTES> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0)?.ok()
    }
}

impl<'a, C, const BYTES: usize> minicbor::Decode<'a, C> for Id<BYTES> {
    fn decode(
        d: &mut minicbor::Decoder<'a>,
        _ctx: &mut C,
    ) -> Result<Self, minicbor::decode::Error> {
        let bytes = d.bytes()?;
        let id: [u8; BYTES] = bytes
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("identifier has the wrong length"))?;
        Ok(Self(id))
    }
}
