//! Word-level helpers for the ABI subset demand payloads use.
//!
//! Demand payloads are canonical EVM ABI encodings built from 32-byte
//! words: static values (addresses, hashes, booleans, unsigned integers),
//! dynamic `bytes`, and dynamic arrays addressed by byte offsets. Every
//! read is bounds-checked and every failure is a typed [`DecodeError`];
//! nothing here panics on untrusted input.

use crate::error::DecodeError;
use crate::identity::{Address, Hash};

/// ABI word size in bytes.
pub const WORD: usize = 32;

/// Padded length of a `bytes` tail: `len` rounded up to a word boundary.
pub fn padded_len(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

/// Bounds-checked reader over one word-aligned encoding region.
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    /// Wraps `buf`, rejecting buffers that are not word-aligned.
    pub fn new(buf: &'a [u8]) -> Result<Self, DecodeError> {
        if buf.len() % WORD != 0 {
            return Err(DecodeError::Misaligned(buf.len()));
        }
        Ok(Self { buf })
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Fails unless the region is exactly `n` words long. Used by the
    /// static payload schemas, which admit no trailing data.
    pub fn expect_words(&self, n: usize) -> Result<(), DecodeError> {
        let expected = n * WORD;
        if self.buf.len() < expected {
            return Err(DecodeError::Truncated {
                need: expected,
                have: self.buf.len(),
            });
        }
        if self.buf.len() > expected {
            return Err(DecodeError::UnexpectedLength {
                expected,
                actual: self.buf.len(),
            });
        }
        Ok(())
    }

    /// The `index`-th word of the region.
    pub fn word(&self, index: usize) -> Result<[u8; WORD], DecodeError> {
        let start = index * WORD;
        let end = start + WORD;
        if end > self.buf.len() {
            return Err(DecodeError::Truncated {
                need: end,
                have: self.buf.len(),
            });
        }
        let mut out = [0u8; WORD];
        out.copy_from_slice(&self.buf[start..end]);
        Ok(out)
    }

    /// An address word: 12 zero bytes then 20 address bytes.
    pub fn address(&self, index: usize) -> Result<Address, DecodeError> {
        let word = self.word(index)?;
        if word[..12].iter().any(|&b| b != 0) {
            return Err(DecodeError::DirtyPadding("address"));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&word[12..]);
        Ok(Address(out))
    }

    /// A full `bytes32` word.
    pub fn hash(&self, index: usize) -> Result<Hash, DecodeError> {
        Ok(Hash(self.word(index)?))
    }

    /// A boolean word; anything other than canonical 0 or 1 is rejected.
    pub fn bool(&self, index: usize) -> Result<bool, DecodeError> {
        let word = self.word(index)?;
        if word[..31].iter().any(|&b| b != 0) || word[31] > 1 {
            return Err(DecodeError::InvalidBool);
        }
        Ok(word[31] == 1)
    }

    /// A uint word that must fit in `u64`.
    pub fn uint64(&self, index: usize) -> Result<u64, DecodeError> {
        let word = self.word(index)?;
        if word[..24].iter().any(|&b| b != 0) {
            return Err(DecodeError::TimestampOverflow);
        }
        let mut out = [0u8; 8];
        out.copy_from_slice(&word[24..]);
        Ok(u64::from_be_bytes(out))
    }

    /// A uint word used as a byte offset or element count within this
    /// region. Anything that cannot index the region is out of bounds.
    pub fn usize_word(&self, index: usize) -> Result<usize, DecodeError> {
        let word = self.word(index)?;
        if word[..24].iter().any(|&b| b != 0) {
            return Err(DecodeError::OffsetOutOfBounds(index * WORD));
        }
        let mut out = [0u8; 8];
        out.copy_from_slice(&word[24..]);
        usize::try_from(u64::from_be_bytes(out))
            .map_err(|_| DecodeError::OffsetOutOfBounds(index * WORD))
    }

    /// A sub-region starting at word-aligned byte `offset`.
    pub fn region(&self, offset: usize) -> Result<Reader<'a>, DecodeError> {
        if offset % WORD != 0 || offset > self.buf.len() {
            return Err(DecodeError::OffsetOutOfBounds(offset));
        }
        Ok(Reader {
            buf: &self.buf[offset..],
        })
    }

    /// Dynamic `bytes` whose length word sits at byte `offset`: the data
    /// follows the length word, padded to a word boundary.
    pub fn bytes_at(&self, offset: usize) -> Result<Vec<u8>, DecodeError> {
        let region = self.region(offset)?;
        let len = region.usize_word(0)?;
        // The padded tail must fit in the region. The region is word
        // aligned, so comparing against its length directly keeps the
        // check overflow-free even for an adversarial length word.
        if len > region.len() - WORD {
            return Err(DecodeError::Truncated {
                need: len.saturating_add(WORD),
                have: region.len(),
            });
        }
        Ok(region.buf[WORD..WORD + len].to_vec())
    }
}

/// Canonical ABI writer: static head words plus padded dynamic tails.
#[derive(Default)]
pub struct Writer {
    out: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_word(&mut self, word: [u8; WORD]) {
        self.out.extend_from_slice(&word);
    }

    pub fn push_address(&mut self, address: &Address) {
        let mut word = [0u8; WORD];
        word[12..].copy_from_slice(&address.0);
        self.push_word(word);
    }

    pub fn push_hash(&mut self, hash: &Hash) {
        self.push_word(hash.0);
    }

    pub fn push_bool(&mut self, value: bool) {
        let mut word = [0u8; WORD];
        word[31] = u8::from(value);
        self.push_word(word);
    }

    pub fn push_uint(&mut self, value: u64) {
        let mut word = [0u8; WORD];
        word[24..].copy_from_slice(&value.to_be_bytes());
        self.push_word(word);
    }

    /// Length word followed by `data` padded to a word boundary.
    pub fn push_bytes_tail(&mut self, data: &[u8]) {
        self.push_uint(data.len() as u64);
        self.out.extend_from_slice(data);
        self.out.resize(self.out.len() + padded_len(data.len()) - data.len(), 0);
    }

    pub fn finish(self) -> Vec<u8> {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_misaligned_buffers() {
        assert_eq!(Reader::new(&[0u8; 31]).err(), Some(DecodeError::Misaligned(31)));
        assert!(Reader::new(&[0u8; 64]).is_ok());
    }

    #[test]
    fn address_word_roundtrip() {
        let addr = Address([0xab; 20]);
        let mut w = Writer::new();
        w.push_address(&addr);
        let buf = w.finish();
        let r = Reader::new(&buf).unwrap();
        assert_eq!(r.address(0).unwrap(), addr);
    }

    #[test]
    fn dirty_address_padding_rejected() {
        let mut buf = vec![0u8; 32];
        buf[0] = 1;
        let r = Reader::new(&buf).unwrap();
        assert_eq!(r.address(0), Err(DecodeError::DirtyPadding("address")));
    }

    #[test]
    fn strict_bool_words() {
        let mut buf = vec![0u8; 32];
        let r = Reader::new(&buf).unwrap();
        assert!(!r.bool(0).unwrap());

        buf[31] = 2;
        let r = Reader::new(&buf).unwrap();
        assert_eq!(r.bool(0), Err(DecodeError::InvalidBool));
    }

    #[test]
    fn uint64_overflow_detected() {
        let mut buf = vec![0u8; 32];
        buf[23] = 1;
        let r = Reader::new(&buf).unwrap();
        assert_eq!(r.uint64(0), Err(DecodeError::TimestampOverflow));
    }

    #[test]
    fn bytes_tail_padding() {
        let mut w = Writer::new();
        w.push_bytes_tail(b"hello");
        let buf = w.finish();
        assert_eq!(buf.len(), 64);
        let r = Reader::new(&buf).unwrap();
        assert_eq!(r.bytes_at(0).unwrap(), b"hello");
    }

    #[test]
    fn truncated_bytes_tail() {
        let mut w = Writer::new();
        w.push_uint(100);
        let buf = w.finish();
        let r = Reader::new(&buf).unwrap();
        assert!(matches!(r.bytes_at(0), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn oversized_length_word_rejected() {
        // A length word near the address-space limit must come back as a
        // truncation error, not wrap during the bounds arithmetic.
        let mut w = Writer::new();
        w.push_uint(u64::MAX);
        let buf = w.finish();
        let r = Reader::new(&buf).unwrap();
        assert!(matches!(r.bytes_at(0), Err(DecodeError::Truncated { .. })));
    }
}
