//! BLE fragment framing
//!
//! A logical message that does not fit in one notification/write is split
//! into fragments, each carrying a single leading kind byte:
//!
//! ```text
//! ┌──────┬──────────────────────────────┐
//! │ Kind │  Payload slice (UTF-8 bytes) │
//! │ (1B) │  (frame budget - 1 bytes)    │
//! └──────┴──────────────────────────────┘
//! ```
//!
//! Kind: 0x00 SINGLE, 0x01 FIRST, 0x02 CONT, 0x03 LAST.
//!
//! Fragments of one endpoint arrive in order (the radio stack guarantees
//! per-endpoint ordering), so reassembly is a plain append buffer per
//! endpoint. There is no interleaving: a new FIRST replaces an open buffer.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use thiserror::Error;
use tracing::warn;

/// Largest message the reassembler accepts before discarding the buffer
pub const MAX_REASSEMBLY_SIZE: usize = 64 * 1024;

/// Errors raised while splitting or reassembling fragments
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("Frame budget of {0} bytes cannot carry a fragment")]
    BudgetTooSmall(usize),

    #[error("Empty fragment")]
    Empty,

    #[error("Unknown fragment kind byte: {0:#04x}")]
    UnknownKind(u8),

    #[error("{0:?} fragment without an open message")]
    Orphan(FragmentKind),

    #[error("Reassembled message exceeds {MAX_REASSEMBLY_SIZE} bytes")]
    Overflow,
}

/// Position of a fragment within its message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FragmentKind {
    /// Whole message in one fragment
    Single = 0x00,
    /// Opens a multi-fragment message
    First = 0x01,
    /// Continues an open message
    Cont = 0x02,
    /// Completes an open message
    Last = 0x03,
}

impl TryFrom<u8> for FragmentKind {
    type Error = FragmentError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Single),
            0x01 => Ok(Self::First),
            0x02 => Ok(Self::Cont),
            0x03 => Ok(Self::Last),
            other => Err(FragmentError::UnknownKind(other)),
        }
    }
}

/// One on-wire transmission unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub kind: FragmentKind,
    pub payload: Bytes,
}

impl Fragment {
    /// Serialize as kind byte + payload
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.payload.len());
        buf.put_u8(self.kind as u8);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a raw notification value
    pub fn decode(raw: &[u8]) -> Result<Self, FragmentError> {
        let (&kind, payload) = raw.split_first().ok_or(FragmentError::Empty)?;
        Ok(Self {
            kind: FragmentKind::try_from(kind)?,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

/// Split a logical payload into fragments for the given frame budget
///
/// The budget is the number of bytes one write/notification can carry,
/// including the kind byte.
pub fn split(payload: &[u8], frame_budget: usize) -> Result<Vec<Fragment>, FragmentError> {
    if frame_budget < 2 {
        return Err(FragmentError::BudgetTooSmall(frame_budget));
    }

    if payload.len() < frame_budget {
        return Ok(vec![Fragment {
            kind: FragmentKind::Single,
            payload: Bytes::copy_from_slice(payload),
        }]);
    }

    let chunks: Vec<&[u8]> = payload.chunks(frame_budget - 1).collect();
    let last = chunks.len() - 1;

    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| Fragment {
            kind: match i {
                0 => FragmentKind::First,
                i if i == last => FragmentKind::Last,
                _ => FragmentKind::Cont,
            },
            payload: Bytes::copy_from_slice(chunk),
        })
        .collect())
}

/// Split and serialize in one step
pub fn encode_all(payload: &[u8], frame_budget: usize) -> Result<Vec<Bytes>, FragmentError> {
    Ok(split(payload, frame_budget)?
        .iter()
        .map(Fragment::encode)
        .collect())
}

/// Per-endpoint reassembly buffers
#[derive(Debug)]
pub struct Reassembler<K> {
    buffers: HashMap<K, BytesMut>,
}

impl<K> Default for Reassembler<K> {
    fn default() -> Self {
        Self {
            buffers: HashMap::new(),
        }
    }
}

impl<K: Hash + Eq + Debug + Clone> Reassembler<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw fragment received on `endpoint`
    ///
    /// Returns the complete message once a SINGLE or LAST fragment arrives.
    pub fn feed(&mut self, endpoint: &K, raw: &[u8]) -> Result<Option<Bytes>, FragmentError> {
        let fragment = Fragment::decode(raw)?;

        match fragment.kind {
            FragmentKind::Single => {
                if let Some(open) = self.buffers.remove(endpoint) {
                    warn!(
                        "[FRAME] SINGLE on {:?} discarded {} bytes of an unfinished message",
                        endpoint,
                        open.len()
                    );
                }
                Ok(Some(fragment.payload))
            }
            FragmentKind::First => {
                let mut buf = BytesMut::with_capacity(fragment.payload.len() * 4);
                buf.extend_from_slice(&fragment.payload);
                if let Some(open) = self.buffers.insert(endpoint.clone(), buf) {
                    // Cannot tell a superseding message from a lost LAST; overwrite
                    warn!(
                        "[FRAME] FIRST on {:?} while a message was open, discarded {} bytes",
                        endpoint,
                        open.len()
                    );
                }
                Ok(None)
            }
            FragmentKind::Cont => {
                self.append(endpoint, FragmentKind::Cont, &fragment.payload)?;
                Ok(None)
            }
            FragmentKind::Last => {
                self.append(endpoint, FragmentKind::Last, &fragment.payload)?;
                Ok(self.buffers.remove(endpoint).map(BytesMut::freeze))
            }
        }
    }

    fn append(&mut self, endpoint: &K, kind: FragmentKind, data: &[u8]) -> Result<(), FragmentError> {
        let buf = self
            .buffers
            .get_mut(endpoint)
            .ok_or(FragmentError::Orphan(kind))?;

        if buf.len() + data.len() > MAX_REASSEMBLY_SIZE {
            self.buffers.remove(endpoint);
            return Err(FragmentError::Overflow);
        }

        buf.extend_from_slice(data);
        Ok(())
    }

    /// Drop every partial message
    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    /// Number of endpoints with an unfinished message
    pub fn open_buffers(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(
        reassembler: &mut Reassembler<u8>,
        fragments: &[Bytes],
    ) -> Vec<Option<Bytes>> {
        fragments
            .iter()
            .map(|raw| reassembler.feed(&1, raw).expect("feed failed"))
            .collect()
    }

    #[test]
    fn test_small_payload_is_single() {
        let fragments = split(b"hello", 20).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].kind, FragmentKind::Single);

        let raw = fragments[0].encode();
        assert_eq!(raw[0], 0x00);
        assert_eq!(&raw[1..], b"hello");

        let mut reassembler = Reassembler::new();
        let out = reassembler.feed(&1u8, &raw).unwrap();
        assert_eq!(out.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_payload_filling_budget_exactly_is_single() {
        // 19 bytes + kind byte == 20-byte budget
        let payload = [b'a'; 19];
        let fragments = split(&payload, 20).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].kind, FragmentKind::Single);

        let fragments = split(&[b'a'; 20], 20).unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].kind, FragmentKind::First);
        assert_eq!(fragments[1].kind, FragmentKind::Last);
    }

    #[test]
    fn test_large_payload_reassembles_exactly() {
        let payload: Vec<u8> = r#"{"sessionId":"abc-123","action":"SWITCH_WIFI","ssid":"FieldNet","password":"très-secret"}"#
            .as_bytes()
            .to_vec();
        let raw = encode_all(&payload, 20).unwrap();

        assert!(raw.len() > 2);
        assert_eq!(raw[0][0], FragmentKind::First as u8);
        assert!(raw[1..raw.len() - 1]
            .iter()
            .all(|f| f[0] == FragmentKind::Cont as u8));
        assert_eq!(raw[raw.len() - 1][0], FragmentKind::Last as u8);
        assert!(raw.iter().all(|f| f.len() <= 20));

        let mut reassembler = Reassembler::new();
        let outputs = feed_all(&mut reassembler, &raw);
        let (last, rest) = outputs.split_last().unwrap();
        assert!(rest.iter().all(Option::is_none));
        assert_eq!(last.as_deref(), Some(&payload[..]));
        assert_eq!(reassembler.open_buffers(), 0);
    }

    #[test]
    fn test_round_trip_across_budgets() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(700).collect();
        for budget in [2usize, 3, 20, 182, 514, 701, 702] {
            let raw = encode_all(&payload, budget).unwrap();
            let mut reassembler = Reassembler::new();
            let complete: Vec<Bytes> = feed_all(&mut reassembler, &raw).into_iter().flatten().collect();
            assert_eq!(complete.len(), 1, "budget {}", budget);
            assert_eq!(&complete[0][..], &payload[..], "budget {}", budget);
        }
    }

    #[test]
    fn test_new_first_overwrites_open_buffer() {
        let mut reassembler = Reassembler::new();
        reassembler.feed(&1u8, &[0x01, b'o', b'l', b'd']).unwrap();
        reassembler.feed(&1u8, &[0x01, b'n', b'e']).unwrap();
        let out = reassembler.feed(&1u8, &[0x03, b'w']).unwrap();
        assert_eq!(out.as_deref(), Some(&b"new"[..]));
    }

    #[test]
    fn test_endpoints_are_independent() {
        let mut reassembler = Reassembler::new();
        reassembler.feed(&1u8, &[0x01, b'a']).unwrap();
        reassembler.feed(&2u8, &[0x01, b'x']).unwrap();
        assert_eq!(reassembler.open_buffers(), 2);

        assert_eq!(
            reassembler.feed(&2u8, &[0x03, b'y']).unwrap().as_deref(),
            Some(&b"xy"[..])
        );
        assert_eq!(
            reassembler.feed(&1u8, &[0x03, b'b']).unwrap().as_deref(),
            Some(&b"ab"[..])
        );
    }

    #[test]
    fn test_single_clears_open_buffer() {
        let mut reassembler = Reassembler::new();
        reassembler.feed(&1u8, &[0x01, b'a']).unwrap();
        let out = reassembler.feed(&1u8, &[0x00, b'z']).unwrap();
        assert_eq!(out.as_deref(), Some(&b"z"[..]));
        assert_eq!(reassembler.open_buffers(), 0);
    }

    #[test]
    fn test_malformed_fragments() {
        let mut reassembler: Reassembler<u8> = Reassembler::new();
        assert_eq!(reassembler.feed(&1, &[]), Err(FragmentError::Empty));
        assert_eq!(
            reassembler.feed(&1, &[0x07, b'a']),
            Err(FragmentError::UnknownKind(0x07))
        );
        assert_eq!(
            reassembler.feed(&1, &[0x02, b'a']),
            Err(FragmentError::Orphan(FragmentKind::Cont))
        );
        assert_eq!(
            reassembler.feed(&1, &[0x03, b'a']),
            Err(FragmentError::Orphan(FragmentKind::Last))
        );
        assert_eq!(split(b"abc", 1), Err(FragmentError::BudgetTooSmall(1)));
    }

    #[test]
    fn test_overflow_discards_buffer() {
        let mut reassembler = Reassembler::new();
        reassembler.feed(&1u8, &[0x01]).unwrap();
        let mut big = vec![0x02u8];
        big.extend(std::iter::repeat(b'a').take(MAX_REASSEMBLY_SIZE));
        reassembler.feed(&1u8, &big[..MAX_REASSEMBLY_SIZE]).unwrap();
        assert_eq!(
            reassembler.feed(&1u8, &[0x02, b'a', b'b']),
            Err(FragmentError::Overflow)
        );
        assert_eq!(reassembler.open_buffers(), 0);
    }
}
