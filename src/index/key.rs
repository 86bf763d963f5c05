use std::cmp::Ordering;
use std::fmt;

use crate::storage::page::IndexField;

/// Trait injected into the B+Tree to order keys.
pub trait KeyComparator<K>: Clone + Send + Sync + 'static {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// A fixed-width index key of N bytes, N in {4, 8, 16, 32, 64}.
///
/// Integer keys occupy the first 4 or 8 bytes little-endian; the remainder
/// is zero padding. Wider keys can carry arbitrary byte strings.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    pub fn zero() -> Self {
        Self { data: [0u8; N] }
    }

    /// Builds a key from an integer, the common case for index columns.
    pub fn from_i64(value: i64) -> Self {
        let mut data = [0u8; N];
        if N >= 8 {
            data[..8].copy_from_slice(&value.to_le_bytes());
        } else {
            data[..4].copy_from_slice(&(value as i32).to_le_bytes());
        }
        Self { data }
    }

    /// Reads the key back as an integer.
    pub fn as_i64(&self) -> i64 {
        if N >= 8 {
            i64::from_le_bytes(self.data[..8].try_into().unwrap())
        } else {
            i32::from_le_bytes(self.data[..4].try_into().unwrap()) as i64
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = [0u8; N];
        let n = bytes.len().min(N);
        data[..n].copy_from_slice(&bytes[..n]);
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl<const N: usize> From<i64> for GenericKey<N> {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

impl<const N: usize> fmt::Debug for GenericKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GenericKey<{}>({})", N, self.as_i64())
    }
}

impl<const N: usize> IndexField for GenericKey<N> {
    const ENCODED_SIZE: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self.data);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut data = [0u8; N];
        data.copy_from_slice(&buf[..N]);
        Self { data }
    }
}

/// Orders `GenericKey`s by their integer interpretation.
#[derive(Clone, Copy, Default)]
pub struct GenericComparator<const N: usize>;

impl<const N: usize> KeyComparator<GenericKey<N>> for GenericComparator<N> {
    fn compare(&self, a: &GenericKey<N>, b: &GenericKey<N>) -> Ordering {
        a.as_i64().cmp(&b.as_i64())
    }
}

/// Orders `GenericKey`s lexicographically over their raw bytes.
#[derive(Clone, Copy, Default)]
pub struct BytewiseComparator;

impl<const N: usize> KeyComparator<GenericKey<N>> for BytewiseComparator {
    fn compare(&self, a: &GenericKey<N>, b: &GenericKey<N>) -> Ordering {
        a.as_bytes().cmp(b.as_bytes())
    }
}

impl From<i64> for crate::common::RecordId {
    fn from(value: i64) -> Self {
        crate::common::RecordId::from_key(value)
    }
}
