use std::sync::Arc;

/// Reference-counted byte buffer shared across transport, relay, and client layers.
///
/// Payloads travel from a send call through frame encoding, possibly a relay
/// leg, and out to an event receiver; `SharedBytes` lets every stage hold the
/// same allocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedBytes(Arc<[u8]>);

impl SharedBytes {
    /// Takes ownership of a Vec and makes it shareable.
    pub fn from_vec(vec: Vec<u8>) -> Self {
        Self(Arc::from(vec.into_boxed_slice()))
    }

    /// Wraps an existing reference-counted slice.
    pub fn from_arc(data: Arc<[u8]>) -> Self {
        Self(data)
    }

    /// Returns the bytes as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Returns the number of bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the inner reference-counted slice.
    pub fn into_arc(self) -> Arc<[u8]> {
        self.0
    }
}

impl From<Vec<u8>> for SharedBytes {
    fn from(v: Vec<u8>) -> Self {
        Self::from_vec(v)
    }
}

impl From<&[u8]> for SharedBytes {
    fn from(s: &[u8]) -> Self {
        Self(Arc::from(s))
    }
}

impl From<Arc<[u8]>> for SharedBytes {
    fn from(a: Arc<[u8]>) -> Self {
        Self::from_arc(a)
    }
}

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_allocation() {
        let a = SharedBytes::from_vec(vec![1, 2, 3]);
        let b = a.clone();
        assert_eq!(a.as_slice(), b.as_slice());
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn conversions() {
        let from_slice: SharedBytes = (&[9u8, 8][..]).into();
        assert_eq!(from_slice.len(), 2);
        assert!(!from_slice.is_empty());
        let arc = from_slice.into_arc();
        assert_eq!(&arc[..], &[9, 8]);
    }
}
