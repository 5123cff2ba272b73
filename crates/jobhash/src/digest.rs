use bytes::Bytes;
use sha2::{Digest, Sha512};

/// Selects the digest implementation the worker pool builds at startup.
/// Extend this to swap in alternative algorithms.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Algorithm {
    Sha512,
}

impl Algorithm {
    /// Build a fresh digester for this algorithm. Each worker owns one.
    pub fn digester(&self) -> Box<dyn Digester> {
        match self {
            Algorithm::Sha512 => Box::new(Sha512Digester::new()),
        }
    }
}

/// A bytes-in, digest-out function.
///
/// Implementations are not thread-safe. An instance must reset itself
/// between uses so that sequential calls are independent.
pub trait Digester: Send {
    fn digest(&mut self, data: &[u8]) -> Bytes;
}

/// SHA-512, producing 64 bytes. An empty input is valid and produces the
/// digest of the empty string.
pub struct Sha512Digester {
    inner: Sha512,
}

impl Sha512Digester {
    pub fn new() -> Self {
        Self {
            inner: Sha512::new(),
        }
    }
}

impl Default for Sha512Digester {
    fn default() -> Self {
        Self::new()
    }
}

impl Digester for Sha512Digester {
    fn digest(&mut self, data: &[u8]) -> Bytes {
        self.inner.update(data);
        Bytes::copy_from_slice(&self.inner.finalize_reset())
    }
}
