//! Accumulate socket chunks until a whole message can be parsed.

use crate::proto::Parse;
use crate::Result;

/// Pending bytes of one connection.
///
/// The reassembler knows nothing about SOCKS; the caller hands it whichever
/// parser matches the message it's waiting for.
#[derive(Clone, Debug, Default)]
pub struct Reassembler {
    pending: Vec<u8>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and try `parse` on everything buffered so far.
    ///
    /// Returns `Ok(None)` while the message is incomplete. On success the
    /// message bytes are dropped and anything after them stays pending. On
    /// error the buffer is cleared.
    pub fn feed<T, F>(&mut self, chunk: &[u8], parse: F) -> Result<Option<T>>
    where
        F: FnOnce(&[u8]) -> Result<Parse<T>>,
    {
        self.pending.extend_from_slice(chunk);
        match parse(&self.pending) {
            Ok(Parse::Done(value, len)) => {
                self.pending.drain(..len);
                Ok(Some(value))
            }
            Ok(Parse::NeedMore) => Ok(None),
            Err(e) => {
                self.pending.clear();
                Err(e)
            }
        }
    }

    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take the buffered bytes, leaving the reassembler empty.
    pub fn take_pending(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
