//! Stock channel functions.

use std::borrow::Cow;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::ChannelFunction;

/// Shared view of the bytes a [`ByteCounter`] has seen.
#[derive(Debug, Clone, Default)]
pub struct ByteCount(Arc<AtomicU64>);

impl ByteCount {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counts the bytes read from, or written to, the channel. Clones add to the same count.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter {
    count: ByteCount,
}

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> ByteCount {
        self.count.clone()
    }
}

impl ChannelFunction for ByteCounter {
    fn after_read(&mut self, data: &mut [u8]) -> io::Result<()> {
        self.count.0.fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn after_write(&mut self, data: &[u8]) -> io::Result<()> {
        self.count.0.fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Validates that the bytes passing through are UTF-8. A code point may be split
/// across calls; a stream that ends inside one is invalid.
#[derive(Debug, Default)]
pub struct Utf8Checker {
    partial: Vec<u8>,
}

impl Utf8Checker {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&mut self, data: &[u8]) -> io::Result<()> {
        let bytes = if self.partial.is_empty() {
            Cow::Borrowed(data)
        } else {
            let mut joined = std::mem::take(&mut self.partial);
            joined.extend_from_slice(data);
            Cow::Owned(joined)
        };

        match std::str::from_utf8(&bytes) {
            Ok(_) => Ok(()),
            Err(e) if e.error_len().is_none() => {
                self.partial = bytes[e.valid_up_to()..].to_vec();
                Ok(())
            }
            Err(_) => Err(invalid_utf8()),
        }
    }
}

fn invalid_utf8() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "Text frame contains non UTF-8 data")
}

impl ChannelFunction for Utf8Checker {
    fn after_read(&mut self, data: &mut [u8]) -> io::Result<()> {
        self.check(data)
    }

    fn after_write(&mut self, data: &[u8]) -> io::Result<()> {
        self.check(data)
    }

    fn complete(&mut self) -> io::Result<()> {
        if self.partial.is_empty() { Ok(()) } else { Err(invalid_utf8()) }
    }
}

/// XORs the bytes read with a repeating 4 byte key, the key position carrying over
/// from one read to the next. Unmasking and masking are the same operation.
#[derive(Debug)]
pub struct Masker {
    key: [u8; 4],
    position: usize,
}

impl Masker {
    pub fn new(key: [u8; 4]) -> Self {
        Self { key, position: 0 }
    }
}

impl ChannelFunction for Masker {
    fn after_read(&mut self, data: &mut [u8]) -> io::Result<()> {
        for byte in data.iter_mut() {
            *byte ^= self.key[self.position & 3];
            self.position = self.position.wrapping_add(1);
        }
        Ok(())
    }
}
