//! Random payload generation for DATA streams.
//!
//! A stream body of `n` bytes goes out as `n / page_size` full pages followed
//! by one partial page of `n % page_size` bytes (skipped when empty). Each page
//! is a separate write so a receiver sees the same write pattern on every run.

use rand::Rng;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Default page size for payload writes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Writes pseudorandom stream bodies in fixed-size pages.
#[derive(Debug)]
pub struct PayloadGenerator {
    page: Vec<u8>,
}

impl PayloadGenerator {
    /// Create a generator that writes pages of `page_size` bytes.
    pub fn new(page_size: usize) -> Self {
        assert!(page_size > 0, "page size must be non-zero");
        Self {
            page: vec![0; page_size],
        }
    }

    /// Sizes of the writes a body of `total` bytes is split into.
    pub fn pages(&self, total: u64) -> Pages {
        Pages {
            remaining: total,
            page_size: self.page.len() as u64,
        }
    }

    /// Write `total` random bytes to `writer`, one `write_all` per page.
    ///
    /// Returns the number of writes issued.
    pub async fn write<W, R>(
        &mut self,
        writer: &mut W,
        rng: &mut R,
        total: u64,
    ) -> io::Result<usize>
    where
        W: AsyncWrite + Unpin + ?Sized,
        R: Rng,
    {
        let mut writes = 0;
        for len in self.pages(total) {
            let page = &mut self.page[..len];
            fill_page(rng, page);
            writer.write_all(page).await?;
            writes += 1;
        }
        Ok(writes)
    }
}

impl Default for PayloadGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

/// Fill `page` with random lowercase ASCII letters.
pub fn fill_page<R: Rng>(rng: &mut R, page: &mut [u8]) {
    for byte in page.iter_mut() {
        *byte = rng.gen_range(b'a'..=b'z');
    }
}

/// Iterator over page lengths for a payload.
#[derive(Debug, Clone)]
pub struct Pages {
    remaining: u64,
    page_size: u64,
}

impl Iterator for Pages {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let len = self.remaining.min(self.page_size);
        self.remaining -= len;
        Some(len as usize)
    }
}
