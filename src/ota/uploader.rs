//! Sender side of the OTA protocol, for host tools and bench rigs.
//!
//! Stop-and-wait: every frame is followed by one reply byte. A data chunk
//! that is NAKed or not answered within the reply timeout is resent up to
//! `max_retries` times. Start and end frames are sent once.
//!
//! Resending after a lost ACK writes that chunk twice on the device; the
//! size check at EndTransfer then refuses the image and the caller has to
//! start over.

use core::fmt::Debug;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Result, UploadError};

use super::protocol::{
    MAX_CHUNK_PAYLOAD, MAX_DATA_FRAME_LEN, Reply, encode_chunk, encode_end, encode_start,
};

/// Byte link to a device, as seen by the sender.
pub trait UploadLink {
    type Error: Debug;

    fn send(&mut self, data: &[u8]) -> core::result::Result<(), Self::Error>;

    /// Wait up to `timeout` for one reply byte. `Ok(None)` on timeout.
    fn recv_reply(&mut self, timeout: Duration) -> core::result::Result<Option<u8>, Self::Error>;
}

/// Summary of a finished upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    pub bytes: u32,
    pub chunks: u32,
    /// Chunk resends across the whole upload.
    pub retries: u32,
}

#[derive(Debug, Clone)]
pub struct Uploader {
    chunk_size: usize,
    max_retries: u32,
    reply_timeout: Duration,
}

impl Default for Uploader {
    fn default() -> Self {
        Self {
            chunk_size: MAX_CHUNK_PAYLOAD,
            max_retries: 3,
            reply_timeout: Duration::from_secs(2),
        }
    }
}

impl Uploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload bytes per chunk, clamped to `1..=1021`.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_CHUNK_PAYLOAD);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Push `image` through `link`.
    pub fn upload<L: UploadLink>(&self, link: &mut L, image: &[u8]) -> Result<UploadReport> {
        let total = u32::try_from(image.len()).map_err(|_| UploadError::InvalidImage)?;
        if total == 0 {
            return Err(UploadError::InvalidImage.into());
        }

        info!("upload: {} bytes in chunks of {}", total, self.chunk_size);
        link.send(&encode_start(total)).map_err(link_err)?;
        if !self.acked(link)? {
            return Err(UploadError::StartRejected.into());
        }

        let mut report = UploadReport {
            bytes: 0,
            chunks: 0,
            retries: 0,
        };
        let mut frame = [0u8; MAX_DATA_FRAME_LEN];

        for chunk in image.chunks(self.chunk_size) {
            let offset = report.bytes;
            // chunk.len() ≤ chunk_size ≤ MAX_CHUNK_PAYLOAD
            let len = encode_chunk(chunk, &mut frame).ok_or(UploadError::InvalidImage)?;

            let mut attempt = 0;
            loop {
                link.send(&frame[..len]).map_err(link_err)?;
                if self.acked(link)? {
                    break;
                }
                if attempt >= self.max_retries {
                    warn!("upload: chunk at {} failed after {} retries", offset, attempt);
                    return Err(UploadError::ChunkRetriesExhausted { offset }.into());
                }
                attempt += 1;
                report.retries += 1;
                debug!("upload: resending chunk at {} (attempt {})", offset, attempt + 1);
            }

            report.bytes += chunk.len() as u32;
            report.chunks += 1;
            debug!("upload: {}/{} bytes", report.bytes, total);
        }

        link.send(&encode_end()).map_err(link_err)?;
        if !self.acked(link)? {
            return Err(UploadError::EndRejected.into());
        }

        info!(
            "upload: done, {} chunks, {} retries",
            report.chunks, report.retries
        );
        Ok(report)
    }

    /// Anything other than an ACK within the timeout counts as a NAK.
    fn acked<L: UploadLink>(&self, link: &mut L) -> Result<bool> {
        let Some(byte) = link.recv_reply(self.reply_timeout).map_err(link_err)? else {
            return Ok(false);
        };
        match Reply::from_byte(byte) {
            Some(reply) => Ok(reply == Reply::Ack),
            None => {
                warn!("upload: unexpected reply byte 0x{:02X}", byte);
                Ok(false)
            }
        }
    }
}

fn link_err<E: Debug>(e: E) -> UploadError {
    warn!("upload: link error {:?}", e);
    UploadError::Link
}
