#[cfg(test)]
use std::collections::VecDeque;
use std::str;

use agent_neo_model::ErrorKind;
use bytes::Bytes;
use reqwest::Response;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// Pulling the next chunk from the body failed.
    Transport { kind: ErrorKind, message: String },
    /// The body is not valid UTF-8.
    InvalidPayload,
}

/// The body of a response, chunk by chunk.
pub enum Chunks {
    Response(Response),
    #[cfg(test)]
    VecDeque(VecDeque<Bytes>),
}

impl Chunks {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        match self {
            Chunks::Response(response) => {
                response.chunk().await.map_err(|err| Error::Transport {
                    kind: crate::error_kind_of(&err),
                    message: err.to_string(),
                })
            }
            #[cfg(test)]
            Chunks::VecDeque(vec) => Ok(vec.pop_front()),
        }
    }
}

/// Reads newline-delimited JSON documents from a chunk stream. Each
/// returned line is non-empty and stripped of its line ending.
pub struct Lines {
    buf: String,
    // Bytes of a UTF-8 sequence split across two chunks.
    undecoded: Vec<u8>,
    chunks: Chunks,
    eof: bool,
}

impl Lines {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: String::new(),
            undecoded: Vec::new(),
            chunks,
            eof: false,
        }
    }

    pub async fn next_line(&mut self) -> Result<Option<String>, Error> {
        loop {
            if let Some(idx) = self.buf.find('\n') {
                let line: String = self.buf.drain(..=idx).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                return Ok(Some(line.to_owned()));
            }

            if self.eof {
                // The last document may not be followed by a newline.
                let rest = std::mem::take(&mut self.buf);
                let rest = rest.trim();
                if !self.undecoded.is_empty() {
                    return Err(Error::InvalidPayload);
                }
                return Ok((!rest.is_empty()).then(|| rest.to_owned()));
            }

            match self.chunks.next_chunk().await? {
                Some(bytes) => self.push_bytes(&bytes)?,
                None => self.eof = true,
            }
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.undecoded.extend_from_slice(bytes);
        let valid_len = match str::from_utf8(&self.undecoded) {
            Ok(s) => s.len(),
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            Err(_) => return Err(Error::InvalidPayload),
        };
        let rest = self.undecoded.split_off(valid_len);
        let decoded =
            str::from_utf8(&self.undecoded).map_err(|_| Error::InvalidPayload)?;
        self.buf.push_str(decoded);
        self.undecoded = rest;
        Ok(())
    }
}
