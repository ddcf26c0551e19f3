// Multipart stream demultiplexer
//
// Turns an arbitrarily chunked byte stream of boundary-delimited parts into
// an ordered sequence of video payloads. Each part looks like:
//
//   <boundary>\r\nContent-Type: video/mp2t\r\nContent-Length: 1234\r\n\r\n<1234 bytes>
//
// Only the declared length is trusted for the body; the boundary is searched
// for again after each body. Parts that are not video (audio, metadata) are
// skipped by their declared length.

use std::io::Read;

use super::{RawFrameChunk, Result};

/// Unmatched bytes allowed to pile up before the buffer is trimmed
pub const MAX_UNMATCHED_BYTES: usize = 200_000;

/// Trailing bytes kept when trimming (enough to hold a split boundary)
pub const KEEP_UNMATCHED_BYTES: usize = 100_000;

/// Part headers longer than this are treated as garbage
const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Declared lengths above this are treated as garbage
const MAX_PART_BYTES: usize = 16 * 1024 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Read size used by `MultipartDemuxer`
const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Push-style parser: feed bytes in, pull complete video payloads out
pub struct MultipartParser {
    boundary: Vec<u8>,
    buffer: Vec<u8>,
    max_unmatched: usize,
    keep_unmatched: usize,
    parts_skipped: u64,
}

/// Parsed per-part headers
#[derive(Debug, Default, PartialEq)]
struct PartHeaders {
    content_length: Option<usize>,
    content_type: String,
}

impl PartHeaders {
    fn parse(raw: &[u8]) -> Self {
        // Headers are ASCII in practice; map bytes 1:1 like latin-1
        let text: String = raw.iter().map(|&b| b as char).collect();
        let mut headers = PartHeaders::default();

        for line in text.split("\r\n") {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim();
            match name.as_str() {
                "content-length" => headers.content_length = value.parse().ok(),
                "content-type" => headers.content_type = value.to_string(),
                _ => {}
            }
        }

        headers
    }

    fn is_video(&self) -> bool {
        let content_type = self.content_type.to_ascii_lowercase();
        content_type.contains("h264") || content_type.contains("video")
    }
}

impl MultipartParser {
    pub fn new(boundary: impl AsRef<[u8]>) -> Self {
        Self::with_limits(boundary, MAX_UNMATCHED_BYTES, KEEP_UNMATCHED_BYTES)
    }

    /// Create a parser with custom trimming limits (`keep` is clamped to `max`)
    pub fn with_limits(boundary: impl AsRef<[u8]>, max_unmatched: usize, keep_unmatched: usize) -> Self {
        Self {
            boundary: boundary.as_ref().to_vec(),
            buffer: Vec::new(),
            max_unmatched,
            keep_unmatched: keep_unmatched.min(max_unmatched),
            parts_skipped: 0,
        }
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes currently held waiting for a boundary, headers or body
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Non-video, empty or malformed parts skipped so far
    pub fn parts_skipped(&self) -> u64 {
        self.parts_skipped
    }

    /// Return the next complete video payload, or None if more bytes are needed
    pub fn next_payload(&mut self) -> Option<Vec<u8>> {
        loop {
            let Some(boundary_at) = find(&self.buffer, &self.boundary) else {
                self.trim_unmatched();
                return None;
            };

            let headers_at = boundary_at + self.boundary.len();
            let Some(header_len) = find(&self.buffer[headers_at..], HEADER_TERMINATOR) else {
                if self.buffer.len() - headers_at > MAX_HEADER_BYTES {
                    // No header terminator in sight: drop this boundary and resync
                    self.skip_to(headers_at);
                    continue;
                }
                // Drop anything before the boundary so it cannot accumulate
                self.buffer.drain(..boundary_at);
                return None;
            };

            let headers = PartHeaders::parse(&self.buffer[headers_at..headers_at + header_len]);
            let body_at = headers_at + header_len + HEADER_TERMINATOR.len();

            let length = match headers.content_length {
                Some(0) | None => {
                    // Nothing to yield; resume scanning right after the headers
                    self.skip_to(body_at);
                    continue;
                }
                Some(len) if len > MAX_PART_BYTES => {
                    log::debug!("Multipart: declared length {} too large, resyncing", len);
                    self.skip_to(headers_at);
                    continue;
                }
                Some(len) => len,
            };

            if self.buffer.len() < body_at + length {
                // Body still arriving
                self.buffer.drain(..boundary_at);
                return None;
            }

            let body_end = body_at + length;
            if !headers.is_video() {
                self.skip_to(body_end);
                continue;
            }

            let payload = self.buffer[body_at..body_end].to_vec();
            self.buffer.drain(..body_end);
            return Some(payload);
        }
    }

    fn skip_to(&mut self, offset: usize) {
        self.parts_skipped += 1;
        self.buffer.drain(..offset);
    }

    fn trim_unmatched(&mut self) {
        if self.buffer.len() > self.max_unmatched {
            let cut = self.buffer.len() - self.keep_unmatched;
            self.buffer.drain(..cut);
        }
    }
}

/// Pull-style demultiplexer over any `Read` (the HTTPS response body)
pub struct MultipartDemuxer<R: Read> {
    reader: R,
    parser: MultipartParser,
    read_buf: Vec<u8>,
    finished: bool,
}

impl<R: Read> MultipartDemuxer<R> {
    pub fn new(reader: R, boundary: impl AsRef<[u8]>) -> Self {
        Self {
            reader,
            parser: MultipartParser::new(boundary),
            read_buf: vec![0u8; READ_CHUNK_BYTES],
            finished: false,
        }
    }
}

impl<R: Read> Iterator for MultipartDemuxer<R> {
    type Item = Result<RawFrameChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            if let Some(payload) = self.parser.next_payload() {
                return Some(Ok(RawFrameChunk::new(payload)));
            }

            match self.reader.read(&mut self.read_buf) {
                Ok(0) => {
                    self.finished = true;
                    return None;
                }
                Ok(n) => self.parser.push(&self.read_buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

/// Position of the first occurrence of `needle` in `haystack`
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    let first = needle[0];
    let last_start = haystack.len() - needle.len();
    let mut pos = 0;
    while pos <= last_start {
        let offset = haystack[pos..=last_start].iter().position(|&b| b == first)?;
        pos += offset;
        if &haystack[pos..pos + needle.len()] == needle {
            return Some(pos);
        }
        pos += 1;
    }
    None
}
