//! Marker-based fragment scanning over a chunked byte stream.
//!
//! Export files are too large to parse as one document, but every user entry
//! sits between a fixed opening marker and the next closing bracket. The scanner
//! carries incomplete input from one chunk to the next, so the fragments it
//! yields do not depend on where the chunk boundaries fall.

use std::collections::VecDeque;

use crate::error::{InstacoError, Result};

/// Text preceding every user entry in an export file
pub const OPEN_MARKER: &[u8] = b"\"string_list_data\": [";

/// Closes the list opened by [`OPEN_MARKER`]
pub const CLOSE_MARKER: u8 = b']';

/// Position of the first occurrence of `needle` in `haystack`.
pub fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[derive(Debug, Clone)]
pub struct FragmentScanner {
    open: Vec<u8>,
    close: u8,
    buffer: Vec<u8>,
}

impl Default for FragmentScanner {
    fn default() -> Self {
        Self::new(OPEN_MARKER, CLOSE_MARKER)
    }
}

impl FragmentScanner {
    pub fn new(open: &[u8], close: u8) -> Self {
        assert!(!open.is_empty(), "opening marker must not be empty");
        Self {
            open: open.to_vec(),
            close,
            buffer: Vec::new(),
        }
    }

    /// Append `chunk` and push every fragment completed by it onto `out`.
    /// Returns the number of fragments found.
    pub fn feed(&mut self, chunk: &[u8], out: &mut VecDeque<Vec<u8>>) -> usize {
        self.buffer.extend_from_slice(chunk);

        let mut consumed = 0;
        let mut found = 0;

        loop {
            let rest = &self.buffer[consumed..];

            let Some(start) = find_subslice(rest, &self.open) else {
                // Only a marker split across the boundary can still start here
                let keep = (self.open.len() - 1).min(rest.len());
                consumed = self.buffer.len() - keep;
                break;
            };

            let body_start = start + self.open.len();
            match rest[body_start..].iter().position(|&b| b == self.close) {
                Some(len) => {
                    out.push_back(rest[body_start..body_start + len].to_vec());
                    found += 1;
                    // Resume at the closing marker
                    consumed += body_start + len;
                }
                None => {
                    consumed += start;
                    break;
                }
            }
        }

        self.buffer.drain(..consumed);
        found
    }

    /// Bytes carried over to the next chunk.
    pub fn carry_over(&self) -> &[u8] {
        &self.buffer
    }

    /// Check the carry-over once the stream is exhausted.
    ///
    /// An opening marker without its closing marker means the file was cut short.
    /// Anything else left over is the tail of the document and is ignored.
    pub fn finish(&self) -> Result<()> {
        match find_subslice(&self.buffer, &self.open) {
            Some(start) => {
                let tail = String::from_utf8_lossy(&self.buffer[start..]);
                let preview: String = tail.chars().take(80).collect();
                Err(InstacoError::TruncatedInput(format!(
                    "unterminated fragment at end of stream: {}",
                    preview
                )))
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
  "relationships_following": [
    {
      "title": "",
      "media_list_data": [],
      "string_list_data": [
        {
          "href": "https://www.instagram.com/alice",
          "value": "alice",
          "timestamp": 1714987387
        }
      ]
    },
    {
      "title": "",
      "media_list_data": [],
      "string_list_data": [
        {
          "href": "https://www.instagram.com/böb",
          "value": "böb_ümlaut",
          "timestamp": 1714987000
        }
      ]
    },
    {
      "title": "",
      "string_list_data": [{"href": "https://www.instagram.com/carol", "value": "carol", "timestamp": 1600000000}]
    }
  ]
}"#;

    fn scan_in_chunks(input: &[u8], chunk_size: usize) -> (Vec<Vec<u8>>, FragmentScanner) {
        let mut scanner = FragmentScanner::default();
        let mut out = VecDeque::new();
        for chunk in input.chunks(chunk_size) {
            scanner.feed(chunk, &mut out);
        }
        (out.into_iter().collect(), scanner)
    }

    #[test]
    fn test_find_subslice() {
        assert_eq!(find_subslice(b"abcabc", b"ca"), Some(2));
        assert_eq!(find_subslice(b"abc", b"abcd"), None);
        assert_eq!(find_subslice(b"abc", b"x"), None);
        assert_eq!(find_subslice(b"abc", b""), Some(0));
    }

    #[test]
    fn test_extracts_every_fragment() {
        let (fragments, scanner) = scan_in_chunks(SAMPLE.as_bytes(), SAMPLE.len());
        assert_eq!(fragments.len(), 3);

        let first = String::from_utf8(fragments[0].clone()).unwrap();
        assert!(first.contains("\"value\": \"alice\""));
        assert!(!first.contains(']'));
        assert!(String::from_utf8(fragments[2].clone()).unwrap().contains("carol"));
        assert!(scanner.finish().is_ok());
    }

    #[test]
    fn test_chunk_size_does_not_change_fragments() {
        let input = SAMPLE.as_bytes();
        let (expected, _) = scan_in_chunks(input, input.len());

        for chunk_size in 1..=input.len() {
            let (fragments, scanner) = scan_in_chunks(input, chunk_size);
            assert_eq!(fragments, expected, "chunk size {}", chunk_size);
            assert!(scanner.finish().is_ok(), "chunk size {}", chunk_size);
        }
    }

    #[test]
    fn test_every_single_split_point() {
        let input = SAMPLE.as_bytes();
        let (expected, _) = scan_in_chunks(input, input.len());

        for split in 0..=input.len() {
            let mut scanner = FragmentScanner::default();
            let mut out = VecDeque::new();
            scanner.feed(&input[..split], &mut out);
            scanner.feed(&input[split..], &mut out);
            let fragments: Vec<_> = out.into_iter().collect();
            assert_eq!(fragments, expected, "split at {}", split);
        }
    }

    #[test]
    fn test_carry_over_stays_small_without_markers() {
        let mut scanner = FragmentScanner::default();
        let mut out = VecDeque::new();
        let filler = vec![b'x'; 10_000];
        scanner.feed(&filler, &mut out);
        assert!(out.is_empty());
        assert_eq!(scanner.carry_over().len(), OPEN_MARKER.len() - 1);
    }

    #[test]
    fn test_truncated_fragment_is_reported() {
        let cut = SAMPLE.find("\"value\": \"carol\"").unwrap();
        let (fragments, scanner) = scan_in_chunks(&SAMPLE.as_bytes()[..cut], 64);
        assert_eq!(fragments.len(), 2);
        assert!(matches!(scanner.finish(), Err(InstacoError::TruncatedInput(_))));
    }

    #[test]
    fn test_custom_markers() {
        let mut scanner = FragmentScanner::new(b"<<", b'>');
        let mut out = VecDeque::new();
        assert_eq!(scanner.feed(b"a<<one> b<<tw", &mut out), 1);
        assert_eq!(scanner.feed(b"o>c", &mut out), 1);
        assert_eq!(out, VecDeque::from(vec![b"one".to_vec(), b"two".to_vec()]));
    }
}
