//! Recursive character splitter.
//!
//! Splits on the coarsest separator present in the text (paragraph, line,
//! sentence, word), recursing into pieces that are still too long and
//! falling back to single characters. Adjacent pieces are merged back into
//! windows of at most `chunk_size` characters, each window starting with up
//! to `chunk_overlap` characters carried over from the previous one.

use tracing::warn;

use crate::error::ChunkingError;

const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(ChunkingError::InvalidWindow {
                size: chunk_size,
                overlap: chunk_overlap,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        // First separator that occurs in the text; the empty separator
        // always matches and ends the ladder.
        let position = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep.as_str()));
        let (separator, finer) = match position {
            Some(i) => (separators[i].as_str(), &separators[i + 1..]),
            None => ("", &separators[separators.len()..]),
        };

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge(&pending));
                pending.clear();
            }
            if finer.is_empty() || separator.is_empty() {
                if let Some(trimmed) = non_empty_trimmed(piece) {
                    chunks.push(trimmed);
                }
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge(&pending));
        }
        chunks
    }

    /// Greedily pack pieces into windows, keeping an overlapping tail.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut windows = Vec::new();
        let mut current: Vec<(&str, usize)> = Vec::new();
        let mut total = 0usize;
        let mut head = 0usize;

        for &piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size && head < current.len() {
                if total > self.chunk_size {
                    warn!(
                        "Created a chunk of {} characters, longer than the window of {}",
                        total, self.chunk_size
                    );
                }
                if let Some(window) = join_window(&current[head..]) {
                    windows.push(window);
                }
                while head < current.len()
                    && (total > self.chunk_overlap || (total + len > self.chunk_size && total > 0))
                {
                    total -= current[head].1;
                    head += 1;
                }
            }

            current.push((piece, len));
            total += len;
        }

        if let Some(window) = join_window(&current[head..]) {
            windows.push(window);
        }
        windows
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn non_empty_trimmed(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn join_window(pieces: &[(&str, usize)]) -> Option<String> {
    let joined: String = pieces.iter().map(|(piece, _)| *piece).collect();
    non_empty_trimmed(&joined)
}

/// Split so that every piece after the first starts with the separator.
/// The empty separator splits into single characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (index, _) in text.match_indices(separator) {
        if index > start {
            pieces.push(&text[start..index]);
        }
        start = index;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}
