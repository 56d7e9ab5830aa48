//! Line-based splitting of source code

use crate::config::ChunkConfig;
use crate::error::{Error, Result};
use std::path::Path;

/// Source extensions and the language recorded on their chunks
const CODE_EXTENSIONS: &[(&str, &str)] = &[
    ("py", "python"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("vue", "vue"),
    ("go", "go"),
    ("java", "java"),
    ("cpp", "cpp"),
    ("h", "cpp"),
    ("c", "c"),
    ("rs", "rust"),
    ("rb", "ruby"),
    ("php", "php"),
    ("scala", "scala"),
    ("kt", "kotlin"),
    ("swift", "swift"),
    ("lua", "lua"),
    ("pl", "perl"),
    ("pm", "perl"),
    ("t", "perl"),
    ("pm6", "perl"),
    ("m", "perl"),
];

/// Language of a source file, `None` for non-code files
pub fn language_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    CODE_EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

/// Splits code into overlapping chunks bounded by line count and size
#[derive(Debug, Clone)]
pub struct CodeSplitter {
    lines: usize,
    overlap: usize,
    max_chars: usize,
}

impl CodeSplitter {
    pub fn new(lines: usize, overlap: usize, max_chars: usize) -> Result<Self> {
        if lines == 0 || max_chars == 0 {
            return Err(Error::Split(
                "chunk lines and max chars must be positive".to_string(),
            ));
        }
        if overlap >= lines {
            return Err(Error::Split(format!(
                "overlap ({}) must be smaller than chunk lines ({})",
                overlap, lines
            )));
        }
        Ok(Self {
            lines,
            overlap,
            max_chars,
        })
    }

    pub fn from_config(config: &ChunkConfig) -> Result<Self> {
        Self::new(config.lines, config.overlap_lines, config.max_chars)
    }

    /// Split `text` into chunks
    ///
    /// Every chunk is a contiguous slice of `text`. Lines longer than
    /// `max_chars` are cut into pieces first. Chunks with no visible content
    /// are dropped; text without any visible content is an error.
    pub fn split(&self, text: &str) -> Result<Vec<String>> {
        let segments = self.segments(text);

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < segments.len() {
            let mut end = start;
            let mut chars = 0;
            while end < segments.len() && end - start < self.lines {
                let len = segments[end].chars().count();
                if end > start && chars + len > self.max_chars {
                    break;
                }
                chars += len;
                end += 1;
            }

            let chunk: String = segments[start..end].concat();
            if !chunk.trim().is_empty() {
                chunks.push(chunk);
            }

            if end >= segments.len() {
                break;
            }
            // overlap never exceeds half of a window shortened by the size cap
            let taken = end - start;
            start += (taken - self.overlap.min(taken / 2)).max(1);
        }

        if chunks.is_empty() {
            return Err(Error::Split("no content to split".to_string()));
        }
        Ok(chunks)
    }

    /// Lines of `text` (with their terminators), long lines cut at `max_chars`
    fn segments<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut segments = Vec::new();
        for line in text.split_inclusive('\n') {
            let mut rest = line;
            while rest.chars().count() > self.max_chars {
                let cut = rest
                    .char_indices()
                    .nth(self.max_chars)
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                let (head, tail) = rest.split_at(cut);
                segments.push(head);
                rest = tail;
            }
            if !rest.is_empty() {
                segments.push(rest);
            }
        }
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_lines(n: usize) -> String {
        (0..n).map(|i| format!("line {}\n", i)).collect()
    }

    #[test]
    fn test_language_for_path() {
        assert_eq!(language_for_path(Path::new("/r/main.py")), Some("python"));
        assert_eq!(language_for_path(Path::new("App.TSX")), Some("typescript"));
        assert_eq!(language_for_path(Path::new("x.h")), Some("cpp"));
        assert_eq!(language_for_path(Path::new("README.md")), None);
        assert_eq!(language_for_path(Path::new("Makefile")), None);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(CodeSplitter::new(10, 10, 100).is_err());
        assert!(CodeSplitter::new(0, 0, 100).is_err());
        assert!(CodeSplitter::new(10, 2, 0).is_err());
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let splitter = CodeSplitter::new(80, 15, 1500).unwrap();
        let text = "def f():\n    return 1\n";
        assert_eq!(splitter.split(text).unwrap(), vec![text.to_string()]);
    }

    #[test]
    fn test_line_windows_overlap() {
        let splitter = CodeSplitter::new(10, 3, 10_000).unwrap();
        let text = numbered_lines(24);
        let chunks = splitter.split(&text).unwrap();

        // windows start at lines 0, 7, 14
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].starts_with("line 0\n"));
        assert!(chunks[0].ends_with("line 9\n"));
        assert!(chunks[1].starts_with("line 7\n"));
        assert!(chunks[2].starts_with("line 14\n"));
        assert!(chunks[2].ends_with("line 23\n"));
        for chunk in &chunks {
            assert!(text.contains(chunk.as_str()));
        }
    }

    #[test]
    fn test_char_cap_limits_chunk_size() {
        let splitter = CodeSplitter::new(80, 15, 50).unwrap();
        let text = numbered_lines(40);
        let chunks = splitter.split(&text).unwrap();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 50);
            assert!(text.contains(chunk.as_str()));
        }
        assert!(chunks.last().unwrap().ends_with("line 39\n"));
    }

    #[test]
    fn test_long_line_is_cut() {
        let splitter = CodeSplitter::new(80, 15, 100).unwrap();
        let text = "x".repeat(250);
        let chunks = splitter.split(&text).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_blank_text_is_an_error() {
        let splitter = CodeSplitter::new(80, 15, 1500).unwrap();
        assert!(matches!(splitter.split("\n\n  \n"), Err(Error::Split(_))));
    }
}
