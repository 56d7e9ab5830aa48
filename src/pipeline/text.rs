//! Text decoding, validity check, and cleaning

use crate::error::{Error, Result};
use tracing::debug;

fn is_printable(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\t') || !c.is_control()
}

/// Decode raw bytes as UTF-8
pub fn decode(document_id: &str, content: Vec<u8>) -> Result<String> {
    String::from_utf8(content)
        .map_err(|e| Error::Decode(format!("{}, error: {}", document_id, e)))
}

/// Fraction of printable characters (newline, carriage return and tab count)
pub fn printable_ratio(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let printable = text.chars().filter(|c| is_printable(*c)).count();
    printable as f64 / total as f64
}

/// Whether `text` is non-empty and its printable ratio exceeds `threshold`
///
/// Rejected text logs a sample of at most `sample_chars` characters.
pub fn is_valid_text(text: &str, threshold: f64, sample_chars: usize) -> bool {
    if text.is_empty() {
        debug!("Text content is empty");
        return false;
    }

    let ratio = printable_ratio(text);
    if ratio <= threshold {
        let sample: String = text.chars().take(sample_chars).collect();
        debug!("Printable character ratio too low: {:.2}%", ratio * 100.0);
        debug!("Text sample: {:?}", sample);
        return false;
    }
    true
}

/// Strip non-printable characters, keeping newline, carriage return and tab
pub fn clean_text(text: &str) -> String {
    text.chars().filter(|c| is_printable(*c)).collect()
}
