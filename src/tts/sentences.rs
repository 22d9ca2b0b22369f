//! Sentence segmentation for streamed responses.
//!
//! Streaming text arrives as the full response so far. A sentence is complete
//! once its terminator is followed by whitespace, which keeps decimals such as
//! `3.5` and runs such as `...` or `?!` together. An ASCII terminator at the
//! very end of streamed text is held back until more text arrives or the
//! response completes. Newlines and full-width terminators close a sentence
//! immediately.

/// Byte offsets just past every sentence terminator in `text`. With
/// `complete`, a terminator at the end of the text also counts.
fn boundary_ends(text: &str, complete: bool) -> Vec<usize> {
    let mut ends = Vec::new();
    for (i, c) in text.char_indices() {
        let after = i + c.len_utf8();
        let terminal = match c {
            '。' | '！' | '？' | '\n' => true,
            '.' | '!' | '?' => {
                let rest = &text[after..];
                if rest.is_empty() {
                    complete
                } else {
                    rest.starts_with(char::is_whitespace)
                }
            }
            _ => false,
        };
        if terminal {
            ends.push(after);
        }
    }
    ends
}

/// Length of the prefix of streamed `text` made of complete sentences.
#[must_use]
pub fn complete_prefix_len(text: &str) -> usize {
    boundary_ends(text, false).last().copied().unwrap_or(0)
}

/// Complete sentences in `full` that were not already complete in `prev`.
///
/// When `full` does not extend `prev` (the server rewrote the response) the
/// whole text is rescanned; callers dedup against what they already spoke.
#[must_use]
pub fn extract_complete_sentences(prev: &str, full: &str) -> Vec<String> {
    let ends = boundary_ends(full, false);
    let start = if full.starts_with(prev) {
        let spoken = complete_prefix_len(prev);
        ends.iter().copied().take_while(|&end| end <= spoken).last().unwrap_or(0)
    } else {
        0
    };
    let mut sentences = Vec::new();
    let mut cursor = start;
    for end in ends {
        if end <= start {
            continue;
        }
        let sentence = full[cursor..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_owned());
        }
        cursor = end;
    }
    sentences
}

/// Text after the last complete sentence, trimmed. Includes a final sentence
/// whose terminator was held back.
#[must_use]
pub fn trailing_fragment(text: &str) -> &str {
    text[complete_prefix_len(text)..].trim()
}

/// Whether `fragment` ends in a sentence terminator.
#[must_use]
pub fn is_terminated(fragment: &str) -> bool {
    let text = fragment.trim_end();
    boundary_ends(text, true).last() == Some(&text.len())
}
