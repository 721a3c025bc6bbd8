//! Query-centred snippet extraction

use crate::keyword::tokenize;

const ELLIPSIS: &str = "...";

/// Extract a window of at most `max_length` characters around the earliest
/// occurrence of any query token.
///
/// Lengths are counted in characters, not bytes. Text that already fits is
/// returned unchanged. A window that does not start at the beginning of the
/// text gets a leading `...`, one that does not reach the end a trailing
/// `...`. With no match the snippet is the head of the text.
pub fn extract_snippet(text: &str, query: &str, max_length: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let tokens = tokenize(query);

    if chars.len() <= max_length {
        return text.to_string();
    }
    if max_length == 0 {
        return String::new();
    }

    let (lowered, origin) = lowercase_with_origin(text, &chars);

    let earliest = tokens
        .iter()
        .filter_map(|token| {
            let needle: Vec<char> = token.chars().collect();
            let pos = find_chars(&lowered, &needle)?;
            let start = origin[pos];
            let end = origin[pos + needle.len() - 1] + 1;
            Some((start, end - start))
        })
        .min_by_key(|(pos, _)| *pos);

    let Some((position, token_len)) = earliest else {
        return head(&chars, max_length);
    };

    let centre = position + token_len / 2;
    let start = centre
        .saturating_sub(max_length / 2)
        .min(chars.len() - max_length);
    let end = start + max_length;

    let mut snippet = String::with_capacity(max_length + 2 * ELLIPSIS.len());
    if start > 0 {
        snippet.push_str(ELLIPSIS);
    }
    snippet.extend(&chars[start..end]);
    if end < chars.len() {
        snippet.push_str(ELLIPSIS);
    }
    snippet
}

/// Lowercase `text` exactly as `str::to_lowercase` does (the tokenizer's
/// casing, including multi-char expansions and final sigma) and record the
/// original char index each lowered char came from.
fn lowercase_with_origin(text: &str, chars: &[char]) -> (Vec<char>, Vec<usize>) {
    let lowered: Vec<char> = text.to_lowercase().chars().collect();
    let mut origin = Vec::with_capacity(lowered.len());
    for (index, c) in chars.iter().enumerate() {
        origin.extend(std::iter::repeat(index).take(c.to_lowercase().count()));
    }
    // Each char lowercases to the same number of chars in both forms
    debug_assert_eq!(origin.len(), lowered.len());
    (lowered, origin)
}

fn head(chars: &[char], max_length: usize) -> String {
    let mut snippet: String = chars[..max_length].iter().collect();
    if max_length < chars.len() {
        snippet.push_str(ELLIPSIS);
    }
    snippet
}

fn find_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
