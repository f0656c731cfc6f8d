/// Log excerpt helpers for diagnosis prompts and error records.

/// How to shorten text that exceeds the character limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationMode {
    /// Keep the first 40% and last 60%, with a marker in the middle.
    HeadTail,
    /// Keep the last `max_chars`, with a marker at the start.
    Tail,
}

/// Shorten `text` to roughly `max_chars` characters, never splitting a UTF-8 sequence.
pub fn truncate_output(text: &str, max_chars: usize, mode: TruncationMode) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }

    match mode {
        TruncationMode::HeadTail => {
            let head_end = floor_boundary(text, max_chars * 40 / 100);
            let tail_start = ceil_boundary(text, text.len() - (max_chars - max_chars * 40 / 100));
            let removed = tail_start - head_end;
            format!(
                "{}\n[... {} characters omitted ...]\n{}",
                &text[..head_end],
                removed,
                &text[tail_start..]
            )
        }
        TruncationMode::Tail => {
            let start = ceil_boundary(text, text.len() - max_chars);
            format!("[... {} characters omitted ...]\n{}", start, &text[start..])
        }
    }
}

/// Last `n` lines of `text`.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
