//! Splitting long outbound text to fit a chat payload limit
//!
//! Breaks are chosen at the coarsest boundary that fits: paragraph, then
//! line, then sentence, then whitespace. Separators between units that end
//! up in the same piece are kept as written, so code blocks and multi-line
//! output keep their layout. A single word longer than the limit is the
//! only thing ever cut mid-word.

/// Default payload limit of the chat platform
pub const DEFAULT_MAX_LEN: usize = 2000;

/// Split `text` into pieces of at most `max_len` characters.
///
/// Pieces are trimmed and never empty. Text that already fits comes back as
/// a single piece.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if char_len(trimmed) <= max_len {
        return vec![trimmed.to_string()];
    }

    let mut out = Vec::new();
    pack(trimmed, max_len, Level::Paragraph, &mut out);
    out
}

#[derive(Debug, Clone, Copy)]
enum Level {
    Paragraph,
    Line,
    Sentence,
    Word,
}

impl Level {
    fn finer(self) -> Option<Level> {
        match self {
            Level::Paragraph => Some(Level::Line),
            Level::Line => Some(Level::Sentence),
            Level::Sentence => Some(Level::Word),
            Level::Word => None,
        }
    }
}

/// Greedily pack units of `level` into pieces, descending a level for any
/// unit that alone is too long.
///
/// Units carry their own separators, so `current` is always a verbatim
/// slice of the input.
fn pack(text: &str, max_len: usize, level: Level, out: &mut Vec<String>) {
    let mut current = String::new();

    for unit in units(text, level) {
        let body = unit.trim();
        if body.is_empty() {
            current.push_str(unit);
            continue;
        }

        if char_len(body) > max_len {
            flush(&mut current, out);
            match level.finer() {
                Some(finer) => pack(body, max_len, finer, out),
                None => hard_split(body, max_len, out),
            }
            continue;
        }

        // Length of the piece if this unit joined it, as flush would trim it
        let joined_len = char_len(current.trim_start()) + char_len(unit.trim_end());
        if joined_len > max_len {
            flush(&mut current, out);
        }
        current.push_str(unit);
    }

    flush(&mut current, out);
}

/// Units of `level` that concatenate back to `text`, each ending with its separator
fn units(text: &str, level: Level) -> Vec<&str> {
    match level {
        Level::Paragraph => text.split_inclusive("\n\n").collect(),
        Level::Line => text.split_inclusive('\n').collect(),
        Level::Sentence => sentences(text),
        Level::Word => text.split_inclusive(char::is_whitespace).collect(),
    }
}

/// Sentence units end after `.`, `!` or `?` followed by whitespace
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let at_boundary = match chars.peek() {
            Some((_, next)) => next.is_whitespace(),
            None => true,
        };
        if at_boundary {
            let end = i + c.len_utf8();
            out.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

fn hard_split(word: &str, max_len: usize, out: &mut Vec<String>) {
    let chars: Vec<char> = word.chars().collect();
    for chunk in chars.chunks(max_len) {
        out.push(chunk.iter().collect());
    }
}

fn flush(current: &mut String, out: &mut Vec<String>) {
    let piece = current.trim();
    if !piece.is_empty() {
        out.push(piece.to_string());
    }
    current.clear();
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_bounded(pieces: &[String], max_len: usize) {
        for piece in pieces {
            assert!(!piece.is_empty());
            assert!(piece.chars().count() <= max_len, "piece too long: {:?}", piece);
        }
    }

    #[test]
    fn test_short_text_is_untouched() {
        assert_eq!(split_message("hello", 2000), vec!["hello".to_string()]);
        assert!(split_message("   ", 10).is_empty());
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let text = "First paragraph here.\n\nSecond paragraph here.";
        let pieces = split_message(text, 30);

        assert_eq!(pieces, vec!["First paragraph here.", "Second paragraph here."]);
    }

    #[test]
    fn test_falls_back_to_sentences() {
        let text = "One short sentence. Another short sentence! A third?";
        let pieces = split_message(text, 25);

        assert_eq!(pieces, vec!["One short sentence.", "Another short sentence!", "A third?"]);
        assert_bounded(&pieces, 25);
    }

    #[test]
    fn test_falls_back_to_whitespace_without_cutting_words() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let pieces = split_message(text, 12);

        assert_bounded(&pieces, 12);
        let rejoined = pieces.join(" ");
        assert_eq!(rejoined, text);
        for piece in &pieces {
            for word in piece.split(' ') {
                assert!(text.split(' ').any(|w| w == word));
            }
        }
    }

    #[test]
    fn test_oversized_word_is_hard_split() {
        let word = "x".repeat(25);
        let pieces = split_message(&word, 10);

        assert_eq!(pieces.len(), 3);
        assert_bounded(&pieces, 10);
        assert_eq!(pieces.concat(), word);
    }

    #[test]
    fn test_multibyte_characters_counted_as_chars() {
        let text = "héllo wörld ünïcode";
        let pieces = split_message(text, 11);

        assert_bounded(&pieces, 11);
        assert_eq!(pieces.join(" "), text);
    }

    #[test]
    fn test_decimal_points_do_not_end_sentences() {
        let units = sentences("Cost was 0.5 dollars. Done.");
        assert_eq!(units, vec!["Cost was 0.5 dollars.", " Done."]);
    }

    #[test]
    fn test_long_code_listing_keeps_its_lines() {
        let lines: Vec<String> = (0..30).map(|n| format!("let x{} = {};", n, n)).collect();
        let text = format!("Here is code:\n{}", lines.join("\n"));
        let pieces = split_message(&text, 120);

        assert!(pieces.len() > 1);
        assert_bounded(&pieces, 120);
        assert!(pieces[0].starts_with("Here is code:\n"));
        assert_eq!(pieces.join("\n"), text);
        for piece in &pieces {
            assert!(piece.lines().all(|l| l == "Here is code:" || l.starts_with("let x")));
        }
    }

    #[test]
    fn test_separators_inside_a_piece_are_kept() {
        let words = "word ".repeat(8);
        let text = format!("🤔 Thinking...\nstep one\n\nstep two\n{}", words.trim());
        let pieces = split_message(&text, 60);

        assert_eq!(
            pieces,
            vec![
                "🤔 Thinking...\nstep one".to_string(),
                format!("step two\n{}", words.trim()),
            ]
        );
    }

    #[test]
    fn test_large_text_respects_default_limit() {
        let paragraph = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(30);
        let text = format!("{}\n\n{}\n\n{}", paragraph, paragraph, paragraph);
        let pieces = split_message(&text, DEFAULT_MAX_LEN);

        assert!(pieces.len() >= 3);
        assert_bounded(&pieces, DEFAULT_MAX_LEN);
    }
}
