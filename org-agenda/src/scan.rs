//! Line splitting and the pre-pass that finds regions headline detection must skip.

use std::ops::Range;

/// One physical line of the source with its byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    /// Line text without the line terminator.
    pub text: &'a str,
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset just past the line terminator.
    pub next: usize,
    /// 1-based line number.
    pub number: usize,
}

impl<'a> Line<'a> {
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Same line with the first `bytes` bytes cut off.
    pub fn skip(&self, bytes: usize) -> Line<'a> {
        let bytes = bytes.min(self.text.len());
        Line {
            text: &self.text[bytes..],
            start: self.start + bytes,
            next: self.next,
            number: self.number,
        }
    }
}

/// Split `text` into lines. `\r\n` and `\n` both terminate a line.
pub fn lines(text: &str) -> Vec<Line<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut number = 1;
    while start < text.len() {
        let rest = &text[start..];
        let (len, next) = match rest.find('\n') {
            Some(pos) => (pos, start + pos + 1),
            None => (rest.len(), text.len()),
        };
        let mut line = &rest[..len];
        if let Some(stripped) = line.strip_suffix('\r') {
            line = stripped;
        }
        out.push(Line {
            text: line,
            start,
            next,
            number,
        });
        start = next;
        number += 1;
    }
    out
}

/// Column width of leading whitespace; tabs count as 8.
pub fn indentation(s: &str) -> usize {
    s.chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .map(|c| if c == '\t' { 8 } else { 1 })
        .sum()
}

/// Byte index after removing up to `columns` columns of leading whitespace.
pub fn dedent_offset(s: &str, columns: usize) -> usize {
    let mut col = 0;
    for (idx, c) in s.char_indices() {
        if col >= columns {
            return idx;
        }
        match c {
            ' ' => col += 1,
            '\t' => col += 8,
            _ => return idx,
        }
    }
    s.len()
}

/// A comment line: optional indentation, `#`, then a space or end of line.
pub fn is_comment_line(s: &str) -> bool {
    let t = s.trim_start();
    t == "#" || t.starts_with("# ")
}

/// Copy of `text` with comment lines blanked out. Byte offsets are preserved.
pub fn mask_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in lines(text) {
        if is_comment_line(line.text) {
            out.extend(std::iter::repeat_n(' ', line.text.len()));
        } else {
            out.push_str(line.text);
        }
        out.push_str(&text[line.end()..line.next]);
    }
    out
}

/// Whether a verbatim block line must be written with a leading comma so it is
/// not read as a headline or a `#+` keyword.
pub fn needs_comma_escape(s: &str) -> bool {
    let core = s.trim_start_matches(',');
    core.starts_with('*') || core.starts_with("#+")
}

/// Name of a `#+BEGIN_NAME` line, or `:` for `#+BEGIN:` dynamic blocks.
pub fn block_begin(s: &str) -> Option<&str> {
    let t = s.trim_start();
    let head = t.get(..8)?;
    if !head.eq_ignore_ascii_case("#+begin_") && !head.eq_ignore_ascii_case("#+begin:") {
        return None;
    }
    if head.ends_with(':') {
        return Some(":");
    }
    let rest = &t[8..];
    let name_len = rest.find(char::is_whitespace).unwrap_or(rest.len());
    if name_len == 0 {
        return None;
    }
    Some(&rest[..name_len])
}

/// Whether `s` closes a block opened with `name` (as returned by [`block_begin`]).
pub fn is_block_end(s: &str, name: &str) -> bool {
    let t = s.trim();
    if name == ":" {
        return t.get(..6).is_some_and(|h| h.eq_ignore_ascii_case("#+end:"));
    }
    let Some(head) = t.get(..6) else {
        return false;
    };
    if !head.eq_ignore_ascii_case("#+end_") {
        return false;
    }
    t[6..].eq_ignore_ascii_case(name)
}

/// Index of the line closing the block opened at `lines[begin]`.
pub fn find_block_end(lines: &[Line<'_>], begin: usize, name: &str) -> Option<usize> {
    lines
        .iter()
        .enumerate()
        .skip(begin + 1)
        .find(|(_, line)| is_block_end(line.text, name))
        .map(|(idx, _)| idx)
}

/// Byte ranges where line-start syntax such as headlines is not recognized:
/// every `#+BEGIN_...` block from its begin line to its end line. An unterminated
/// block extends to the end of the text.
pub fn opaque_regions(text: &str) -> Vec<Range<usize>> {
    let lines = lines(text);
    let mut regions = Vec::new();
    let mut idx = 0;
    while idx < lines.len() {
        let line = lines[idx];
        if is_comment_line(line.text) {
            idx += 1;
            continue;
        }
        match block_begin(line.text) {
            Some(name) => match find_block_end(&lines, idx, name) {
                Some(end) => {
                    regions.push(line.start..lines[end].next);
                    idx = end + 1;
                }
                None => {
                    tracing::debug!(line = line.number, block = name, "unterminated block");
                    regions.push(line.start..text.len());
                    break;
                }
            },
            None => idx += 1,
        }
    }
    regions
}

/// Whether `pos` falls inside one of `regions` (sorted, non-overlapping).
pub fn in_regions(regions: &[Range<usize>], pos: usize) -> bool {
    let idx = regions.partition_point(|r| r.end <= pos);
    regions.get(idx).is_some_and(|r| r.contains(&pos))
}

/// Byte index of the bracket closing the one at `open` (`s[open..]` must start with `open_ch`).
pub fn matching_close(s: &str, open: usize, open_ch: char, close_ch: char) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, c) in s[open..].char_indices() {
        if c == open_ch {
            depth += 1;
        } else if c == close_ch {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(open + idx);
            }
        }
    }
    None
}
