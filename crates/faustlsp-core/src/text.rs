//! Position codec: byte offsets, line/character positions and incremental
//! edits under a negotiated code-unit encoding.
//!
//! LSP positions count code units in the encoding the client and server
//! agreed on at initialize time. Only UTF-16 and UTF-32 are supported here;
//! UTF-8 is never negotiated.

use lsp_types::{Position, PositionEncodingKind, Range};

use crate::{Error, Result};

/// The position encoding negotiated with the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf16,
    Utf32,
}

impl Encoding {
    /// Maps an LSP encoding kind onto a supported encoding. UTF-8 yields
    /// `None`: callers must fall back to a supported encoding instead.
    pub fn from_kind(kind: &PositionEncodingKind) -> Option<Encoding> {
        match kind.as_str() {
            "utf-16" => Some(Encoding::Utf16),
            "utf-32" => Some(Encoding::Utf32),
            _ => None,
        }
    }

    pub fn kind(self) -> PositionEncodingKind {
        match self {
            Encoding::Utf16 => PositionEncodingKind::UTF16,
            Encoding::Utf32 => PositionEncodingKind::UTF32,
        }
    }

    /// Code units one scalar value occupies in this encoding.
    fn units(self, c: char) -> u32 {
        match self {
            Encoding::Utf16 => c.len_utf16() as u32,
            Encoding::Utf32 => 1,
        }
    }
}

/// Byte index of the start of every line. A line is terminated by `\n`;
/// the slice always contains at least the index 0.
pub fn line_starts(text: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

/// Converts a position into a byte offset into `text`.
///
/// For a text with `L` lines, `line` may range over `0..=L`; `(L, 0)`
/// denotes end-of-file. A `character` past the end of its line clamps to
/// the end of that line. Positions beyond `L` are an error.
pub fn offset_of(pos: Position, text: &str, encoding: Encoding) -> Result<usize> {
    if text.is_empty() {
        return Ok(0);
    }
    let starts = line_starts(text);
    let line = pos.line as usize;
    if line > starts.len() {
        return Err(Error::InvalidPosition {
            line: pos.line,
            character: pos.character,
        });
    }
    if line == starts.len() {
        return Ok(text.len());
    }

    let mut offset = starts[line];
    let mut remaining = pos.character;
    for c in text[offset..].chars() {
        if remaining == 0 || c == '\n' {
            break;
        }
        let units = encoding.units(c);
        if units > remaining {
            // A position inside a surrogate pair clamps to its start.
            break;
        }
        remaining -= units;
        offset += c.len_utf8();
    }
    Ok(offset)
}

/// Converts a byte offset into a position. Offsets past end-of-file clamp
/// to the end-of-file position.
pub fn position_of(offset: usize, text: &str, encoding: Encoding) -> Position {
    let mut line = 0u32;
    let mut character = 0u32;
    for (i, c) in text.char_indices() {
        if i >= offset {
            break;
        }
        if c == '\n' {
            line += 1;
            character = 0;
        } else {
            character += encoding.units(c);
        }
    }
    Position::new(line, character)
}

/// The end-of-file position of `text`.
pub fn document_end_position(text: &str, encoding: Encoding) -> Position {
    position_of(text.len(), text, encoding)
}

/// Applies one incremental edit: the text inside `range` (half-open) is
/// replaced by `new_text`.
pub fn apply_edit(range: Range, new_text: &str, text: &str, encoding: Encoding) -> Result<String> {
    let start = offset_of(range.start, text, encoding)?;
    let end = offset_of(range.end, text, encoding)?;
    let mut result = String::with_capacity(text.len() - (end - start) + new_text.len());
    result.push_str(&text[..start]);
    result.push_str(new_text);
    result.push_str(&text[end..]);
    Ok(result)
}
