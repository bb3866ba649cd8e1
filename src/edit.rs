//! Byte-splice edit buffer over original source bytes.
//!
//! The rewriter never reorders or removes existing statements; every mutation
//! is a statement prepended to some block. Edits are therefore recorded as
//! byte-range splices against the *unmodified* input and applied in a single
//! pass, which keeps the rest of the file — comments, blank lines, alignment —
//! byte-identical. A multi-line block needs only an insertion after its
//! opening brace; a single-line block is broken open, with its existing
//! interior moved onto a line of its own. Inserted statements are rendered
//! with gofmt-style indentation (the owning line's indent plus one tab), so
//! already-formatted input stays formatted.

use tree_sitter::Node;

/// A set of pending splices for one file.
#[derive(Debug, Default)]
pub struct EditSet {
    edits: Vec<Edit>,
}

/// Replace `src[start..end]` with `text`. Pure insertions have `start == end`.
#[derive(Debug)]
struct Edit {
    start: usize,
    end: usize,
    text: String,
}

impl EditSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Record `stmt` as the new first statement of `block`.
    ///
    /// `block` must be a `block` node (its first byte is the opening brace).
    /// A single-line block — `{}` or `{ x() }` — is broken open so the
    /// inserted statement, any existing interior, and the closing brace each
    /// get their own line. Only the whitespace next to the braces is
    /// replaced, so edits inside the block's interior (a nested callback
    /// body on the same line) never conflict with this one.
    pub fn prepend_statement(&mut self, block: Node, src: &[u8], stmt: &str) {
        let lbrace = block.start_byte();
        let rbrace = block.end_byte() - 1;
        let indent = line_indent(src, lbrace);
        let single_line = block.start_position().row == block.end_position().row;

        if !single_line {
            self.edits.push(Edit {
                start: lbrace + 1,
                end: lbrace + 1,
                text: format!("\n{indent}\t{stmt}"),
            });
            return;
        }

        let interior = &src[lbrace + 1..rbrace];
        let is_ws = |b: &&u8| matches!(**b, b' ' | b'\t');
        let lead = interior.iter().take_while(is_ws).count();
        let trail = interior.iter().rev().take_while(is_ws).count();
        if lead + trail >= interior.len() {
            // Nothing but whitespace between the braces.
            self.edits.push(Edit {
                start: lbrace + 1,
                end: rbrace,
                text: format!("\n{indent}\t{stmt}\n{indent}"),
            });
        } else {
            self.edits.push(Edit {
                start: lbrace + 1,
                end: lbrace + 1 + lead,
                text: format!("\n{indent}\t{stmt}\n{indent}\t"),
            });
            self.edits.push(Edit {
                start: rbrace - trail,
                end: rbrace,
                text: format!("\n{indent}"),
            });
        }
    }

    /// Splice all recorded edits into `src`.
    ///
    /// Fails when the edit set violates its own invariants (a range out of
    /// bounds, or two edits overlapping) — the caller treats that as an
    /// internal error, never as bad input.
    pub fn apply(mut self, src: &[u8]) -> Result<Vec<u8>, String> {
        self.edits.sort_by_key(|e| (e.start, e.end));

        let extra: usize = self.edits.iter().map(|e| e.text.len()).sum();
        let mut out = Vec::with_capacity(src.len() + extra);
        let mut at = 0;
        let mut prev: Option<(usize, usize)> = None;
        for edit in &self.edits {
            if edit.end > src.len() {
                return Err(format!(
                    "edit range {}..{} beyond end of {}-byte source",
                    edit.start,
                    edit.end,
                    src.len()
                ));
            }
            if let Some((prev_start, prev_end)) = prev {
                if edit.start < prev_end || edit.start == prev_start {
                    return Err(format!("overlapping edits at offset {}", edit.start));
                }
            }
            prev = Some((edit.start, edit.end));
            out.extend_from_slice(&src[at..edit.start]);
            out.extend_from_slice(edit.text.as_bytes());
            at = edit.end;
        }
        out.extend_from_slice(&src[at..]);
        Ok(out)
    }
}

/// Leading whitespace of the line containing `offset`.
fn line_indent(src: &[u8], offset: usize) -> String {
    let line_start = src[..offset]
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |p| p + 1);
    let indent: Vec<u8> = src[line_start..]
        .iter()
        .take_while(|&&b| b == b' ' || b == b'\t')
        .copied()
        .collect();
    String::from_utf8(indent).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
