//! The coarse scrollback line model.
//!
//! This core does not parse VT100/ANSI escape sequences; a `Line` is just
//! the text a pane wrote since the last resize or clear, a dirty flag doing
//! double duty as a "this physical line is a soft-wrap continuation of the
//! previous one" marker, and a per-pane sequence number used to answer
//! `get_changed_since`.

use serde::{Deserialize, Serialize};

/// A logical row number within a pane's history. Grows monotonically and
/// stays meaningful even as old rows are evicted from scrollback.
pub type StableRowIndex = isize;

/// A monotonic, pane-local sequence number bumped on every mutation.
pub type SeqNo = u64;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub text: String,
    /// Doubles as "this line is a soft-wrap continuation of the previous
    /// physical line" when reassembling logical lines.
    pub dirty: bool,
    pub seqno: SeqNo,
}

impl Line {
    pub fn new(text: String, seqno: SeqNo) -> Self {
        Self {
            text,
            dirty: false,
            seqno,
        }
    }
}

/// Rows are bounded to this many characters when rewrapped into a logical
/// line, so a runaway single-line program output can't make navigation or
/// search operations pathologically expensive.
pub const MAX_LOGICAL_LINE_LEN: usize = 1024;

/// A logical line is one or more physical rows stitched back together
/// because later rows' `dirty`/continuation flag indicated they were a
/// soft wrap of the prior row.
pub struct LogicalLine {
    pub physical_lines: Vec<Line>,
    pub logical: String,
    pub first_row: StableRowIndex,
}

impl LogicalLine {
    pub fn contains_y(&self, y: StableRowIndex) -> bool {
        y >= self.first_row && y < self.first_row + self.physical_lines.len() as StableRowIndex
    }

    /// Translate a (physical-row, x) coordinate that falls within this
    /// logical line into an offset into `self.logical`.
    pub fn xy_to_logical_x(&self, y: StableRowIndex, x: usize) -> usize {
        let mut offset = 0;
        for (idx, line) in self.physical_lines.iter().enumerate() {
            let row = self.first_row + idx as StableRowIndex;
            if row == y {
                return offset + x.min(line.text.chars().count());
            }
            offset += line.text.chars().count();
        }
        offset
    }

    /// Translate an offset into `self.logical` back into a (physical-row, x)
    /// coordinate.
    pub fn logical_x_to_physical_coord(&self, x: usize) -> (StableRowIndex, usize) {
        let mut remaining = x;
        for (idx, line) in self.physical_lines.iter().enumerate() {
            let len = line.text.chars().count();
            if remaining <= len {
                return (self.first_row + idx as StableRowIndex, remaining);
            }
            remaining -= len;
        }
        let last = self.physical_lines.len().saturating_sub(1);
        (
            self.first_row + last as StableRowIndex,
            self.physical_lines
                .last()
                .map(|l| l.text.chars().count())
                .unwrap_or(0),
        )
    }
}

/// Rewrap a contiguous run of physical lines (as returned by
/// `Pane::get_lines`) into logical lines, merging any line whose `dirty`
/// flag marks it as a continuation of the previous one, bounded to
/// `MAX_LOGICAL_LINE_LEN` characters per logical line.
pub fn rewrap_into_logical_lines(first_row: StableRowIndex, lines: Vec<Line>) -> Vec<LogicalLine> {
    let mut result = vec![];
    let mut cur_lines: Vec<Line> = vec![];
    let mut cur_text = String::new();
    let mut cur_first_row = first_row;

    macro_rules! flush {
        () => {
            if !cur_lines.is_empty() {
                result.push(LogicalLine {
                    physical_lines: std::mem::take(&mut cur_lines),
                    logical: std::mem::take(&mut cur_text),
                    first_row: cur_first_row,
                });
            }
        };
    }

    for (idx, line) in lines.into_iter().enumerate() {
        let row = first_row + idx as StableRowIndex;
        let is_continuation = line.dirty && !cur_lines.is_empty();
        if !is_continuation || cur_text.len() + line.text.len() > MAX_LOGICAL_LINE_LEN {
            flush!();
            cur_first_row = row;
        }
        cur_text.push_str(&line.text);
        cur_lines.push(line);
    }
    flush!();

    result
}
