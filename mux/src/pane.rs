use crate::domain::DomainId;
use crate::line::{Line, StableRowIndex};
use crate::renderable::*;
use async_trait::async_trait;
use config::ExitBehavior;
use downcast_rs::{impl_downcast, Downcast};
use parking_lot::MappedMutexGuard;
use rangeset::RangeSet;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

static PANE_ID: AtomicUsize = AtomicUsize::new(0);
pub type PaneId = usize;
pub type SequenceNo = u64;

pub fn alloc_pane_id() -> PaneId {
    PANE_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SearchResult {
    pub start_y: StableRowIndex,
    pub start_x: usize,
    pub end_y: StableRowIndex,
    pub end_x: usize,
    /// Groups results with identical matched text so callers can colorize
    /// them consistently; assigned in first-seen order.
    pub match_id: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub enum Pattern {
    CaseSensitiveString(String),
    CaseInSensitiveString(String),
    Regex(String),
}

impl Default for Pattern {
    fn default() -> Self {
        Self::CaseSensitiveString(String::new())
    }
}

impl std::ops::Deref for Pattern {
    type Target = String;
    fn deref(&self) -> &String {
        match self {
            Pattern::CaseSensitiveString(s) => s,
            Pattern::CaseInSensitiveString(s) => s,
            Pattern::Regex(s) => s,
        }
    }
}

impl std::ops::DerefMut for Pattern {
    fn deref_mut(&mut self) -> &mut String {
        match self {
            Pattern::CaseSensitiveString(s) => s,
            Pattern::CaseInSensitiveString(s) => s,
            Pattern::Regex(s) => s,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub enum PatternType {
    CaseSensitiveString,
    CaseInSensitiveString,
    Regex,
}

impl From<&Pattern> for PatternType {
    fn from(value: &Pattern) -> Self {
        match value {
            Pattern::CaseSensitiveString(_) => PatternType::CaseSensitiveString,
            Pattern::CaseInSensitiveString(_) => PatternType::CaseInSensitiveString,
            Pattern::Regex(_) => PatternType::Regex,
        }
    }
}

/// Why a close request is being made.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CloseReason {
    Window,
    Tab,
    Pane,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollbackEraseMode {
    ScrollbackOnly,
    ScrollbackAndViewport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    FetchImmediate,
    AllowStale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyModifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyCode {
    Char(char),
    Enter,
    Backspace,
    Tab,
    Escape,
    Up,
    Down,
    Left,
    Right,
    PageUp,
    PageDown,
    Home,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEventKind {
    Press,
    Release,
    Move,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEvent {
    pub kind: MouseEventKind,
    pub x: usize,
    pub y: i64,
    pub button: u8,
    pub modifiers: KeyModifiers,
}

/// A Pane is a view onto a single PTY-backed (or otherwise data-producing)
/// terminal session. This crate does not parse escape sequences itself;
/// `Line::text` is whatever bytes the pane chose to retain, and rendering
/// into cells/attributes is left to an external terminal emulator.
#[async_trait(?Send)]
pub trait Pane: Downcast + Send + Sync {
    fn pane_id(&self) -> PaneId;

    fn get_cursor_position(&self) -> StableCursorPosition;

    fn get_current_seqno(&self) -> SequenceNo;

    /// Returns the stable rows within `lines` whose seqno exceeds `seqno`.
    fn get_changed_since(
        &self,
        lines: Range<StableRowIndex>,
        seqno: SequenceNo,
    ) -> RangeSet<StableRowIndex>;

    /// Materialize a range of rows. The returned `first_index` may be
    /// clamped if part of `lines` has scrolled out of the retained buffer.
    fn get_lines(&self, lines: Range<StableRowIndex>) -> (StableRowIndex, Vec<Line>);

    fn get_logical_lines(&self, lines: Range<StableRowIndex>) -> Vec<crate::line::LogicalLine>;

    fn get_dimensions(&self) -> RenderableDimensions;

    fn get_title(&self) -> String;

    fn send_paste(&self, text: &str) -> anyhow::Result<()>;

    fn reader(&self) -> anyhow::Result<Option<Box<dyn std::io::Read + Send>>>;

    fn writer(&self) -> MappedMutexGuard<dyn std::io::Write>;

    fn resize(&self, size: portable_pty::PtySize) -> anyhow::Result<()>;

    /// Hint that the pane is being resized as part of a zoom-to-fill-tab
    /// operation.
    fn set_zoomed(&self, _zoomed: bool) {}

    fn key_down(&self, key: KeyCode, mods: KeyModifiers) -> anyhow::Result<()>;
    fn key_up(&self, key: KeyCode, mods: KeyModifiers) -> anyhow::Result<()>;

    fn mouse_event(&self, event: MouseEvent) -> anyhow::Result<()>;

    fn is_dead(&self) -> bool;
    fn kill(&self) {}

    fn palette(&self) -> Vec<(u8, u8, u8)> {
        Vec::new()
    }

    fn domain_id(&self) -> DomainId;

    fn erase_scrollback(&self, _mode: ScrollbackEraseMode) {}

    /// Purely notification; no PTY side-effect is required.
    fn focus_changed(&self, _focused: bool) {}

    fn has_unseen_output(&self) -> bool {
        false
    }

    fn can_close_without_prompting(&self, reason: CloseReason) -> bool {
        let _ = reason;
        self.is_dead()
    }

    /// Bounded, non-overlapping search over `range`. Must never panic or
    /// throw on a malformed regex; an empty result communicates failure.
    async fn search(
        &self,
        _pattern: Pattern,
        _range: Range<StableRowIndex>,
        _limit: Option<u32>,
    ) -> anyhow::Result<Vec<SearchResult>> {
        Ok(vec![])
    }

    fn is_mouse_grabbed(&self) -> bool {
        false
    }

    fn is_alt_screen_active(&self) -> bool {
        false
    }

    fn get_current_working_dir(&self, policy: CachePolicy) -> Option<Url> {
        let _ = policy;
        None
    }

    fn get_foreground_process_name(&self, _policy: CachePolicy) -> Option<String> {
        None
    }

    fn get_foreground_process_info(
        &self,
        _policy: CachePolicy,
    ) -> Option<procinfo::LocalProcessInfo> {
        None
    }

    fn tty_name(&self) -> Option<String> {
        None
    }

    fn exit_behavior(&self) -> Option<ExitBehavior> {
        None
    }
}
impl_downcast!(Pane);

/// Implement `Pane::get_lines` in terms of `get_logical_lines`-style storage
/// is the common case; this helper goes the other way, letting a pane
/// implement only `get_lines` and get logical-line rewrapping for free.
pub fn impl_get_logical_lines_via_get_lines<P: Pane + ?Sized>(
    pane: &P,
    lines: Range<StableRowIndex>,
) -> Vec<crate::line::LogicalLine> {
    let (first, phys) = pane.get_lines(lines);
    crate::line::rewrap_into_logical_lines(first, phys)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;

    pub struct FakePane {
        pub id: PaneId,
        pub lines: Mutex<Vec<Line>>,
        pub dead: std::sync::atomic::AtomicBool,
        pub size: Mutex<portable_pty::PtySize>,
    }

    impl FakePane {
        pub fn new(id: PaneId, lines: Vec<Line>) -> Self {
            Self {
                id,
                lines: Mutex::new(lines),
                dead: std::sync::atomic::AtomicBool::new(false),
                size: Mutex::new(portable_pty::PtySize {
                    rows: 24,
                    cols: 80,
                    pixel_width: 800,
                    pixel_height: 600,
                }),
            }
        }

        /// Convenience constructor for tree/layout tests that only care
        /// about pane sizing, not scrollback content.
        pub fn new_with_size(id: PaneId, size: portable_pty::PtySize) -> Arc<dyn Pane> {
            Arc::new(Self {
                id,
                lines: Mutex::new(vec![]),
                dead: std::sync::atomic::AtomicBool::new(false),
                size: Mutex::new(size),
            })
        }
    }

    #[async_trait(?Send)]
    impl Pane for FakePane {
        fn pane_id(&self) -> PaneId {
            self.id
        }
        fn get_cursor_position(&self) -> StableCursorPosition {
            StableCursorPosition::default()
        }
        fn get_current_seqno(&self) -> SequenceNo {
            self.lines.lock().last().map(|l| l.seqno).unwrap_or(0)
        }
        fn get_changed_since(
            &self,
            lines: Range<StableRowIndex>,
            seqno: SequenceNo,
        ) -> RangeSet<StableRowIndex> {
            let mut set = RangeSet::new();
            let all = self.lines.lock();
            for y in lines {
                if let Some(line) = all.get(y as usize) {
                    if line.seqno > seqno {
                        set.add(y);
                    }
                }
            }
            set
        }
        fn get_lines(&self, lines: Range<StableRowIndex>) -> (StableRowIndex, Vec<Line>) {
            let all = self.lines.lock();
            let start = lines.start.max(0) as usize;
            let end = (lines.end.max(0) as usize).min(all.len());
            if start >= end {
                return (lines.start, vec![]);
            }
            (start as StableRowIndex, all[start..end].to_vec())
        }
        fn get_logical_lines(&self, lines: Range<StableRowIndex>) -> Vec<crate::line::LogicalLine> {
            impl_get_logical_lines_via_get_lines(self, lines)
        }
        fn get_dimensions(&self) -> RenderableDimensions {
            let size = *self.size.lock();
            RenderableDimensions {
                cols: size.cols as usize,
                viewport_rows: size.rows as usize,
                scrollback_rows: self.lines.lock().len(),
                physical_top: 0,
                scrollback_top: 0,
            }
        }
        fn get_title(&self) -> String {
            "fake".to_string()
        }
        fn send_paste(&self, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
        fn reader(&self) -> anyhow::Result<Option<Box<dyn std::io::Read + Send>>> {
            Ok(None)
        }
        fn writer(&self) -> MappedMutexGuard<dyn std::io::Write> {
            unimplemented!("FakePane has no writer")
        }
        fn resize(&self, size: portable_pty::PtySize) -> anyhow::Result<()> {
            *self.size.lock() = size;
            Ok(())
        }
        fn key_down(&self, _key: KeyCode, _mods: KeyModifiers) -> anyhow::Result<()> {
            Ok(())
        }
        fn key_up(&self, _key: KeyCode, _mods: KeyModifiers) -> anyhow::Result<()> {
            Ok(())
        }
        fn mouse_event(&self, _event: MouseEvent) -> anyhow::Result<()> {
            Ok(())
        }
        fn is_dead(&self) -> bool {
            self.dead.load(std::sync::atomic::Ordering::Relaxed)
        }
        fn kill(&self) {
            self.dead.store(true, std::sync::atomic::Ordering::Relaxed);
        }
        fn domain_id(&self) -> DomainId {
            0
        }
    }
}

#[cfg(test)]
mod test {
    use super::test_support::FakePane;
    use super::*;
    use crate::line::Line;

    fn lines_from_text(text: &str) -> Vec<Line> {
        text.split('\n')
            .enumerate()
            .map(|(i, s)| Line::new(s.to_string(), i as SequenceNo))
            .collect()
    }

    #[test]
    fn logical_lines_no_wrap() {
        let pane = FakePane::new(0, lines_from_text("one\ntwo\nthree"));
        let logical = pane.get_logical_lines(0..3);
        assert_eq!(logical.len(), 3);
        assert_eq!(logical[1].logical, "two");
    }

    #[test]
    fn logical_lines_merge_continuation() {
        let mut lines = lines_from_text("hello world\nextra");
        lines[1].dirty = true; // marks the second physical row as a wrap continuation
        let pane = FakePane::new(0, lines);
        let logical = pane.get_logical_lines(0..2);
        assert_eq!(logical.len(), 1);
        assert_eq!(logical[0].logical, "hello worldextra");
        assert_eq!(logical[0].physical_lines.len(), 2);
    }

    #[test]
    fn changed_since_tracks_seqno() {
        let pane = FakePane::new(0, lines_from_text("a\nb\nc"));
        let changed = pane.get_changed_since(0..3, 1);
        let matched: Vec<StableRowIndex> = (0..3).filter(|y| changed.contains(y)).collect();
        assert_eq!(matched, vec![2]);
    }
}
