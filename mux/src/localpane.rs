use crate::domain::DomainId;
use crate::line::{Line, StableRowIndex};
use crate::pane::{
    CachePolicy, CloseReason, KeyCode, KeyModifiers, MouseEvent, Pane, PaneId, Pattern,
    ScrollbackEraseMode, SearchResult, SequenceNo,
};
use crate::renderable::*;
use crate::{Mux, MuxNotification};
use async_trait::async_trait;
use config::{configuration, ExitBehavior, ExitBehaviorMessaging};
use fancy_regex::Regex;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use portable_pty::{Child, ChildKiller, ExitStatus, MasterPty, PtySize};
use procinfo::LocalProcessInfo;
use rangeset::RangeSet;
use std::collections::HashMap;
use std::io::{Result as IoResult, Write};
use std::ops::Range;
use std::sync::mpsc::{sync_channel, Receiver, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

const PROC_INFO_CACHE_TTL: Duration = Duration::from_millis(300);

/// Scrollback is trimmed once it exceeds this many bytes, down to
/// `SCROLLBACK_LOW_WATER`, so a chatty process can't grow a pane's buffer
/// without bound.
const SCROLLBACK_HIGH_WATER: usize = 100 * 1024;
const SCROLLBACK_LOW_WATER: usize = 50 * 1024;

#[derive(Debug)]
enum ProcessState {
    Running {
        child_waiter: Receiver<IoResult<ExitStatus>>,
        pid: Option<u32>,
        signaller: Box<dyn ChildKiller + Send>,
        killed: bool,
    },
    DeadPendingClose {
        killed: bool,
    },
    Dead,
}

struct CachedProcInfo {
    root: LocalProcessInfo,
    foreground: LocalProcessInfo,
    updated: Instant,
}

/// tcgetpgrp can take hundreds of microseconds; if the gui polls every
/// pane's foreground process on every mouse-move over a tab bar that adds
/// up fast, so cache it and refresh lazily in the background.
#[cfg(unix)]
#[derive(Clone)]
struct CachedLeaderInfo {
    updated: Instant,
    fd: std::os::unix::io::RawFd,
    pid: u32,
    path: Option<std::path::PathBuf>,
    current_working_dir: Option<std::path::PathBuf>,
    updating: bool,
}

#[cfg(unix)]
impl CachedLeaderInfo {
    fn new(fd: Option<std::os::unix::io::RawFd>) -> Self {
        let mut me = Self {
            updated: Instant::now(),
            fd: fd.unwrap_or(-1),
            pid: 0,
            path: None,
            current_working_dir: None,
            updating: false,
        };
        me.update();
        me
    }

    fn can_update(&self) -> bool {
        self.fd != -1 && !self.updating
    }

    fn update(&mut self) {
        self.pid = unsafe { libc::tcgetpgrp(self.fd) } as u32;
        if self.pid > 0 {
            if let Some(root) = LocalProcessInfo::with_root_pid(self.pid) {
                self.path = Some(root.executable.clone());
                self.current_working_dir = Some(root.cwd.clone());
            }
        } else {
            self.path.take();
            self.current_working_dir.take();
        }
        self.updated = Instant::now();
        self.updating = false;
    }

    fn expired(&self) -> bool {
        self.updated.elapsed() > PROC_INFO_CACHE_TTL
    }
}

pub struct LocalPane {
    pane_id: PaneId,
    domain_id: DomainId,
    scrollback: Mutex<Vec<Line>>,
    cursor: Mutex<StableCursorPosition>,
    size: Mutex<(usize, usize)>,
    seqno: std::sync::atomic::AtomicU64,
    unseen_output: std::sync::atomic::AtomicBool,
    process: Mutex<ProcessState>,
    pty: Mutex<Box<dyn MasterPty>>,
    writer: Mutex<Box<dyn Write + Send>>,
    proc_list: Mutex<Option<CachedProcInfo>>,
    #[cfg(unix)]
    leader: Arc<Mutex<Option<CachedLeaderInfo>>>,
    command_description: String,
}

/// Spawns a background thread to wait for the child to exit, since on some
/// platforms the PTY reader stays blocked in read() even after the child
/// has died; without this a pane can outlive its process indefinitely.
fn split_child(
    mut process: Box<dyn Child + Send>,
) -> (
    Receiver<IoResult<ExitStatus>>,
    Box<dyn ChildKiller + Send>,
    Option<u32>,
) {
    let pid = process.process_id();
    let signaller = process.clone_killer();

    let (tx, rx) = sync_channel(1);

    std::thread::spawn(move || {
        let status = process.wait();
        let _ = tx.try_send(status);
        promise::spawn::spawn_into_main_thread(async move {
            if let Some(mux) = Mux::try_get() {
                mux.prune_dead_windows();
            }
        })
        .detach();
    });

    (rx, signaller, pid)
}

/// Decide the next process state and status-banner text for a child whose
/// exit status just became available. Split out from `is_dead` so the
/// exit-behavior policy table can be exercised without a real PTY child.
fn exit_transition(
    behavior: ExitBehavior,
    success: bool,
    killed: bool,
    cmd: &str,
    status: &ExitStatus,
) -> (ProcessState, String, String) {
    match (behavior, success, killed) {
        (ExitBehavior::Close, _, _) => (ProcessState::Dead, String::new(), String::new()),
        (ExitBehavior::CloseOnCleanExit, false, _) => (
            ProcessState::DeadPendingClose { killed: false },
            format!("Process {cmd} didn't exit cleanly."),
            format!("{:?}", status),
        ),
        (ExitBehavior::CloseOnCleanExit, ..) => (ProcessState::Dead, String::new(), String::new()),
        (ExitBehavior::Hold, true, false) => (
            ProcessState::DeadPendingClose { killed: false },
            format!("Process {cmd} completed."),
            "done".to_string(),
        ),
        (ExitBehavior::Hold, false, false) => (
            ProcessState::DeadPendingClose { killed: false },
            format!("Process {cmd} didn't exit cleanly."),
            format!("{:?}", status),
        ),
        (ExitBehavior::Hold, _, true) => (ProcessState::Dead, String::new(), String::new()),
    }
}

impl LocalPane {
    pub fn new(
        pane_id: PaneId,
        process: Box<dyn Child + Send>,
        pty: Box<dyn MasterPty>,
        writer: Box<dyn Write + Send>,
        domain_id: DomainId,
        size: PtySize,
    ) -> Self {
        let (process, signaller, pid) = split_child(process);

        Self {
            pane_id,
            domain_id,
            scrollback: Mutex::new(vec![]),
            cursor: Mutex::new(StableCursorPosition::default()),
            size: Mutex::new((size.cols as usize, size.rows as usize)),
            seqno: std::sync::atomic::AtomicU64::new(0),
            unseen_output: std::sync::atomic::AtomicBool::new(false),
            process: Mutex::new(ProcessState::Running {
                child_waiter: process,
                pid,
                signaller,
                killed: false,
            }),
            pty: Mutex::new(pty),
            writer: Mutex::new(writer),
            proc_list: Mutex::new(None),
            #[cfg(unix)]
            leader: Arc::new(Mutex::new(None)),
            command_description: format!("pane {}", pane_id),
        }
    }

    fn bump_seqno(&self) -> SequenceNo {
        self.seqno.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1
    }

    /// Append raw bytes read from the PTY as a new scrollback line, bump
    /// seqno, flag unseen output, and trim the buffer if it has grown past
    /// the high-water mark.
    pub fn append_output(&self, text: &str) {
        let seqno = self.bump_seqno();
        {
            let mut sb = self.scrollback.lock();
            for (idx, chunk) in text.split('\n').enumerate() {
                if idx > 0 {
                    sb.push(Line::new(String::new(), seqno));
                }
                if let Some(last) = sb.last_mut() {
                    last.text.push_str(chunk);
                    last.seqno = seqno;
                } else {
                    sb.push(Line::new(chunk.to_string(), seqno));
                }
            }

            let mut total: usize = sb.iter().map(|l| l.text.len()).sum();
            while total > SCROLLBACK_HIGH_WATER && sb.len() > 1 {
                let removed = sb.remove(0);
                total -= removed.text.len();
                if total <= SCROLLBACK_LOW_WATER {
                    break;
                }
            }
        }
        self.unseen_output
            .store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(mux) = Mux::try_get() {
            mux.notify(MuxNotification::PaneOutput(self.pane_id));
        }
    }

    #[cfg(unix)]
    fn get_leader(&self, policy: CachePolicy) -> CachedLeaderInfo {
        use std::os::unix::io::AsRawFd;
        let mut leader = self.leader.lock();

        if policy == CachePolicy::FetchImmediate {
            leader.replace(CachedLeaderInfo::new(Some(self.pty.lock().as_raw_fd())));
        } else if let Some(info) = leader.as_mut() {
            if info.expired() && info.can_update() {
                info.updating = true;
                let leader_ref = Arc::clone(&self.leader);
                std::thread::spawn(move || {
                    let mut leader = leader_ref.lock();
                    if let Some(leader) = leader.as_mut() {
                        leader.update();
                    }
                });
            }
        } else {
            leader.replace(CachedLeaderInfo::new(Some(self.pty.lock().as_raw_fd())));
        }

        (*leader).clone().unwrap()
    }

    #[cfg(unix)]
    fn divine_current_working_dir(&self, policy: CachePolicy) -> Option<Url> {
        let leader = self.get_leader(policy);
        let path = leader.current_working_dir.as_ref()?;
        Url::from_directory_path(path).ok()
    }

    #[cfg(not(unix))]
    fn divine_current_working_dir(&self, _policy: CachePolicy) -> Option<Url> {
        None
    }

    fn divine_process_list(&self, policy: CachePolicy) -> Option<MappedMutexGuard<CachedProcInfo>> {
        let pid = if let ProcessState::Running { pid: Some(pid), .. } = &*self.process.lock() {
            *pid
        } else {
            return None;
        };

        let mut proc_list = self.proc_list.lock();
        let expired = policy == CachePolicy::FetchImmediate
            || proc_list
                .as_ref()
                .map(|info| info.updated.elapsed() > PROC_INFO_CACHE_TTL)
                .unwrap_or(true);

        if expired {
            let root = LocalProcessInfo::with_root_pid(pid)?;
            let mut foreground = root.clone();
            foreground.children.clear();
            proc_list.replace(CachedProcInfo {
                root,
                foreground,
                updated: Instant::now(),
            });
        }

        Some(MutexGuard::map(proc_list, |info| info.as_mut().unwrap()))
    }
}

#[async_trait(?Send)]
impl Pane for LocalPane {
    fn pane_id(&self) -> PaneId {
        self.pane_id
    }

    fn get_cursor_position(&self) -> StableCursorPosition {
        *self.cursor.lock()
    }

    fn get_current_seqno(&self) -> SequenceNo {
        self.seqno.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn get_changed_since(
        &self,
        lines: Range<StableRowIndex>,
        seqno: SequenceNo,
    ) -> RangeSet<StableRowIndex> {
        let mut set = RangeSet::new();
        let sb = self.scrollback.lock();
        for y in lines {
            if y < 0 {
                continue;
            }
            if let Some(line) = sb.get(y as usize) {
                if line.seqno > seqno {
                    set.add(y);
                }
            }
        }
        set
    }

    fn get_lines(&self, lines: Range<StableRowIndex>) -> (StableRowIndex, Vec<Line>) {
        let sb = self.scrollback.lock();
        let start = lines.start.max(0) as usize;
        let end = (lines.end.max(0) as usize).min(sb.len());
        if start >= end {
            return (lines.start, vec![]);
        }
        (start as StableRowIndex, sb[start..end].to_vec())
    }

    fn get_logical_lines(&self, lines: Range<StableRowIndex>) -> Vec<crate::line::LogicalLine> {
        crate::pane::impl_get_logical_lines_via_get_lines(self, lines)
    }

    fn get_dimensions(&self) -> RenderableDimensions {
        let (cols, rows) = *self.size.lock();
        let scrollback_rows = self.scrollback.lock().len();
        RenderableDimensions {
            cols,
            viewport_rows: rows,
            scrollback_rows,
            physical_top: scrollback_rows.saturating_sub(rows) as StableRowIndex,
            scrollback_top: 0,
        }
    }

    fn get_title(&self) -> String {
        if let Some(name) = self.get_foreground_process_name(CachePolicy::AllowStale) {
            let path = std::path::Path::new(&name);
            if let Some(name) = path.file_name() {
                return name.to_string_lossy().to_string();
            }
        }
        self.command_description.clone()
    }

    fn send_paste(&self, text: &str) -> anyhow::Result<()> {
        if let Some(mux) = Mux::try_get() {
            mux.record_input_for_current_identity();
        }
        self.writer.lock().write_all(text.as_bytes())?;
        Ok(())
    }

    fn reader(&self) -> anyhow::Result<Option<Box<dyn std::io::Read + Send>>> {
        Ok(Some(self.pty.lock().try_clone_reader()?))
    }

    fn writer(&self) -> MappedMutexGuard<dyn std::io::Write> {
        if let Some(mux) = Mux::try_get() {
            mux.record_input_for_current_identity();
        }
        MutexGuard::map(self.writer.lock(), |writer| {
            let w: &mut dyn std::io::Write = writer;
            w
        })
    }

    fn resize(&self, size: PtySize) -> anyhow::Result<()> {
        self.pty.lock().resize(size)?;
        *self.size.lock() = (size.cols as usize, size.rows as usize);
        Ok(())
    }

    fn key_down(&self, key: KeyCode, _mods: KeyModifiers) -> anyhow::Result<()> {
        if let Some(mux) = Mux::try_get() {
            mux.record_input_for_current_identity();
        }
        if let KeyCode::Char(c) = key {
            let mut buf = [0u8; 4];
            self.writer
                .lock()
                .write_all(c.encode_utf8(&mut buf).as_bytes())?;
        }
        Ok(())
    }

    fn key_up(&self, _key: KeyCode, _mods: KeyModifiers) -> anyhow::Result<()> {
        if let Some(mux) = Mux::try_get() {
            mux.record_input_for_current_identity();
        }
        Ok(())
    }

    fn mouse_event(&self, _event: MouseEvent) -> anyhow::Result<()> {
        if let Some(mux) = Mux::try_get() {
            mux.record_input_for_current_identity();
        }
        Ok(())
    }

    fn is_dead(&self) -> bool {
        let mut proc = self.process.lock();

        let mut terse = String::new();
        let mut brief = String::new();
        let cmd = &self.command_description;

        match &mut *proc {
            ProcessState::Running {
                child_waiter,
                killed,
                ..
            } => {
                let status = match child_waiter.try_recv() {
                    Ok(Ok(s)) => Some(s),
                    Err(TryRecvError::Empty) => None,
                    _ => Some(ExitStatus::with_exit_code(1)),
                };

                if let Some(status) = status {
                    let success = status.success()
                        || configuration()
                            .clean_exit_codes
                            .contains(&status.exit_code());

                    let (next, next_brief, next_terse) =
                        exit_transition(configuration().exit_behavior, success, *killed, cmd, &status);
                    *proc = next;
                    brief = next_brief;
                    terse = next_terse;
                }
            }
            ProcessState::DeadPendingClose { killed } => {
                if *killed {
                    *proc = ProcessState::Dead;
                }
            }
            ProcessState::Dead => {}
        }

        let mut notify = None;
        if !terse.is_empty() {
            match configuration().exit_behavior_messaging {
                ExitBehaviorMessaging::Verbose => {
                    notify = Some(if terse == "done" {
                        format!("\r\n{brief}\r\n")
                    } else {
                        format!("\r\n{brief}\r\n{terse}\r\n")
                    });
                }
                ExitBehaviorMessaging::Brief => {
                    notify = Some(format!("\r\n{brief}\r\n"));
                }
                ExitBehaviorMessaging::Terse => {
                    notify = Some(format!("\r\n[{terse}]\r\n"));
                }
                ExitBehaviorMessaging::None => {}
            }
        }
        if let Some(notify) = notify {
            self.append_output(&notify);
        }

        matches!(&*proc, ProcessState::Dead)
    }

    fn kill(&self) {
        let mut proc = self.process.lock();
        match &mut *proc {
            ProcessState::Running {
                signaller, killed, ..
            } => {
                let _ = signaller.kill();
                *killed = true;
            }
            ProcessState::DeadPendingClose { killed } => {
                *killed = true;
            }
            ProcessState::Dead => {}
        }
    }

    fn domain_id(&self) -> DomainId {
        self.domain_id
    }

    fn erase_scrollback(&self, mode: ScrollbackEraseMode) {
        let seqno = self.bump_seqno();
        let mut sb = self.scrollback.lock();
        match mode {
            ScrollbackEraseMode::ScrollbackOnly => {
                let (_, rows) = *self.size.lock();
                let keep = sb.len().saturating_sub(rows);
                sb.drain(0..keep);
            }
            ScrollbackEraseMode::ScrollbackAndViewport => {
                sb.clear();
            }
        }
        for line in sb.iter_mut() {
            line.seqno = seqno;
        }
    }

    fn has_unseen_output(&self) -> bool {
        self.unseen_output.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn can_close_without_prompting(&self, _reason: CloseReason) -> bool {
        if self.is_dead() {
            return true;
        }
        if let Some(info) = self.divine_process_list(CachePolicy::FetchImmediate) {
            let names = info
                .root
                .flatten_to_exe_names()
                .into_iter()
                .collect::<std::collections::HashSet<_>>();
            let skip = configuration()
                .skip_close_confirmation_for_processes_named
                .iter()
                .cloned()
                .collect::<std::collections::HashSet<_>>();
            names.is_subset(&skip)
        } else {
            true
        }
    }

    async fn search(
        &self,
        pattern: Pattern,
        range: Range<StableRowIndex>,
        limit: Option<u32>,
    ) -> anyhow::Result<Vec<SearchResult>> {
        let logical = self.get_logical_lines(range);
        let mut results = vec![];
        let mut uniq_matches: HashMap<String, usize> = HashMap::new();

        let regex = match &pattern {
            Pattern::Regex(r) => Some(Regex::new(r)?),
            _ => None,
        };

        'lines: for line in &logical {
            let haystack_owned;
            let haystack: &str = match &pattern {
                Pattern::CaseInSensitiveString(_) => {
                    haystack_owned = line.logical.to_lowercase();
                    &haystack_owned
                }
                _ => &line.logical,
            };

            match &pattern {
                Pattern::CaseSensitiveString(s) | Pattern::CaseInSensitiveString(s) => {
                    let needle = if matches!(pattern, Pattern::CaseInSensitiveString(_)) {
                        s.to_lowercase()
                    } else {
                        s.clone()
                    };
                    if needle.is_empty() {
                        continue;
                    }
                    for (idx, m) in haystack.match_indices(&needle) {
                        push_match(line, idx, m, &mut uniq_matches, &mut results);
                        if let Some(limit) = limit {
                            if results.len() == limit as usize {
                                break 'lines;
                            }
                        }
                    }
                }
                Pattern::Regex(_) => {
                    let re = regex.as_ref().unwrap();
                    let mut iter = re.find_iter(haystack);
                    while let Some(Ok(m)) = iter.next() {
                        push_match(line, m.start(), m.as_str(), &mut uniq_matches, &mut results);
                        if let Some(limit) = limit {
                            if results.len() == limit as usize {
                                break 'lines;
                            }
                        }
                    }
                }
            }
        }

        fn push_match(
            line: &crate::line::LogicalLine,
            byte_idx: usize,
            matched: &str,
            uniq_matches: &mut HashMap<String, usize>,
            results: &mut Vec<SearchResult>,
        ) {
            let match_id = match uniq_matches.get(matched) {
                Some(id) => *id,
                None => {
                    let id = uniq_matches.len();
                    uniq_matches.insert(matched.to_string(), id);
                    id
                }
            };
            let (start_y, start_x) = line.logical_x_to_physical_coord(byte_idx);
            let (end_y, end_x) = line.logical_x_to_physical_coord(byte_idx + matched.len());
            results.push(SearchResult {
                start_y,
                start_x,
                end_y,
                end_x,
                match_id,
            });
        }

        Ok(results)
    }

    fn get_current_working_dir(&self, policy: CachePolicy) -> Option<Url> {
        self.divine_current_working_dir(policy)
    }

    fn get_foreground_process_name(&self, policy: CachePolicy) -> Option<String> {
        #[cfg(unix)]
        {
            let leader = self.get_leader(policy);
            return leader.path.map(|p| p.to_string_lossy().to_string());
        }
        #[cfg(not(unix))]
        {
            let _ = policy;
            None
        }
    }

    fn get_foreground_process_info(&self, policy: CachePolicy) -> Option<LocalProcessInfo> {
        self.divine_process_list(policy).map(|i| i.foreground.clone())
    }

    fn tty_name(&self) -> Option<String> {
        #[cfg(unix)]
        {
            let name = self.pty.lock().tty_name()?;
            Some(name.to_string_lossy().into_owned())
        }
        #[cfg(not(unix))]
        None
    }
}

impl Drop for LocalPane {
    fn drop(&mut self) {
        if let ProcessState::Running { signaller, .. } = &mut *self.process.lock() {
            let _ = signaller.kill();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hold_on_clean_exit_pends_close_with_banner() {
        let status = ExitStatus::with_exit_code(0);
        let (next, brief, terse) =
            exit_transition(ExitBehavior::Hold, true, false, "bash", &status);
        assert!(matches!(next, ProcessState::DeadPendingClose { killed: false }));
        assert_eq!(brief, "Process bash completed.");
        assert_eq!(terse, "done");
    }

    #[test]
    fn hold_on_dirty_exit_pends_close_with_banner() {
        let status = ExitStatus::with_exit_code(1);
        let (next, brief, _terse) =
            exit_transition(ExitBehavior::Hold, false, false, "bash", &status);
        assert!(matches!(next, ProcessState::DeadPendingClose { killed: false }));
        assert_eq!(brief, "Process bash didn't exit cleanly.");
    }

    #[test]
    fn hold_suppresses_banner_when_already_killed() {
        let status = ExitStatus::with_exit_code(0);
        let (next, brief, terse) =
            exit_transition(ExitBehavior::Hold, true, true, "bash", &status);
        assert!(matches!(next, ProcessState::Dead));
        assert!(brief.is_empty());
        assert!(terse.is_empty());
    }

    #[test]
    fn close_always_goes_dead_immediately() {
        let status = ExitStatus::with_exit_code(0);
        let (next, brief, terse) = exit_transition(ExitBehavior::Close, true, false, "bash", &status);
        assert!(matches!(next, ProcessState::Dead));
        assert!(brief.is_empty());
        assert!(terse.is_empty());
    }

    #[test]
    fn close_on_clean_exit_holds_only_when_dirty() {
        let clean = ExitStatus::with_exit_code(0);
        let (next, brief, _) =
            exit_transition(ExitBehavior::CloseOnCleanExit, true, false, "bash", &clean);
        assert!(matches!(next, ProcessState::Dead));
        assert!(brief.is_empty());

        let dirty = ExitStatus::with_exit_code(1);
        let (next, brief, _) =
            exit_transition(ExitBehavior::CloseOnCleanExit, false, false, "bash", &dirty);
        assert!(matches!(next, ProcessState::DeadPendingClose { killed: false }));
        assert_eq!(brief, "Process bash didn't exit cleanly.");
    }
}
