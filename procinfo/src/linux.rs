use crate::{LocalProcessInfo, LocalProcessStatus};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Looks up process metadata for `pid` directly from `/proc`.
///
/// Does not walk the full descendant tree: a pane only ever needs the
/// metadata of its immediate foreground process, so a single `/proc/<pid>`
/// read is enough.
pub fn with_root_pid(pid: u32) -> Option<LocalProcessInfo> {
    let base = PathBuf::from(format!("/proc/{}", pid));
    let stat = fs::read_to_string(base.join("stat")).ok()?;
    let (name, ppid, status) = parse_stat(&stat)?;

    let cwd = fs::read_link(base.join("cwd")).unwrap_or_default();
    let executable = fs::read_link(base.join("exe")).unwrap_or_default();
    let argv = fs::read(base.join("cmdline"))
        .map(|bytes| {
            bytes
                .split(|&b| b == 0)
                .filter(|s| !s.is_empty())
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .collect()
        })
        .unwrap_or_default();

    Some(LocalProcessInfo {
        pid,
        ppid,
        name,
        executable,
        argv,
        cwd,
        status,
        children: HashMap::new(),
        start_time: 0,
    })
}

/// Parses the fields of `/proc/<pid>/stat` that we care about.
/// The second field is the command name in parens and may itself contain
/// spaces or parens, so we split on the last `)` rather than whitespace.
fn parse_stat(stat: &str) -> Option<(String, u32, LocalProcessStatus)> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let name = stat.get(open + 1..close)?.to_string();

    let rest: Vec<&str> = stat.get(close + 2..)?.split_whitespace().collect();
    let state = *rest.first()?;
    let ppid: u32 = rest.get(1)?.parse().ok()?;

    let status = match state {
        "R" => LocalProcessStatus::Run,
        "S" => LocalProcessStatus::Sleep,
        "D" => LocalProcessStatus::Idle,
        "Z" => LocalProcessStatus::Zombie,
        "T" | "t" => LocalProcessStatus::Stop,
        "X" => LocalProcessStatus::Dead,
        _ => LocalProcessStatus::Unknown,
    };

    Some((name, ppid, status))
}
