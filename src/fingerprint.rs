//! Fingerprint extractor (`SPEC_FULL.md` §4.5): turns an event plus a
//! profile into the concatenated string the sketches key on.

use crate::buffer::{decode_cstr, decode_i64, fd_producing_codes, path_param_slots, RawEvent};
use crate::host::{FdSnapshot, ThreadSnapshot, ThreadTable, PPM_AT_FDCWD};
use crate::profile::{FieldId, Selector, Token};

const SID_LEADER_HOP_CAP: u32 = 9;
const VPGID_LEADER_HOP_CAP: u32 = 5;

/// Build the fingerprint for `evt` under `profile`. Returns the empty
/// string if the profile resolved to nothing applicable (fd gating) or
/// contained no selectors.
pub fn extract(evt: &RawEvent, table: &dyn ThreadTable, tokens: &[Token]) -> String {
    let thread_entry = table.thread(evt.tid);
    let fd_producing = fd_producing_codes().contains(&evt.event_type);

    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Literal(s) => out.push_str(s),
            Token::Field(selector) => {
                if selector.id.is_fd_dependent() && !fd_producing {
                    // Documented brittle behavior (SPEC_FULL.md §9): wipes
                    // everything accumulated so far, not just this selector.
                    out.clear();
                    continue;
                }
                let value = resolve(evt, table, thread_entry.as_ref(), selector);
                out.push_str(&value);
            }
        }
    }
    out
}

fn resolve(evt: &RawEvent, table: &dyn ThreadTable, thread_entry: Option<&ThreadSnapshot>, selector: &Selector) -> String {
    if selector.id.is_fd_dependent() {
        return resolve_fd_selector(evt, table, thread_entry, selector.id);
    }
    match thread_entry {
        Some(t) => resolve_proc_selector(table, t, selector),
        None => String::new(),
    }
}

fn resolve_proc_selector(table: &dyn ThreadTable, t: &ThreadSnapshot, selector: &Selector) -> String {
    use FieldId::*;
    match selector.id {
        ContainerId => t.container_id.clone(),
        ProcName => t.comm.clone(),
        ProcPname => ancestor(table, t, 1).map(|a| a.comm).unwrap_or_default(),
        ProcAname => ancestor(table, t, selector.arg_id.unwrap_or(0)).map(|a| a.comm).unwrap_or_default(),
        ProcArgs => t.args.join(" "),
        ProcCmdnargs => t.args.len().to_string(),
        ProcCmdlenargs => t.args.iter().map(|a| a.len()).sum::<usize>().to_string(),
        ProcCmdline => cmdline_of(&t.comm, &t.args),
        ProcPcmdline => ancestor(table, t, 1).map(|a| cmdline_of(&a.comm, &a.args)).unwrap_or_default(),
        ProcAcmdline => ancestor(table, t, selector.arg_id.unwrap_or(0))
            .map(|a| cmdline_of(&a.comm, &a.args))
            .unwrap_or_default(),
        ProcExeline => cmdline_of(&t.exe, &t.args),
        ProcExe => t.exe.clone(),
        ProcPexe => ancestor(table, t, 1).map(|a| a.exe).unwrap_or_default(),
        ProcAexe => ancestor(table, t, selector.arg_id.unwrap_or(0)).map(|a| a.exe).unwrap_or_default(),
        ProcExepath => t.exe_path.clone(),
        ProcPexepath => ancestor(table, t, 1).map(|a| a.exe_path).unwrap_or_default(),
        ProcAexepath => ancestor(table, t, selector.arg_id.unwrap_or(0)).map(|a| a.exe_path).unwrap_or_default(),
        ProcCwd => t.cwd.clone(),
        ProcTty => t.tty.to_string(),
        ProcPid => t.pid.to_string(),
        // PPID reads the scalar ptid field directly, not an ancestor lookup.
        ProcPpid => t.ptid.to_string(),
        ProcApid => ancestor(table, t, selector.arg_id.unwrap_or(0))
            .map(|a| a.pid.to_string())
            .unwrap_or_default(),
        ProcVpid => t.vpid.to_string(),
        ProcPvpid => ancestor(table, t, 1).map(|a| a.vpid.to_string()).unwrap_or_default(),
        ProcSid => t.sid.to_string(),
        ProcSname => leader(table, t, SID_LEADER_HOP_CAP, |x| x.sid).comm,
        ProcSidExe => leader(table, t, SID_LEADER_HOP_CAP, |x| x.sid).exe,
        ProcSidExepath => leader(table, t, SID_LEADER_HOP_CAP, |x| x.sid).exe_path,
        ProcVpgid => t.vpgid.to_string(),
        ProcVpgidName => leader(table, t, VPGID_LEADER_HOP_CAP, |x| x.vpgid).comm,
        ProcVpgidExe => leader(table, t, VPGID_LEADER_HOP_CAP, |x| x.vpgid).exe,
        ProcVpgidExepath => leader(table, t, VPGID_LEADER_HOP_CAP, |x| x.vpgid).exe_path,
        ProcEnv => resolve_env(t, selector.arg_name.as_deref()),
        ProcIsExeWritable => bool_str(t.exe_writable),
        ProcIsExeUpperLayer => bool_str(t.exe_upper_layer),
        ProcIsExeFromMemfd => bool_str(t.exe_from_memfd),
        ProcExeIno => t.exe_ino.to_string(),
        ProcExeInoCtime => t.exe_ino_ctime.to_string(),
        ProcExeInoMtime => t.exe_ino_mtime.to_string(),
        ProcIsSidLeader => bool_str(t.sid == t.vpid),
        ProcIsVpgidLeader => bool_str(t.vpgid == t.vpid),
        CustomAnameLineageConcat => lineage_concat(table, t, selector.arg_id.unwrap_or(0), |a| a.comm.clone()),
        CustomAexeLineageConcat => lineage_concat(table, t, selector.arg_id.unwrap_or(0), |a| a.exe.clone()),
        CustomAexepathLineageConcat => {
            lineage_concat(table, t, selector.arg_id.unwrap_or(0), |a| a.exe_path.clone())
        }
        FdNum | FdName | FdDirectory | FdFilename | FdIno | FdDev | FdNameraw | CustomFdnamePart1
        | CustomFdnamePart2 => unreachable!("fd-dependent selectors are routed through resolve_fd_selector"),
    }
}

fn resolve_fd_selector(
    evt: &RawEvent,
    table: &dyn ThreadTable,
    thread_entry: Option<&ThreadSnapshot>,
    id: FieldId,
) -> String {
    let lastfd = thread_entry.map(|t| t.lastevent_fd);
    let fd_snapshot: Option<FdSnapshot> = match (thread_entry, lastfd) {
        (Some(t), Some(fd)) => table.fd(t.tid, fd),
        _ => None,
    };

    match id {
        FieldId::FdNum => lastfd.map(|fd| fd.to_string()).unwrap_or_default(),
        FieldId::FdIno => fd_snapshot.as_ref().map(|f| f.ino.to_string()).unwrap_or_default(),
        FieldId::FdDev => fd_snapshot.as_ref().map(|f| f.dev.to_string()).unwrap_or_default(),
        FieldId::FdName => resolve_fd_name(evt, table, thread_entry, fd_snapshot.as_ref()),
        FieldId::FdDirectory => split_dir(&resolve_fd_name(evt, table, thread_entry, fd_snapshot.as_ref())).0,
        FieldId::FdFilename => split_dir(&resolve_fd_name(evt, table, thread_entry, fd_snapshot.as_ref())).1,
        FieldId::CustomFdnamePart1 => split_arrow(&resolve_fd_name(evt, table, thread_entry, fd_snapshot.as_ref())).0,
        FieldId::CustomFdnamePart2 => split_arrow(&resolve_fd_name(evt, table, thread_entry, fd_snapshot.as_ref())).1,
        FieldId::FdNameraw => {
            let raw = fd_snapshot.as_ref().map(|f| f.name_raw.clone()).unwrap_or_default();
            if !raw.is_empty() {
                raw
            } else {
                decode_raw_path(evt, table, thread_entry).unwrap_or_default()
            }
        }
        _ => String::new(),
    }
}

fn resolve_fd_name(
    evt: &RawEvent,
    table: &dyn ThreadTable,
    thread_entry: Option<&ThreadSnapshot>,
    fd_snapshot: Option<&FdSnapshot>,
) -> String {
    if let Some(fs) = fd_snapshot {
        if !fs.name.is_empty() {
            return fs.name.clone();
        }
    }
    decode_raw_path(evt, table, thread_entry).unwrap_or_default()
}

/// Re-derive a path parameter from the raw event buffer when the cached
/// fd-table value is empty (§4.5 "Primary vs. fallback resolution").
fn decode_raw_path(evt: &RawEvent, table: &dyn ThreadTable, thread_entry: Option<&ThreadSnapshot>) -> Option<String> {
    let (dirfd_slot, name_slot) = path_param_slots(evt.event_type)?;
    let name = decode_cstr(evt.get_param(name_slot).ok()?);
    if name.starts_with('/') {
        return Some(name);
    }

    let base = match dirfd_slot {
        Some(slot) => {
            let dirfd = decode_i64(evt.get_param(slot).ok()?).ok()?;
            if dirfd == PPM_AT_FDCWD {
                thread_entry.map(|t| t.cwd.clone()).unwrap_or_default()
            } else {
                thread_entry.and_then(|t| table.fd(t.tid, dirfd)).map(|f| f.name).unwrap_or_default()
            }
        }
        None => thread_entry.map(|t| t.cwd.clone()).unwrap_or_default(),
    };
    Some(normalize_join(&base, &name))
}

fn normalize_join(base: &str, name: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for seg in base.split('/').chain(name.split('/')) {
        match seg {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

fn split_dir(path: &str) -> (String, String) {
    match path.rfind('/') {
        Some(idx) => (path[..idx].to_string(), path[idx + 1..].to_string()),
        None => (String::new(), path.to_string()),
    }
}

fn split_arrow(path: &str) -> (String, String) {
    match path.find("->") {
        Some(idx) => (path[..idx].to_string(), path[idx + 2..].to_string()),
        None => (String::new(), String::new()),
    }
}

/// Walk up `k` `ptid` hops from `start`. `k == 0` returns `start` itself.
/// Reaching tid 1 exactly on the final hop is a valid result; needing to
/// walk past it returns `None` (§8 "ptid chain walk terminates at the
/// init process").
fn ancestor(table: &dyn ThreadTable, start: &ThreadSnapshot, k: u32) -> Option<ThreadSnapshot> {
    if k == 0 {
        return Some(start.clone());
    }
    let mut current = start.clone();
    for hop in 0..k {
        let next = table.thread(current.ptid)?;
        current = next;
        if current.tid == 1 && hop + 1 < k {
            return None;
        }
    }
    Some(current)
}

fn lineage_concat(
    table: &dyn ThreadTable,
    start: &ThreadSnapshot,
    k: u32,
    attr: impl Fn(&ThreadSnapshot) -> String,
) -> String {
    let mut out = String::new();
    for hop in 0..=k {
        match ancestor(table, start, hop) {
            Some(t) => out.push_str(&attr(&t)),
            None => break,
        }
    }
    out
}

fn leader(table: &dyn ThreadTable, start: &ThreadSnapshot, cap: u32, key: impl Fn(&ThreadSnapshot) -> i64) -> ThreadSnapshot {
    let mut leader = start.clone();
    let mut current = start.clone();
    for _ in 0..cap {
        match table.thread(current.ptid) {
            Some(next) if key(&next) == key(start) => {
                current = next.clone();
                leader = next;
            }
            _ => break,
        }
    }
    leader
}

fn cmdline_of(head: &str, args: &[String]) -> String {
    if args.is_empty() {
        head.to_string()
    } else {
        format!("{head} {}", args.join(" "))
    }
}

fn resolve_env(t: &ThreadSnapshot, key: Option<&str>) -> String {
    match key {
        Some(key) => t
            .env
            .iter()
            .find_map(|entry| entry.split_once('=').filter(|(k, _)| *k == key).map(|(_, v)| v.trim().to_string()))
            .unwrap_or_default(),
        None => t.env.join(" "),
    }
}

fn bool_str(b: bool) -> String {
    if b { "1".to_string() } else { "0".to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::event_codes::*;
    use crate::profile::parse_profile;
    use crate::testutil::{thread, MockThreadTable};

    fn packed(params: &[&[u8]]) -> (Vec<u16>, Vec<u8>) {
        (params.iter().map(|p| p.len() as u16).collect(), params.concat())
    }

    #[test]
    fn simple_proc_name_selector() {
        let table = MockThreadTable::new();
        table.insert_thread(thread(100, "bash"));
        let tokens = parse_profile("%proc.name");
        let (lens, payload) = packed(&[]);
        let evt = RawEvent::new(EXECVE, 100, &lens, &payload);
        assert_eq!(extract(&evt, &table, &tokens), "bash");
    }

    #[test]
    fn missing_thread_degrades_to_empty_for_proc_selectors() {
        let table = MockThreadTable::new();
        let tokens = parse_profile("%proc.name");
        let (lens, payload) = packed(&[]);
        let evt = RawEvent::new(EXECVE, 999, &lens, &payload);
        assert_eq!(extract(&evt, &table, &tokens), "");
    }

    #[test]
    fn fd_name_falls_back_to_raw_buffer_when_thread_absent() {
        let table = MockThreadTable::new();
        let tokens = parse_profile("%fd.name");
        // OPEN's path param lives in slot 1 (slot 0 holds flags, per
        // buffer::path_param_slots).
        let (lens, payload) = packed(&[b"flags", b"/etc/passwd"]);
        let evt = RawEvent::new(OPEN, 999, &lens, &payload);
        assert_eq!(extract(&evt, &table, &tokens), "/etc/passwd");
    }

    #[test]
    fn fd_gating_clears_fingerprint_on_non_fd_event() {
        let table = MockThreadTable::new();
        table.insert_thread(thread(1, "sh"));
        let tokens = parse_profile("%proc.name %fd.name");
        let (lens, payload) = packed(&[]);
        let evt = RawEvent::new(EXECVE, 1, &lens, &payload);
        assert_eq!(extract(&evt, &table, &tokens), "");
    }

    #[test]
    fn fd_selector_passes_through_on_fd_producing_event() {
        use crate::host::FdSnapshot;
        let table = MockThreadTable::new();
        let mut t = thread(1, "sh");
        t.lastevent_fd = 4;
        table.insert_thread(t);
        table.insert_fd(1, 4, FdSnapshot { name: "/tmp/x".into(), ..Default::default() });
        let tokens = parse_profile("%proc.name %fd.name");
        let (lens, payload) = packed(&[]);
        let evt = RawEvent::new(OPEN, 1, &lens, &payload);
        assert_eq!(extract(&evt, &table, &tokens), "sh/tmp/x");
    }

    #[test]
    fn ancestor_walk_resolves_parent_name() {
        let table = MockThreadTable::new();
        let mut child = thread(100, "child");
        child.ptid = 50;
        table.insert_thread(child);
        let mut parent = thread(50, "parent");
        parent.ptid = 1;
        table.insert_thread(parent);
        let tokens = parse_profile("%proc.aname[1]");
        let (lens, payload) = packed(&[]);
        let evt = RawEvent::new(EXECVE, 100, &lens, &payload);
        assert_eq!(extract(&evt, &table, &tokens), "parent");
    }

    #[test]
    fn ancestor_walk_past_init_returns_empty() {
        let table = MockThreadTable::new();
        let mut child = thread(100, "child");
        child.ptid = 1;
        table.insert_thread(child);
        table.insert_thread(thread(1, "init"));
        let tokens = parse_profile("%proc.aname[2]");
        let (lens, payload) = packed(&[]);
        let evt = RawEvent::new(EXECVE, 100, &lens, &payload);
        assert_eq!(extract(&evt, &table, &tokens), "");
    }

    #[test]
    fn directory_and_filename_split_on_last_slash() {
        use crate::host::FdSnapshot;
        let table = MockThreadTable::new();
        let mut t = thread(1, "sh");
        t.lastevent_fd = 4;
        table.insert_thread(t);
        table.insert_fd(1, 4, FdSnapshot { name: "/var/log/app.log".into(), ..Default::default() });
        let tokens = parse_profile("%fd.directory %fd.filename");
        let (lens, payload) = packed(&[]);
        let evt = RawEvent::new(OPEN, 1, &lens, &payload);
        assert_eq!(extract(&evt, &table, &tokens), "/var/logapp.log");
    }

    #[test]
    fn env_selector_matches_exact_key() {
        let mut t = thread(1, "sh");
        t.env = vec!["PATH=/usr/bin".to_string(), "HOME=/root".to_string()];
        let table = MockThreadTable::new();
        table.insert_thread(t);
        let tokens = parse_profile("%proc.env[PATH]");
        let (lens, payload) = packed(&[]);
        let evt = RawEvent::new(EXECVE, 1, &lens, &payload);
        assert_eq!(extract(&evt, &table, &tokens), "/usr/bin");
    }
}
