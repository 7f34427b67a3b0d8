//! Field selector model and profile-string parser (`SPEC_FULL.md` §4.3, §6).

use log::warn;

/// Every field selector the extractor knows how to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldId {
    ContainerId,
    ProcName,
    ProcPname,
    ProcAname,
    ProcArgs,
    ProcCmdnargs,
    ProcCmdlenargs,
    ProcCmdline,
    ProcPcmdline,
    ProcAcmdline,
    ProcExeline,
    ProcExe,
    ProcPexe,
    ProcAexe,
    ProcExepath,
    ProcPexepath,
    ProcAexepath,
    ProcCwd,
    ProcTty,
    ProcPid,
    ProcPpid,
    ProcApid,
    ProcVpid,
    ProcPvpid,
    ProcSid,
    ProcSname,
    ProcSidExe,
    ProcSidExepath,
    ProcVpgid,
    ProcVpgidName,
    ProcVpgidExe,
    ProcVpgidExepath,
    ProcEnv,
    ProcIsExeWritable,
    ProcIsExeUpperLayer,
    ProcIsExeFromMemfd,
    ProcExeIno,
    ProcExeInoCtime,
    ProcExeInoMtime,
    ProcIsSidLeader,
    ProcIsVpgidLeader,
    FdNum,
    FdName,
    FdDirectory,
    FdFilename,
    FdIno,
    FdDev,
    FdNameraw,
    CustomAnameLineageConcat,
    CustomAexeLineageConcat,
    CustomAexepathLineageConcat,
    CustomFdnamePart1,
    CustomFdnamePart2,
}

impl FieldId {
    /// True for the selectors gated by the fd-producing event set (§4.5 step 4).
    pub fn is_fd_dependent(self) -> bool {
        matches!(
            self,
            FieldId::FdNum
                | FieldId::FdName
                | FieldId::FdDirectory
                | FieldId::FdFilename
                | FieldId::FdIno
                | FieldId::FdDev
                | FieldId::FdNameraw
                | FieldId::CustomFdnamePart1
                | FieldId::CustomFdnamePart2
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgKind {
    None,
    Indexed,
    Named,
}

/// A parsed selector: the field it names plus whichever argument form it took.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    pub id: FieldId,
    pub arg_id: Option<u32>,
    pub arg_name: Option<String>,
}

/// One element of a parsed profile string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    Field(Selector),
}

const REGISTRY: &[(&str, FieldId, ArgKind)] = &[
    ("container.id", FieldId::ContainerId, ArgKind::None),
    ("proc.name", FieldId::ProcName, ArgKind::None),
    ("proc.pname", FieldId::ProcPname, ArgKind::None),
    ("proc.aname", FieldId::ProcAname, ArgKind::Indexed),
    ("proc.args", FieldId::ProcArgs, ArgKind::None),
    ("proc.cmdnargs", FieldId::ProcCmdnargs, ArgKind::None),
    ("proc.cmdlenargs", FieldId::ProcCmdlenargs, ArgKind::None),
    ("proc.cmdline", FieldId::ProcCmdline, ArgKind::None),
    ("proc.pcmdline", FieldId::ProcPcmdline, ArgKind::None),
    ("proc.acmdline", FieldId::ProcAcmdline, ArgKind::Indexed),
    ("proc.exeline", FieldId::ProcExeline, ArgKind::None),
    ("proc.exe", FieldId::ProcExe, ArgKind::None),
    ("proc.pexe", FieldId::ProcPexe, ArgKind::None),
    ("proc.aexe", FieldId::ProcAexe, ArgKind::Indexed),
    ("proc.exepath", FieldId::ProcExepath, ArgKind::None),
    ("proc.pexepath", FieldId::ProcPexepath, ArgKind::None),
    ("proc.aexepath", FieldId::ProcAexepath, ArgKind::Indexed),
    ("proc.cwd", FieldId::ProcCwd, ArgKind::None),
    ("proc.tty", FieldId::ProcTty, ArgKind::None),
    ("proc.pid", FieldId::ProcPid, ArgKind::None),
    ("proc.ppid", FieldId::ProcPpid, ArgKind::None),
    ("proc.apid", FieldId::ProcApid, ArgKind::Indexed),
    ("proc.vpid", FieldId::ProcVpid, ArgKind::None),
    ("proc.pvpid", FieldId::ProcPvpid, ArgKind::None),
    ("proc.sid", FieldId::ProcSid, ArgKind::None),
    ("proc.sname", FieldId::ProcSname, ArgKind::None),
    ("proc.sid.exe", FieldId::ProcSidExe, ArgKind::None),
    ("proc.sid.exepath", FieldId::ProcSidExepath, ArgKind::None),
    ("proc.vpgid", FieldId::ProcVpgid, ArgKind::None),
    ("proc.vpgid.name", FieldId::ProcVpgidName, ArgKind::None),
    ("proc.vpgid.exe", FieldId::ProcVpgidExe, ArgKind::None),
    ("proc.vpgid.exepath", FieldId::ProcVpgidExepath, ArgKind::None),
    ("proc.env", FieldId::ProcEnv, ArgKind::Named),
    ("proc.is_exe_writable", FieldId::ProcIsExeWritable, ArgKind::None),
    ("proc.is_exe_upper_layer", FieldId::ProcIsExeUpperLayer, ArgKind::None),
    ("proc.is_exe_from_memfd", FieldId::ProcIsExeFromMemfd, ArgKind::None),
    ("proc.exe_ino", FieldId::ProcExeIno, ArgKind::None),
    ("proc.exe_ino.ctime", FieldId::ProcExeInoCtime, ArgKind::None),
    ("proc.exe_ino.mtime", FieldId::ProcExeInoMtime, ArgKind::None),
    ("proc.is_sid_leader", FieldId::ProcIsSidLeader, ArgKind::None),
    ("proc.is_vpgid_leader", FieldId::ProcIsVpgidLeader, ArgKind::None),
    ("fd.num", FieldId::FdNum, ArgKind::None),
    ("fd.name", FieldId::FdName, ArgKind::None),
    ("fd.directory", FieldId::FdDirectory, ArgKind::None),
    ("fd.filename", FieldId::FdFilename, ArgKind::None),
    ("fd.ino", FieldId::FdIno, ArgKind::None),
    ("fd.dev", FieldId::FdDev, ArgKind::None),
    ("fd.nameraw", FieldId::FdNameraw, ArgKind::None),
    ("custom.aname_lineage_concat", FieldId::CustomAnameLineageConcat, ArgKind::Indexed),
    ("custom.aexe_lineage_concat", FieldId::CustomAexeLineageConcat, ArgKind::Indexed),
    ("custom.aexepath_lineage_concat", FieldId::CustomAexepathLineageConcat, ArgKind::Indexed),
    ("custom.fdname_part1", FieldId::CustomFdnamePart1, ArgKind::None),
    ("custom.fdname_part2", FieldId::CustomFdnamePart2, ArgKind::None),
];

fn lookup(name: &str) -> Option<(FieldId, ArgKind)> {
    REGISTRY
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, id, kind)| (*id, *kind))
}

/// Set of selector names that reference `%fd.*` data, used by config
/// validation to enforce the fd-selector-vs-event-code rule (§6).
pub fn profile_uses_fd_selector(tokens: &[Token]) -> bool {
    tokens.iter().any(|t| matches!(t, Token::Field(s) if s.id.is_fd_dependent()))
}

/// Parse a profile string such as `%proc.name %fd.name` into tokens.
/// Unknown `%`-tokens are dropped with a warning rather than aborting.
pub fn parse_profile(fields: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for raw in fields.split_whitespace() {
        if let Some(rest) = raw.strip_prefix('%') {
            match parse_selector(rest) {
                Some(selector) => tokens.push(Token::Field(selector)),
                None => warn!("dropping unrecognized profile token: {raw}"),
            }
        } else {
            tokens.push(Token::Literal(raw.to_string()));
        }
    }
    tokens
}

fn parse_selector(rest: &str) -> Option<Selector> {
    let (name, arg) = match rest.find('[') {
        Some(open) => {
            if !rest.ends_with(']') {
                return None;
            }
            (&rest[..open], Some(&rest[open + 1..rest.len() - 1]))
        }
        None => (rest, None),
    };

    let (id, kind) = lookup(name)?;
    match kind {
        ArgKind::None => {
            if arg.is_some() {
                warn!("selector {name} does not take an argument, ignoring bracket");
            }
            Some(Selector { id, arg_id: None, arg_name: None })
        }
        ArgKind::Indexed => {
            let k = match arg {
                Some(s) => s.trim().parse::<u32>().ok()?,
                None => 0,
            };
            Some(Selector { id, arg_id: Some(k), arg_name: None })
        }
        ArgKind::Named => {
            let name = arg.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
            Some(Selector { id, arg_id: None, arg_name: name })
        }
    }
}
