//! Host collaborator traits (`SPEC_FULL.md` §10 "Host collaborators as
//! traits"). The real thread table, fd subtable and event capture layer
//! live in the host process; a production build implements these traits
//! against that FFI surface, while tests implement them with plain
//! in-memory structures (see `testutil`).
//!
//! Reads return owned snapshots rather than borrowed views or GAT-based
//! cursors: the host table can mutate between the extractor's reads (a
//! new event may land on another thread), so every read here is a
//! point-in-time copy rather than a live reference.

/// Snapshot of one entry in the host's fd subtable (§6).
#[derive(Debug, Clone, Default)]
pub struct FdSnapshot {
    pub name: String,
    pub name_raw: String,
    pub old_name: String,
    pub open_flags: u32,
    pub flags: u32,
    pub dev: u32,
    pub mount_id: i32,
    pub ino: u64,
    pub pid: i64,
}

/// Snapshot of one entry in the host's thread table (§6), including the
/// plugin's own `lastevent_fd` custom field.
#[derive(Debug, Clone, Default)]
pub struct ThreadSnapshot {
    pub tid: i64,
    pub pid: i64,
    pub ptid: i64,
    pub sid: i64,
    pub vtid: i64,
    pub vpid: i64,
    pub vpgid: i64,
    pub tty: i64,
    pub exe_ino: u64,
    pub exe_ino_ctime: u64,
    pub exe_ino_mtime: u64,
    pub exe_writable: bool,
    pub exe_upper_layer: bool,
    pub exe_from_memfd: bool,
    pub comm: String,
    pub exe: String,
    pub exe_path: String,
    pub cwd: String,
    pub container_id: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub lastevent_fd: i64,
}

/// Collaborator interface onto the host's thread/fd subtables.
///
/// `PPM_AT_FDCWD` is the sentinel dirfd value meaning "resolve relative
/// to the thread's `cwd`" rather than a real fd table entry.
pub const PPM_AT_FDCWD: i64 = -100;

pub trait ThreadTable: Send + Sync {
    /// Snapshot of the thread with the given tid, or `None` if absent.
    fn thread(&self, tid: i64) -> Option<ThreadSnapshot>;

    /// Snapshot of the fd entry `fd` belonging to thread `tid`.
    fn fd(&self, tid: i64, fd: i64) -> Option<FdSnapshot>;

    /// Write the plugin's custom `lastevent_fd` field for `tid`. A no-op
    /// if the thread is absent (§4.6 step 1 only runs when a thread
    /// entry exists to write into).
    fn set_lastevent_fd(&self, tid: i64, fd: i64);
}
