//! In-memory `ThreadTable` test double, shared by unit tests across the
//! crate. Not part of the public API; compiled only under `cfg(test)`.

use dashmap::DashMap;

use crate::host::{FdSnapshot, ThreadSnapshot, ThreadTable};

#[derive(Default)]
pub struct MockThreadTable {
    threads: DashMap<i64, ThreadSnapshot>,
    fds: DashMap<(i64, i64), FdSnapshot>,
}

impl MockThreadTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_thread(&self, snapshot: ThreadSnapshot) {
        self.threads.insert(snapshot.tid, snapshot);
    }

    pub fn insert_fd(&self, tid: i64, fd: i64, snapshot: FdSnapshot) {
        self.fds.insert((tid, fd), snapshot);
    }
}

impl ThreadTable for MockThreadTable {
    fn thread(&self, tid: i64) -> Option<ThreadSnapshot> {
        self.threads.get(&tid).map(|r| r.clone())
    }

    fn fd(&self, tid: i64, fd: i64) -> Option<FdSnapshot> {
        self.fds.get(&(tid, fd)).map(|r| r.clone())
    }

    fn set_lastevent_fd(&self, tid: i64, fd: i64) {
        if let Some(mut entry) = self.threads.get_mut(&tid) {
            entry.lastevent_fd = fd;
        }
    }
}

/// Convenience builder for a thread snapshot with sane defaults, so
/// individual tests only set the fields they care about.
pub fn thread(tid: i64, comm: &str) -> ThreadSnapshot {
    ThreadSnapshot {
        tid,
        pid: tid,
        ptid: 1,
        comm: comm.to_string(),
        ..Default::default()
    }
}

/// Wire up `env_logger` the way the embedding binary would (mirrors the
/// reference daemon's own `env_logger::init()` call in `main.rs`), so
/// tests exercising log output can run with `RUST_LOG` set. Safe to call
/// from more than one test; `try_init` ignores a double-init.
pub fn init_test_logging() {
    let _ = env_logger::try_init();
}
