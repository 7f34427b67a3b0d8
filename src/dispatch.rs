//! Event dispatch / parse loop (`SPEC_FULL.md` §4.6).

use crate::bank::SketchBank;
use crate::buffer::{decode_i64, produced_fd_slot, RawEvent};
use crate::error::PluginError;
use crate::fingerprint::extract;
use crate::host::ThreadTable;

/// Feed one event through fd bookkeeping and every matching sketch.
///
/// Returns `Err` only when the event's own core parameters could not be
/// decoded (§4.6 "an exception decoding an event's core parameters
/// aborts that event's parse"); per-field extraction failures never
/// propagate here; they degrade to an empty contribution inside
/// `extract`.
pub async fn parse(evt: &RawEvent<'_>, table: &dyn ThreadTable, bank: &SketchBank) -> Result<(), PluginError> {
    if evt.tid <= 0 {
        return Ok(());
    }

    if let Some(slot) = produced_fd_slot(evt.event_type) {
        let fd = decode_i64(evt.get_param(slot)?)?;
        table.set_lastevent_fd(evt.tid, fd);
    }

    for entry in bank.snapshot().await {
        if !entry.event_codes.contains(&evt.event_type) {
            continue;
        }
        let fp = extract(evt, table, &entry.tokens);
        if !fp.is_empty() {
            entry.cms.update(fp.as_bytes(), 1);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::SketchEntry;
    use crate::buffer::event_codes::*;
    use crate::cms::Cms;
    use crate::profile::parse_profile;
    use crate::testutil::{thread, MockThreadTable};
    use std::collections::HashSet;

    fn packed(params: &[&[u8]]) -> (Vec<u16>, Vec<u8>) {
        (params.iter().map(|p| p.len() as u16).collect(), params.concat())
    }

    #[tokio::test]
    async fn negative_tid_is_skipped() {
        let bank = SketchBank::new();
        let tokens = parse_profile("%proc.name");
        let mut codes = HashSet::new();
        codes.insert(EXECVE);
        bank.reconfigure(vec![SketchEntry::new(Cms::new_with_dw(2, 16).unwrap(), tokens, codes, 0)]).await;
        let table = MockThreadTable::new();

        let (lens, payload) = packed(&[]);
        let evt = RawEvent::new(EXECVE, -1, &lens, &payload);
        parse(&evt, &table, &bank).await.unwrap();

        let sketch = bank.get(0).await.unwrap();
        assert_eq!(sketch.cms.estimate(b""), 0);
    }

    #[tokio::test]
    async fn fd_bookkeeping_writes_lastevent_fd() {
        let bank = SketchBank::new();
        let table = MockThreadTable::new();
        table.insert_thread(thread(5, "curl"));

        let fd: i64 = 7;
        let (lens, payload) = packed(&[&fd.to_le_bytes()]);
        let evt = RawEvent::new(OPEN, 5, &lens, &payload);
        parse(&evt, &table, &bank).await.unwrap();

        assert_eq!(table.thread(5).unwrap().lastevent_fd, 7);
    }

    #[tokio::test]
    async fn matching_profile_updates_sketch() {
        let bank = SketchBank::new();
        let table = MockThreadTable::new();
        table.insert_thread(thread(5, "/bin/sh"));

        let tokens = parse_profile("%proc.name");
        let mut codes = HashSet::new();
        codes.insert(EXECVE);
        bank.reconfigure(vec![SketchEntry::new(Cms::new_with_dw(3, 64).unwrap(), tokens, codes, 0)]).await;

        let (lens, payload) = packed(&[]);
        let evt = RawEvent::new(EXECVE, 5, &lens, &payload);
        for _ in 0..5 {
            parse(&evt, &table, &bank).await.unwrap();
        }

        let sketch = bank.get(0).await.unwrap();
        assert_eq!(sketch.cms.estimate(b"/bin/sh"), 5);
    }

    #[tokio::test]
    async fn non_matching_event_code_does_not_update() {
        let bank = SketchBank::new();
        let table = MockThreadTable::new();
        table.insert_thread(thread(5, "/bin/sh"));

        let tokens = parse_profile("%proc.name");
        let mut codes = HashSet::new();
        codes.insert(OPEN);
        bank.reconfigure(vec![SketchEntry::new(Cms::new_with_dw(3, 64).unwrap(), tokens, codes, 0)]).await;

        let (lens, payload) = packed(&[]);
        let evt = RawEvent::new(EXECVE, 5, &lens, &payload);
        parse(&evt, &table, &bank).await.unwrap();

        let sketch = bank.get(0).await.unwrap();
        assert_eq!(sketch.cms.estimate(b"/bin/sh"), 0);
    }

    #[tokio::test]
    async fn malformed_core_params_return_error_without_panic() {
        let bank = SketchBank::new();
        let table = MockThreadTable::new();
        table.insert_thread(thread(5, "curl"));

        let (lens, payload) = packed(&[b"x"]);
        let evt = RawEvent::new(OPEN, 5, &lens, &payload);
        let result = parse(&evt, &table, &bank).await;
        assert!(matches!(result, Err(PluginError::ParseBufferMalformed(_))));
    }
}
