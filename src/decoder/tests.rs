// src/decoder/tests.rs

//! Framing tests for the event record decoder, using hand-built buffers laid
//! out the way the kernel writes them.

use super::*;

/// Builds one record, padding the name with NULs to `padded_len` bytes.
fn record(wd: i32, mask: u32, cookie: u32, name: Option<&str>, padded_len: usize) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&wd.to_ne_bytes());
    bytes.extend_from_slice(&mask.to_ne_bytes());
    bytes.extend_from_slice(&cookie.to_ne_bytes());
    let name_len = if name.is_some() { padded_len } else { 0 };
    bytes.extend_from_slice(&(name_len as u32).to_ne_bytes());
    if let Some(name) = name {
        assert!(name.len() < padded_len, "name needs room for its terminator");
        bytes.extend_from_slice(name.as_bytes());
        bytes.resize(HEADER_LEN + padded_len, 0);
    }
    bytes
}

#[test_log::test]
fn test_empty_buffer_yields_nothing() {
    assert_eq!(decode(&[]).count(), 0);
}

#[test_log::test]
fn test_record_without_name() {
    let buf = record(3, libc::IN_DELETE_SELF, 0, None, 0);
    let records: Vec<_> = decode(&buf).collect::<Result<_>>().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].wd, 3);
    assert_eq!(records[0].mask, libc::IN_DELETE_SELF);
    assert_eq!(records[0].name, None);
    assert_eq!(records[0].len, HEADER_LEN);
}

#[test_log::test]
fn test_name_padding_is_trimmed() {
    let buf = record(1, libc::IN_CREATE, 0, Some("file.txt"), 16);
    let rec = decode(&buf).next().unwrap().unwrap();
    assert_eq!(rec.name, Some(&b"file.txt"[..]));
    assert_eq!(rec.len, HEADER_LEN + 16);
}

#[test_log::test]
fn test_records_keep_buffer_order_and_cookies() {
    let mut buf = record(1, libc::IN_MOVED_FROM, 42, Some("old"), 16);
    buf.extend(record(1, libc::IN_MOVED_TO, 42, Some("new"), 16));
    buf.extend(record(2, libc::IN_IGNORED, 0, None, 0));

    let records: Vec<_> = decode(&buf).collect::<Result<_>>().unwrap();
    let summary: Vec<_> = records
        .iter()
        .map(|r| (r.wd, r.mask, r.cookie, r.name.map(|n| n.to_vec())))
        .collect();
    assert_eq!(
        summary,
        vec![
            (1, libc::IN_MOVED_FROM, 42, Some(b"old".to_vec())),
            (1, libc::IN_MOVED_TO, 42, Some(b"new".to_vec())),
            (2, libc::IN_IGNORED, 0, None),
        ]
    );
}

#[test_log::test]
fn test_decoding_is_restartable() {
    let buf = record(7, libc::IN_MODIFY, 0, Some("a"), 16);
    let first: Vec<_> = decode(&buf).collect();
    let second: Vec<_> = decode(&buf).collect();
    assert_eq!(first.len(), 1);
    assert_eq!(
        first[0].as_ref().unwrap(),
        second[0].as_ref().unwrap()
    );
}

#[test_log::test]
fn test_truncated_header_is_corruption() {
    let mut buf = record(1, libc::IN_CREATE, 0, Some("x"), 16);
    buf.extend_from_slice(&[0u8; 6]);

    let mut records = decode(&buf);
    assert!(records.next().unwrap().is_ok());
    match records.next() {
        Some(Err(NotifyError::Corruption { offset, .. })) => assert_eq!(offset, HEADER_LEN + 16),
        other => panic!("expected corruption, got {:?}", other),
    }
    assert!(records.next().is_none(), "decoder must stop after corruption");
    assert_eq!(records.remaining(), 0);
}

#[test_log::test]
fn test_name_length_past_end_is_corruption() {
    let mut buf = record(1, libc::IN_CREATE, 0, Some("name"), 16);
    buf.truncate(HEADER_LEN + 8);

    let mut records = decode(&buf);
    assert!(matches!(
        records.next(),
        Some(Err(NotifyError::Corruption { offset: 0, .. }))
    ));
    assert!(records.next().is_none());
}
