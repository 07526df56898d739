// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Journal reader backed by `journalctl --output=json --follow`.
//!
//! Each output line is one journal entry as a JSON object. Keys starting with
//! `__` are address fields (`__CURSOR`, `__REALTIME_TIMESTAMP`, ...) rather
//! than data fields; everything else is a data field in the journal's own
//! enumeration order. Values are encoded by journalctl as:
//! - a string for printable data,
//! - an array of numbers for binary data,
//! - an array of the above when a field occurs several times in one entry,
//! - `null` when the data was not retrieved.

use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

use super::{Cursor, JournalSource, LogRecord, ReadOutcome};
use crate::error::SourceError;

#[derive(Debug, Clone)]
pub struct JournalctlSettings {
    /// Path or name of the journalctl binary.
    pub binary: String,
    /// How long `next` waits for a new line before returning `WouldBlock`.
    pub poll_interval: Duration,
}

#[derive(Debug)]
pub struct JournalctlSource {
    settings: JournalctlSettings,
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl JournalctlSource {
    /// Starts following the journal from its first entry.
    pub fn open(settings: JournalctlSettings) -> Result<Self, SourceError> {
        let (child, lines) =
            spawn(&settings, None).map_err(SourceError::Unavailable)?;
        Ok(Self {
            settings,
            child,
            lines,
        })
    }

    async fn read_line(&mut self) -> Result<String, SourceError> {
        match self.lines.next_line().await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(self.terminated().await),
            Err(e) => Err(SourceError::Read(e.to_string())),
        }
    }

    async fn terminated(&mut self) -> SourceError {
        match self.child.wait().await {
            Ok(status) => SourceError::Terminated(format!("journalctl exited with {status}")),
            Err(e) => SourceError::Terminated(format!("journalctl exited: {e}")),
        }
    }
}

fn spawn(
    settings: &JournalctlSettings,
    cursor: Option<&Cursor>,
) -> Result<(Child, Lines<BufReader<ChildStdout>>), String> {
    let mut command = Command::new(&settings.binary);
    command.args(["--output=json", "--follow", "--no-tail", "--all", "--quiet"]);
    if let Some(cursor) = cursor {
        command.arg(format!("--cursor={cursor}"));
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| format!("failed to spawn {}: {e}", settings.binary))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| format!("{} stdout was not captured", settings.binary))?;
    debug!(binary = %settings.binary, cursor = ?cursor.map(Cursor::as_str), "Following journal");
    Ok((child, BufReader::new(stdout).lines()))
}

#[async_trait]
impl JournalSource for JournalctlSource {
    async fn seek(&mut self, cursor: &Cursor) -> Result<(), SourceError> {
        let (child, lines) =
            spawn(&self.settings, Some(cursor)).map_err(|reason| SourceError::Seek {
                cursor: cursor.to_string(),
                reason,
            })?;
        // The previous process is killed when its handle is dropped
        self.child = child;
        self.lines = lines;
        Ok(())
    }

    async fn skip(&mut self, n: usize) -> Result<(), SourceError> {
        for _ in 0..n {
            let line = self.read_line().await?;
            parse_entry(&line)?;
        }
        Ok(())
    }

    async fn next(&mut self) -> Result<ReadOutcome, SourceError> {
        let line = tokio::time::timeout(self.settings.poll_interval, self.lines.next_line()).await;
        match line {
            Err(_elapsed) => Ok(ReadOutcome::WouldBlock),
            Ok(Ok(Some(line))) => parse_entry(&line).map(ReadOutcome::Record),
            Ok(Ok(None)) => Err(self.terminated().await),
            Ok(Err(e)) => Err(SourceError::Read(e.to_string())),
        }
    }
}

/// Parses one line of `journalctl --output=json`.
pub fn parse_entry(line: &str) -> Result<LogRecord, SourceError> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| SourceError::Malformed(format!("invalid JSON: {e}")))?;
    let Value::Object(entry) = value else {
        return Err(SourceError::Malformed(
            "entry is not a JSON object".to_string(),
        ));
    };

    let cursor = entry
        .get("__CURSOR")
        .and_then(Value::as_str)
        .ok_or_else(|| SourceError::Malformed("missing __CURSOR".to_string()))?;
    let realtime_usec = entry
        .get("__REALTIME_TIMESTAMP")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse::<u64>().ok())
        .ok_or_else(|| {
            SourceError::Malformed(format!("missing or invalid __REALTIME_TIMESTAMP at {cursor}"))
        })?;

    let mut fields = Vec::with_capacity(entry.len());
    for (key, value) in &entry {
        if key.starts_with("__") {
            continue;
        }
        push_field(&mut fields, key, value);
    }

    Ok(LogRecord {
        fields,
        realtime_usec,
        cursor: Cursor::new(cursor),
    })
}

fn push_field(fields: &mut Vec<(String, String)>, key: &str, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => fields.push((key.to_string(), s.clone())),
        Value::Array(items) => match as_bytes(items) {
            Some(bytes) => fields.push((
                key.to_string(),
                String::from_utf8_lossy(&bytes).into_owned(),
            )),
            None => {
                for item in items {
                    push_field(fields, key, item);
                }
            }
        },
        other => fields.push((key.to_string(), other.to_string())),
    }
}

fn as_bytes(items: &[Value]) -> Option<Vec<u8>> {
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entry_basic() {
        let line = r#"{"__CURSOR":"s=abc;i=1","__REALTIME_TIMESTAMP":"1709632800000000","__MONOTONIC_TIMESTAMP":"42","_BOOT_ID":"b1","_HOSTNAME":"web-1","MESSAGE":"hello"}"#;
        let record = parse_entry(line).unwrap();

        assert_eq!(record.cursor, Cursor::new("s=abc;i=1"));
        assert_eq!(record.realtime_usec, 1_709_632_800_000_000);
        assert_eq!(
            record.fields,
            vec![
                ("_BOOT_ID".to_string(), "b1".to_string()),
                ("_HOSTNAME".to_string(), "web-1".to_string()),
                ("MESSAGE".to_string(), "hello".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_entry_keeps_enumeration_order() {
        let line = r#"{"__CURSOR":"c","__REALTIME_TIMESTAMP":"1","_HOST":"a","host":"b"}"#;
        let record = parse_entry(line).unwrap();
        let keys: Vec<&str> = record.fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["_HOST", "host"]);
    }

    #[test]
    fn test_parse_entry_binary_and_repeated_fields() {
        let line = r#"{"__CURSOR":"c","__REALTIME_TIMESTAMP":"1","MESSAGE":[104,105],"TAG":["one","two"],"BLOB":null}"#;
        let record = parse_entry(line).unwrap();
        assert_eq!(
            record.fields,
            vec![
                ("MESSAGE".to_string(), "hi".to_string()),
                ("TAG".to_string(), "one".to_string()),
                ("TAG".to_string(), "two".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_entry_repeated_binary_fields() {
        let line = r#"{"__CURSOR":"c","__REALTIME_TIMESTAMP":"1","DATA":[[97],[98]]}"#;
        let record = parse_entry(line).unwrap();
        assert_eq!(
            record.fields,
            vec![
                ("DATA".to_string(), "a".to_string()),
                ("DATA".to_string(), "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_entry_missing_cursor() {
        let line = r#"{"__REALTIME_TIMESTAMP":"1","MESSAGE":"x"}"#;
        assert!(matches!(
            parse_entry(line),
            Err(SourceError::Malformed(reason)) if reason.contains("__CURSOR")
        ));
    }

    #[test]
    fn test_parse_entry_invalid_timestamp() {
        let line = r#"{"__CURSOR":"c","__REALTIME_TIMESTAMP":"yesterday"}"#;
        assert!(matches!(parse_entry(line), Err(SourceError::Malformed(_))));
    }

    #[test]
    fn test_parse_entry_not_an_object() {
        assert!(matches!(parse_entry("[1,2]"), Err(SourceError::Malformed(_))));
        assert!(matches!(parse_entry("{"), Err(SourceError::Malformed(_))));
    }

    /// Writes an executable stand-in for journalctl that prints entries
    /// `a`..`d` from its `--cursor` (inclusive, as journalctl does) and then
    /// runs `tail`.
    #[cfg(unix)]
    fn fake_journalctl(dir: &std::path::Path, tail: &str) -> JournalctlSettings {
        use std::os::unix::fs::PermissionsExt;

        let script = format!(
            r#"#!/bin/sh
start=""
for arg in "$@"; do
  case "$arg" in
    --cursor=*) start="${{arg#--cursor=}}" ;;
  esac
done
emit=0
[ -z "$start" ] && emit=1
for c in a b c d; do
  [ "$c" = "$start" ] && emit=1
  if [ "$emit" = 1 ]; then
    printf '{{"__CURSOR":"%s","__REALTIME_TIMESTAMP":"1709632800000000","MESSAGE":"entry %s"}}\n' "$c" "$c"
  fi
done
{tail}
"#
        );
        let path = dir.join("journalctl");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        JournalctlSettings {
            binary: path.display().to_string(),
            poll_interval: Duration::from_secs(2),
        }
    }

    /// Cursors read until the source reports `WouldBlock`.
    #[cfg(unix)]
    async fn read_until_idle(source: &mut JournalctlSource) -> Vec<String> {
        let mut cursors = Vec::new();
        while let ReadOutcome::Record(record) = source.next().await.unwrap() {
            cursors.push(record.cursor.to_string());
        }
        cursors
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_follows_journal_from_head() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = JournalctlSource::open(fake_journalctl(dir.path(), "exec sleep 30")).unwrap();

        assert_eq!(read_until_idle(&mut source).await, vec!["a", "b", "c", "d"]);
        assert!(matches!(source.next().await, Ok(ReadOutcome::WouldBlock)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resume_starts_after_checkpointed_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = JournalctlSource::open(fake_journalctl(dir.path(), "exec sleep 30")).unwrap();

        crate::source::resume(&mut source, Some(&Cursor::new("b")))
            .await
            .unwrap();

        assert_eq!(read_until_idle(&mut source).await, vec!["c", "d"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exited_journalctl_is_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = JournalctlSource::open(fake_journalctl(dir.path(), "exit 3")).unwrap();

        for expected in ["a", "b", "c", "d"] {
            match source.next().await.unwrap() {
                ReadOutcome::Record(record) => assert_eq!(record.cursor.as_str(), expected),
                ReadOutcome::WouldBlock => panic!("expected entry {expected}"),
            }
        }
        match source.next().await {
            Err(SourceError::Terminated(reason)) => assert!(reason.contains('3'), "{reason}"),
            other => panic!("expected termination, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_skip_past_exit_is_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = JournalctlSource::open(fake_journalctl(dir.path(), "exit 0")).unwrap();

        source.seek(&Cursor::new("d")).await.unwrap();
        source.skip(1).await.unwrap();
        assert!(matches!(
            source.skip(1).await,
            Err(SourceError::Terminated(_))
        ));
    }

    #[tokio::test]
    async fn test_open_missing_binary_is_unavailable() {
        let result = JournalctlSource::open(JournalctlSettings {
            binary: "/nonexistent/journalctl".to_string(),
            poll_interval: Duration::from_millis(10),
        });
        assert!(matches!(result, Err(SourceError::Unavailable(_))));
    }
}
