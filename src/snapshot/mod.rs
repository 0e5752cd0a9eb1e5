//! Crash-recovery snapshot log: an append-only,
//! line-oriented journal of membership and clock events, replayed on
//! startup to reconstruct the three Lamport clocks and the last-known
//! alive set so the agent can auto-rejoin without a fresh seed list.
//! A bounded async writer task with atomic rename for compaction.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::clock::LTime;
use crate::common::NodeId;
use crate::error::{AgentError, Result};

/// One logical record appended to the snapshot. Kept
/// as a simple tagged line format (`kind\tfield\tfield...`) rather than a
/// binary encoding so a partially-written trailing line is trivially
/// detected and skipped during replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Alive { node: String },
    NotAlive { node: String },
    Clock { ltime: LTime },
    EventClock { ltime: LTime },
    QueryClock { ltime: LTime },
    /// Written once, as the final line, when this node leaves gracefully.
    Leave,
}

impl Record {
    fn encode(&self) -> String {
        match self {
            Record::Alive { node } => format!("alive\t{node}"),
            Record::NotAlive { node } => format!("not-alive\t{node}"),
            Record::Clock { ltime } => format!("clock\t{ltime}"),
            Record::EventClock { ltime } => format!("event-clock\t{ltime}"),
            Record::QueryClock { ltime } => format!("query-clock\t{ltime}"),
            Record::Leave => "leave".to_string(),
        }
    }

    fn decode(line: &str) -> Option<Record> {
        let mut parts = line.splitn(2, '\t');
        let kind = parts.next()?;
        let rest = parts.next();
        match kind {
            "alive" => Some(Record::Alive { node: rest?.to_owned() }),
            "not-alive" => Some(Record::NotAlive { node: rest?.to_owned() }),
            "clock" => Some(Record::Clock { ltime: rest?.parse().ok()? }),
            "event-clock" => Some(Record::EventClock { ltime: rest?.parse().ok()? }),
            "query-clock" => Some(Record::QueryClock { ltime: rest?.parse().ok()? }),
            "leave" => Some(Record::Leave),
            _ => None,
        }
    }
}

/// The state reconstructed by replaying a snapshot on startup.
#[derive(Debug, Default, Clone)]
pub struct RecoveredState {
    pub alive: HashSet<NodeId>,
    pub clock: LTime,
    pub event_clock: LTime,
    pub query_clock: LTime,
    /// True if the log's last record was a graceful `Leave` — the agent
    /// should not auto-rejoin the old alive set in that case.
    pub left_gracefully: bool,
}

/// Replay `path`, tolerating a truncated final line (a crash mid-write).
pub async fn recover(path: &Path) -> Result<RecoveredState> {
    let file = match File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RecoveredState::default()),
        Err(e) => return Err(AgentError::from(e)),
    };
    let mut lines = BufReader::new(file).lines();
    let mut state = RecoveredState::default();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(_) => break,
        };
        let Some(record) = Record::decode(&line) else { continue };
        match record {
            Record::Alive { node } => {
                state.alive.insert(NodeId::new(node));
                state.left_gracefully = false;
            }
            Record::NotAlive { node } => {
                state.alive.remove(&NodeId::new(node));
            }
            Record::Clock { ltime } => state.clock = state.clock.max(ltime),
            Record::EventClock { ltime } => state.event_clock = state.event_clock.max(ltime),
            Record::QueryClock { ltime } => state.query_clock = state.query_clock.max(ltime),
            Record::Leave => state.left_gracefully = true,
        }
    }
    Ok(state)
}

/// A bounded async writer owning the snapshot file, with periodic
/// compaction once the log grows past `compact_threshold_bytes`. Compaction
/// rewrites just the alive set and the three clocks, dropping history, via
/// an atomic rename so a crash mid-compaction never corrupts the log.
pub struct Snapshotter {
    tx: mpsc::Sender<Record>,
}

impl Snapshotter {
    pub async fn open(path: impl Into<PathBuf>, queue_depth: usize, compact_threshold_bytes: u64) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        let (tx, mut rx) = mpsc::channel::<Record>(queue_depth);

        tokio::spawn(async move {
            let mut file = file;
            let mut written_since_compact: u64 = 0;
            while let Some(record) = rx.recv().await {
                let line = format!("{}\n", record.encode());
                if file.write_all(line.as_bytes()).await.is_err() {
                    continue;
                }
                written_since_compact += line.len() as u64;
                if written_since_compact > compact_threshold_bytes {
                    if let Ok(recovered) = recover(&path).await {
                        if compact(&path, &recovered).await.is_ok() {
                            if let Ok(reopened) = OpenOptions::new().append(true).open(&path).await {
                                file = reopened;
                                written_since_compact = 0;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self { tx })
    }

    pub async fn append(&self, record: Record) -> Result<()> {
        self.tx
            .send(record)
            .await
            .map_err(|_| AgentError::Snapshot("snapshot writer task has exited".into()))
    }
}

/// Atomically replace the log with a compacted version carrying only the
/// current alive set and clocks.
async fn compact(path: &Path, state: &RecoveredState) -> Result<()> {
    let tmp_path = path.with_extension("compact.tmp");
    let mut tmp = File::create(&tmp_path).await?;
    for node in &state.alive {
        tmp.write_all(format!("alive\t{}\n", node.as_str()).as_bytes()).await?;
    }
    tmp.write_all(format!("clock\t{}\n", state.clock).as_bytes()).await?;
    tmp.write_all(format!("event-clock\t{}\n", state.event_clock).as_bytes()).await?;
    tmp.write_all(format!("query-clock\t{}\n", state.query_clock).as_bytes()).await?;
    tmp.flush().await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn recover_missing_file_is_empty_default() {
        let dir = tempdir().unwrap();
        let state = recover(&dir.path().join("missing.log")).await.unwrap();
        assert!(state.alive.is_empty());
    }

    #[tokio::test]
    async fn append_then_recover_round_trips_alive_set_and_clocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.log");
        let snap = Snapshotter::open(&path, 16, 1 << 20).await.unwrap();
        snap.append(Record::Alive { node: "a".into() }).await.unwrap();
        snap.append(Record::Alive { node: "b".into() }).await.unwrap();
        snap.append(Record::Clock { ltime: 7 }).await.unwrap();
        snap.append(Record::NotAlive { node: "a".into() }).await.unwrap();
        // Give the writer task a moment to flush.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let state = recover(&path).await.unwrap();
        assert!(!state.alive.contains(&NodeId::new("a")));
        assert!(state.alive.contains(&NodeId::new("b")));
        assert_eq!(state.clock, 7);
    }

    #[tokio::test]
    async fn truncated_trailing_line_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.log");
        tokio::fs::write(&path, b"alive\ta\nclock\t5\nali").await.unwrap();
        let state = recover(&path).await.unwrap();
        assert!(state.alive.contains(&NodeId::new("a")));
        assert_eq!(state.clock, 5);
    }

    #[tokio::test]
    async fn leave_record_marks_graceful_departure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.log");
        tokio::fs::write(&path, b"alive\ta\nleave\n").await.unwrap();
        let state = recover(&path).await.unwrap();
        assert!(state.left_gracefully);
    }
}
