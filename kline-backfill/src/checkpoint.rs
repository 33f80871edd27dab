//! Cursor checkpoints that let an interrupted run resume instead of restarting.
//!
//! With resume enabled, a checkpoint is written next to its sink after every durable page
//! append. It records the sink's length at that point so rows appended after it can be cut off
//! again when resuming.

use crate::{cursor::BackfillCursor, error::BackfillError, sink::SinkId};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Checkpoint {
    pub sink: String,
    pub symbol: String,
    pub resolution: String,
    pub start_date: String,
    pub next_start: i64,
    pub total_count: u64,
    /// Sink length in bytes covered by this checkpoint.
    pub sink_len: u64,
}

impl Checkpoint {
    pub fn new(sink: &SinkId, start_date: &str, cursor: &BackfillCursor, sink_len: u64) -> Self {
        Self {
            sink: sink.to_string(),
            symbol: cursor.symbol.to_string(),
            resolution: cursor.resolution.to_string(),
            start_date: start_date.to_string(),
            next_start: cursor.next_start,
            total_count: cursor.total_count,
            sink_len,
        }
    }

    pub fn path_in(dir: &Path, sink: &SinkId) -> PathBuf {
        dir.join(format!("{sink}.checkpoint.json"))
    }

    /// Load the checkpoint at `path`, if there is one.
    pub fn load(path: &Path) -> Result<Option<Self>, BackfillError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(BackfillError::Checkpoint(format!(
                    "failed to read {}: {error}",
                    path.display()
                )));
            }
        };

        serde_json::from_str(&contents).map(Some).map_err(|error| {
            BackfillError::Checkpoint(format!("failed to parse {}: {error}", path.display()))
        })
    }

    /// Atomically replace the checkpoint at `path`.
    pub fn store(&self, path: &Path) -> Result<(), BackfillError> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|error| BackfillError::Checkpoint(error.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .and_then(|()| fs::rename(&tmp, path))
            .map_err(|error| {
                BackfillError::Checkpoint(format!("failed to write {}: {error}", path.display()))
            })
    }

    /// Remove a stale checkpoint left behind for a sink that is being reset.
    pub fn clear(path: &Path) -> Result<(), BackfillError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(BackfillError::Checkpoint(format!(
                "failed to remove {}: {error}",
                path.display()
            ))),
        }
    }

    /// Whether this checkpoint was written for the same sink and run parameters.
    pub fn matches(&self, sink: &SinkId, symbol: &str, resolution: &str, start_date: &str) -> bool {
        self.sink == sink.as_str()
            && self.symbol == symbol
            && self.resolution == resolution
            && self.start_date == start_date
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Resolution;
    use smol_str::SmolStr;

    fn sink() -> SinkId {
        SinkId::new("BTCUSDT", &Resolution::from("4h"), "2018-01-01", "2024-06-01")
    }

    fn checkpoint() -> Checkpoint {
        let mut cursor = BackfillCursor::new(
            SmolStr::new("BTCUSDT"),
            Resolution::from("4h"),
            1_514_764_800_000,
            1_717_200_000_000,
        );
        cursor.next_start = 1_600_000_000_000;
        cursor.total_count = 3_000;
        Checkpoint::new(&sink(), "2018-01-01", &cursor, 4_096)
    }

    #[test]
    fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = Checkpoint::path_in(dir.path(), &sink());
        assert!(path.ends_with("BTCUSDT_4h_2018-01-01_to_2024-06-01.checkpoint.json"));

        assert_eq!(Checkpoint::load(&path).unwrap(), None);

        checkpoint().store(&path).unwrap();
        assert_eq!(Checkpoint::load(&path).unwrap(), Some(checkpoint()));
        assert!(!path.with_extension("json.tmp").exists());

        Checkpoint::clear(&path).unwrap();
        assert_eq!(Checkpoint::load(&path).unwrap(), None);
        Checkpoint::clear(&path).unwrap();
    }

    #[test]
    fn test_load_corrupt_checkpoint_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = Checkpoint::path_in(dir.path(), &sink());
        fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(
            Checkpoint::load(&path),
            Err(BackfillError::Checkpoint(_))
        ));
    }

    #[test]
    fn test_matches() {
        struct TestCase {
            sink: SinkId,
            symbol: &'static str,
            resolution: &'static str,
            start_date: &'static str,
            expected: bool,
        }

        let tests = vec![
            // TC0: same run parameters
            TestCase {
                sink: sink(),
                symbol: "BTCUSDT",
                resolution: "4h",
                start_date: "2018-01-01",
                expected: true,
            },
            // TC1: different resolution
            TestCase {
                sink: sink(),
                symbol: "BTCUSDT",
                resolution: "1d",
                start_date: "2018-01-01",
                expected: false,
            },
            // TC2: different start date
            TestCase {
                sink: sink(),
                symbol: "BTCUSDT",
                resolution: "4h",
                start_date: "2019-01-01",
                expected: false,
            },
            // TC3: different sink (another day)
            TestCase {
                sink: SinkId::new("BTCUSDT", &Resolution::from("4h"), "2018-01-01", "2024-06-02"),
                symbol: "BTCUSDT",
                resolution: "4h",
                start_date: "2018-01-01",
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual =
                checkpoint().matches(&test.sink, test.symbol, test.resolution, test.start_date);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
