//! Durable, append-only CSV output for one (symbol, resolution).

use crate::{
    config::Resolution,
    error::SinkError,
    kline::{KLINE_HEADER, Kline},
};
use derive_more::Display;
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Deterministic output identifier: `{symbol}_{resolution}_{start}_to_{today}`.
///
/// Re-running on a different day yields a new identifier rather than resuming the old file.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Display)]
pub struct SinkId(String);

impl SinkId {
    pub fn new(
        symbol: &str,
        resolution: &Resolution,
        start_label: &str,
        today_label: &str,
    ) -> Self {
        Self(format!("{symbol}_{resolution}_{start_label}_to_{today_label}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}.csv", self.0)
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

pub struct KlineSink {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl KlineSink {
    /// Create (or reset) the sink: truncate any previous file with the same identifier and
    /// durably write the header.
    pub fn create(dir: &Path, id: &SinkId) -> Result<Self, SinkError> {
        fs::create_dir_all(dir)?;
        let path = id.path_in(dir);

        if path.exists() {
            info!(path = %path.display(), "sink already exists, overwriting");
        }

        let file = File::create(&path)?;
        let mut sink = Self::from_file(path, file);
        sink.writer.write_record(KLINE_HEADER)?;
        sink.sync()?;

        debug!(path = %sink.path.display(), "sink created");
        Ok(sink)
    }

    /// Re-open an existing sink for append without touching the header.
    ///
    /// The file is first cut back to `len` bytes, dropping any rows persisted after the last
    /// checkpoint. Fails if the file is shorter than `len`.
    pub fn resume(dir: &Path, id: &SinkId, len: u64) -> Result<Self, SinkError> {
        let path = id.path_in(dir);
        let file = OpenOptions::new().append(true).open(&path)?;

        let actual = file.metadata()?.len();
        if actual < len {
            return Err(SinkError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} holds {actual} bytes, expected at least {len}", path.display()),
            )));
        }
        if actual > len {
            warn!(
                path = %path.display(),
                discarded_bytes = actual - len,
                "discarding rows persisted after the last checkpoint"
            );
            file.set_len(len)?;
            file.sync_data()?;
        }

        debug!(path = %path.display(), "sink reopened for append");
        Ok(Self::from_file(path, file))
    }

    fn from_file(path: PathBuf, file: File) -> Self {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file);

        Self { path, writer }
    }

    /// Append `rows` in order. The rows are on disk when this returns.
    pub fn append(&mut self, rows: &[Kline]) -> Result<usize, SinkError> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.sync()?;
        Ok(rows.len())
    }

    fn sync(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes durably persisted so far.
    pub fn persisted_len(&self) -> Result<u64, SinkError> {
        Ok(self.writer.get_ref().metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn id() -> SinkId {
        SinkId::new("BTCUSDT", &Resolution::from("1d"), "2018-01-01", "2024-06-01")
    }

    fn rows() -> Vec<Kline> {
        vec![
            Kline {
                open_time: 1514764800000,
                open: dec!(13715.65000000),
                high: dec!(13818.55000000),
                low: dec!(12750.00000000),
                close: dec!(13380.00000000),
                volume: dec!(8609.91584400),
                close_time: 1514851199999,
            },
            Kline {
                open_time: 1514851200000,
                open: dec!(13382.16000000),
                high: dec!(15473.49000000),
                low: dec!(12890.02000000),
                close: dec!(14675.11000000),
                volume: dec!(20078.09211100),
                close_time: 1514937599999,
            },
        ]
    }

    const HEADER: &str = "open_time,open,high,low,close,volume,close_time\n";
    const ROW_0: &str = "1514764800000,13715.65000000,13818.55000000,12750.00000000,13380.00000000,8609.91584400,1514851199999\n";
    const ROW_1: &str = "1514851200000,13382.16000000,15473.49000000,12890.02000000,14675.11000000,20078.09211100,1514937599999\n";

    #[test]
    fn test_sink_id_file_name() {
        assert_eq!(id().as_str(), "BTCUSDT_1d_2018-01-01_to_2024-06-01");
        assert_eq!(id().file_name(), "BTCUSDT_1d_2018-01-01_to_2024-06-01.csv");
    }

    #[test]
    fn test_create_writes_header_then_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = KlineSink::create(dir.path(), &id()).unwrap();

        assert_eq!(fs::read_to_string(sink.path()).unwrap(), HEADER);

        assert_eq!(sink.append(&rows()[..1]).unwrap(), 1);
        assert_eq!(sink.append(&rows()[1..]).unwrap(), 1);
        assert_eq!(
            sink.persisted_len().unwrap(),
            (HEADER.len() + ROW_0.len() + ROW_1.len()) as u64
        );

        let actual = fs::read_to_string(sink.path()).unwrap();
        assert_eq!(actual, format!("{HEADER}{ROW_0}{ROW_1}"));
    }

    #[test]
    fn test_create_resets_existing_sink_with_single_header() {
        let dir = tempfile::tempdir().unwrap();

        let mut first = KlineSink::create(dir.path(), &id()).unwrap();
        first.append(&rows()).unwrap();
        drop(first);

        let second = KlineSink::create(dir.path(), &id()).unwrap();
        let actual = fs::read_to_string(second.path()).unwrap();
        assert_eq!(actual, HEADER);
        assert_eq!(actual.matches("open_time").count(), 1);
    }

    #[test]
    fn test_create_makes_missing_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("data").join("binance");

        let sink = KlineSink::create(&nested, &id()).unwrap();
        assert!(sink.path().starts_with(&nested));
        assert!(sink.path().exists());
    }

    #[test]
    fn test_resume_appends_without_header() {
        let dir = tempfile::tempdir().unwrap();

        let mut sink = KlineSink::create(dir.path(), &id()).unwrap();
        sink.append(&rows()[..1]).unwrap();
        let len = sink.persisted_len().unwrap();
        drop(sink);

        let mut resumed = KlineSink::resume(dir.path(), &id(), len).unwrap();
        resumed.append(&rows()[1..]).unwrap();

        let actual = fs::read_to_string(resumed.path()).unwrap();
        assert_eq!(actual, format!("{HEADER}{ROW_0}{ROW_1}"));
    }

    #[test]
    fn test_resume_discards_rows_after_checkpointed_len() {
        let dir = tempfile::tempdir().unwrap();

        let mut sink = KlineSink::create(dir.path(), &id()).unwrap();
        sink.append(&rows()[..1]).unwrap();
        let len = sink.persisted_len().unwrap();
        sink.append(&rows()[1..]).unwrap();
        drop(sink);

        let mut resumed = KlineSink::resume(dir.path(), &id(), len).unwrap();
        assert_eq!(
            fs::read_to_string(resumed.path()).unwrap(),
            format!("{HEADER}{ROW_0}")
        );

        resumed.append(&rows()[1..]).unwrap();
        assert_eq!(
            fs::read_to_string(resumed.path()).unwrap(),
            format!("{HEADER}{ROW_0}{ROW_1}")
        );
    }

    #[test]
    fn test_resume_shorter_than_len_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = KlineSink::create(dir.path(), &id()).unwrap();
        let len = sink.persisted_len().unwrap();
        drop(sink);

        assert!(matches!(
            KlineSink::resume(dir.path(), &id(), len + 1),
            Err(SinkError::Io(_))
        ));
    }

    #[test]
    fn test_resume_missing_sink_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            KlineSink::resume(dir.path(), &id(), 0),
            Err(SinkError::Io(_))
        ));
    }
}
