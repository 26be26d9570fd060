//! CSV-backed record store.
//!
//! The log is a header-first CSV file that only ever grows. Every append is
//! encoded in memory and handed to the kernel as one write on a file opened in
//! append mode, so concurrent writers never interleave inside a row and no
//! lock is held while doing I/O. Readers only consider bytes up to the last
//! newline: a row whose write is still in flight is invisible until it is
//! complete.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::storage::schema::{ColumnMap, COLUMNS};
use crate::storage::{RecordBatch, StoreError, TelemetryRecord, UNKNOWN};

/// Handle to the telemetry log. Cheap to clone; holds no open descriptors.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the log with its header row if it does not exist or is empty.
    /// An existing log is left untouched. Returns `true` when a header was
    /// written.
    pub fn create(&self) -> Result<bool, StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.unavailable(e))?;
            }
        }

        let header = encode_fields(COLUMNS.iter().map(|c| c.to_string()))
            .map_err(|e| self.unavailable(e))?;

        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(mut file) => {
                file.write_all(&header).map_err(|e| self.unavailable(e))?;
                info!(path = %self.path.display(), "Created telemetry log");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let size = fs::metadata(&self.path)
                    .map_err(|e| self.unavailable(e))?
                    .len();
                if size > 0 {
                    debug!(path = %self.path.display(), size, "Telemetry log already exists");
                    return Ok(false);
                }
                let mut file = OpenOptions::new()
                    .append(true)
                    .open(&self.path)
                    .map_err(|e| self.unavailable(e))?;
                file.write_all(&header).map_err(|e| self.unavailable(e))?;
                info!(path = %self.path.display(), "Wrote header to empty telemetry log");
                Ok(true)
            }
            Err(e) => Err(self.unavailable(e)),
        }
    }

    /// Append one record at the next position. Recreates the log (header
    /// included) if it has disappeared.
    pub fn append(&self, record: &TelemetryRecord) -> Result<(), StoreError> {
        let row = encode_record(record).map_err(|e| self.unavailable(e))?;

        let mut file = match OpenOptions::new().append(true).open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.create()?;
                OpenOptions::new()
                    .append(true)
                    .open(&self.path)
                    .map_err(|e| self.unavailable(e))?
            }
            Err(e) => return Err(self.unavailable(e)),
        };

        file.write_all(&row).map_err(|e| self.unavailable(e))
    }

    /// Number of complete records in the log.
    pub fn len(&self) -> Result<usize, StoreError> {
        let bytes = self.read_complete()?;
        let mut reader = reader_for(&bytes);
        let mut count = 0;
        for row in reader.byte_records() {
            row.map_err(|e| self.unavailable(invalid_data(e)))?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    pub fn read_all(&self) -> Result<RecordBatch, StoreError> {
        self.scan(0, None)
    }

    /// Records at positions `start..=end`. Positions past the current end are
    /// simply not returned.
    pub fn read_range(&self, start: usize, end: usize) -> Result<RecordBatch, StoreError> {
        self.scan(start, Some(end))
    }

    /// Records from `start` to the current end of the log, read in one pass.
    pub fn read_from(&self, start: usize) -> Result<RecordBatch, StoreError> {
        self.scan(start, None)
    }

    fn scan(&self, start: usize, end: Option<usize>) -> Result<RecordBatch, StoreError> {
        let bytes = self.read_complete()?;
        let mut batch = RecordBatch {
            start,
            ..Default::default()
        };
        if bytes.is_empty() {
            return Ok(batch);
        }

        let mut reader = reader_for(&bytes);
        let header = reader
            .byte_headers()
            .map_err(|e| self.unavailable(invalid_data(e)))?
            .clone();
        batch.columns = header
            .iter()
            .map(|f| String::from_utf8_lossy(f).trim().to_string())
            .collect();
        let map = ColumnMap::from_header(batch.columns.iter().map(String::as_str));

        for (position, row) in reader.byte_records().enumerate() {
            let row = row.map_err(|e| self.unavailable(invalid_data(e)))?;
            batch.total = position + 1;
            if position >= start && end.map_or(true, |end| position <= end) {
                batch.records.push(decode_row(&row, &map));
            }
        }
        Ok(batch)
    }

    /// File contents up to and including the last newline.
    fn read_complete(&self) -> Result<Vec<u8>, StoreError> {
        let mut bytes = fs::read(&self.path).map_err(|e| self.unavailable(e))?;
        let cut = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
        bytes.truncate(cut);
        Ok(bytes)
    }

    fn unavailable(&self, source: io::Error) -> StoreError {
        StoreError::StoreUnavailable {
            path: self.path.clone(),
            source,
        }
    }
}

fn reader_for(bytes: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes)
}

fn invalid_data(e: csv::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

fn encode_record(record: &TelemetryRecord) -> io::Result<Vec<u8>> {
    encode_fields([
        record.timestamp.to_string(),
        record.client_id.clone(),
        record.topic.clone(),
        record.payload_size.to_string(),
        record.temp.map(|v| v.to_string()).unwrap_or_default(),
        record.humidity.map(|v| v.to_string()).unwrap_or_default(),
        record.message_rate.map(|v| v.to_string()).unwrap_or_default(),
    ])
}

fn encode_fields(fields: impl IntoIterator<Item = String>) -> io::Result<Vec<u8>> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::with_capacity(128));
    wtr.write_record(fields.into_iter()).map_err(invalid_data)?;
    wtr.into_inner().map_err(|e| e.into_error())
}

fn decode_row(row: &csv::ByteRecord, map: &ColumnMap) -> TelemetryRecord {
    let text = |idx: Option<usize>| -> Option<String> {
        idx.and_then(|i| row.get(i))
            .map(|f| String::from_utf8_lossy(f).trim().to_string())
            .filter(|s| !s.is_empty())
    };

    TelemetryRecord {
        timestamp: text(map.timestamp).and_then(|s| parse_int(&s)).unwrap_or(0),
        client_id: text(map.client_id).unwrap_or_else(|| UNKNOWN.to_string()),
        topic: text(map.topic).unwrap_or_else(|| UNKNOWN.to_string()),
        payload_size: text(map.payload_size)
            .and_then(|s| parse_int(&s))
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(0),
        temp: text(map.temp).and_then(|s| parse_float(&s)),
        humidity: text(map.humidity).and_then(|s| parse_float(&s)),
        message_rate: text(map.message_rate).and_then(|s| parse_int(&s)),
    }
}

fn parse_float(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_int(s: &str) -> Option<i64> {
    s.parse::<i64>()
        .ok()
        .or_else(|| parse_float(s).map(|v| v.trunc() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(client: &str, temp: f64, humidity: f64, rate: i64) -> TelemetryRecord {
        TelemetryRecord {
            timestamp: 1_700_000_000,
            client_id: client.to_string(),
            topic: format!("iot/{client}/telemetry"),
            payload_size: 64,
            temp: Some(temp),
            humidity: Some(humidity),
            message_rate: Some(rate),
        }
    }

    fn temp_store() -> (tempfile::TempDir, RecordStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("data").join("sensor_log.csv"));
        (dir, store)
    }

    #[test]
    fn test_create_writes_header_once() {
        let (_dir, store) = temp_store();
        assert!(store.create().unwrap());
        store.append(&record("a", 20.0, 50.0, 3)).unwrap();
        assert!(!store.create().unwrap());

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.starts_with("timestamp,client_id,topic,payload_size,temp,humidity,message_rate\n"));
        assert_eq!(content.matches("timestamp").count(), 1);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_read_range_returns_exact_positions() {
        let (_dir, store) = temp_store();
        store.create().unwrap();
        for i in 0..6 {
            store.append(&record(&format!("c{i}"), i as f64, 50.0, i)).unwrap();
        }

        let batch = store.read_range(2, 4).unwrap();
        assert_eq!(batch.start, 2);
        assert_eq!(batch.end(), Some(4));
        let clients: Vec<_> = batch.records.iter().map(|r| r.client_id.as_str()).collect();
        assert_eq!(clients, vec!["c2", "c3", "c4"]);

        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all.records[5].message_rate, Some(5));

        let tail = store.read_from(5).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail.records[0].client_id, "c5");

        assert!(store.read_range(4, 2).unwrap().is_empty());
        let past_end = store.read_from(6).unwrap();
        assert!(past_end.is_empty());
        assert_eq!(past_end.total, 6);
    }

    #[test]
    fn test_values_survive_the_log() {
        let (_dir, store) = temp_store();
        store.create().unwrap();
        let original = TelemetryRecord {
            client_id: "sensor, \"quoted\"".to_string(),
            ..record("x", 27.5, 55.0, 5)
        };
        store.append(&original).unwrap();

        let read = store.read_all().unwrap();
        assert_eq!(read.records, vec![original]);
        assert_eq!(read.columns, COLUMNS.to_vec());
    }

    #[test]
    fn test_torn_trailing_row_is_invisible() {
        let (_dir, store) = temp_store();
        store.create().unwrap();
        store.append(&record("a", 20.0, 50.0, 3)).unwrap();

        let mut file = OpenOptions::new().append(true).open(store.path()).unwrap();
        file.write_all(b"1700000001,half-written,iot/x,12,2").unwrap();

        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.read_all().unwrap().records[0].client_id, "a");
    }

    #[test]
    fn test_empty_and_unparsable_cells_read_as_missing() {
        let (_dir, store) = temp_store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            "timestamp,client_id,topic,payload_size,temp,humidity,message_rate\n\
             1700000000,,iot/a,10,21.5,,7\n\
             1700000001,b,iot/b,10,warm,40,nan\n",
        )
        .unwrap();

        let batch = store.read_all().unwrap();
        assert_eq!(batch.records[0].client_id, UNKNOWN);
        assert_eq!(batch.records[0].humidity, None);
        assert_eq!(batch.records[0].message_rate, Some(7));
        assert_eq!(batch.records[1].temp, None);
        assert_eq!(batch.records[1].message_rate, None);
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let (_dir, store) = temp_store();
        let err = store.len().unwrap_err();
        assert!(err.is_not_created());
    }

    #[test]
    fn test_append_recreates_deleted_log() {
        let (_dir, store) = temp_store();
        store.create().unwrap();
        fs::remove_file(store.path()).unwrap();

        store.append(&record("a", 20.0, 50.0, 3)).unwrap();
        let batch = store.read_all().unwrap();
        assert_eq!(batch.columns.len(), COLUMNS.len());
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_concurrent_append_and_read_never_see_partial_rows() {
        let (_dir, store) = temp_store();
        store.create().unwrap();
        let store = Arc::new(store);

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..300 {
                    store.append(&record(&format!("writer-{i}"), 25.0, 50.0, i)).unwrap();
                }
            })
        };

        let mut last_len = 0;
        while !writer.is_finished() {
            let batch = store.read_all().unwrap();
            assert!(batch.len() >= last_len);
            last_len = batch.len();
            for (i, r) in batch.records.iter().enumerate() {
                assert_eq!(r.client_id, format!("writer-{i}"));
                assert_eq!(r.message_rate, Some(i as i64));
                assert_eq!(r.humidity, Some(50.0));
            }
        }
        writer.join().unwrap();
        assert_eq!(store.len().unwrap(), 300);
    }
}
