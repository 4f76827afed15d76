use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Bytes of framing around each payload: length prefix plus checksum.
const FRAME_OVERHEAD: u64 = 8;

/// Largest payload replay will allocate for. Anything bigger is a torn or
/// corrupt length prefix.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Frame and write one record, returning its size on disk.
fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    // Replay would read an oversized record as a torn tail.
    if payload.len() > MAX_RECORD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("WAL record of {} bytes exceeds {MAX_RECORD_LEN}", payload.len()),
        ));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(payload.len() as u64 + FRAME_OVERHEAD)
}

enum Record {
    Event(Event, u64),
    /// Clean end of file.
    End,
    /// Partial or corrupt record; everything from here on is discarded.
    Torn,
}

/// Fill `buf` completely, or report how far the file got.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_record(reader: &mut impl Read) -> io::Result<Record> {
    let mut len_buf = [0u8; 4];
    match read_full(reader, &mut len_buf)? {
        0 => return Ok(Record::End),
        4 => {}
        _ => return Ok(Record::Torn),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(Record::Torn);
    }

    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    if read_full(reader, &mut payload)? < len || read_full(reader, &mut crc_buf)? < 4 {
        return Ok(Record::Torn);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Record::Torn);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Record::Event(event, len as u64 + FRAME_OVERHEAD)),
        Err(_) => Ok(Record::Torn),
    }
}

/// Append-only event log backing the ledger and catalog.
///
/// Each record is `[u32 len][bincode Event][u32 crc32]`, little-endian.
/// A crash mid-write leaves a torn tail, which replay drops and `open`
/// truncates so new records never land behind garbage.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length and append count as of the last successful `flush_sync`.
    durable_len: u64,
    durable_appends: u64,
    /// Bytes buffered or written since then.
    pending_len: u64,
    /// Set when a failed batch could not be cut back off the file.
    poisoned: bool,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).read(true).append(true).open(path)?;
        let valid = Self::scan(path)?.1;
        if file.metadata()?.len() > valid {
            warn!("truncating torn WAL tail of {} at byte {valid}", path.display());
            file.set_len(valid)?;
            file.sync_all()?;
        }
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            durable_len: valid,
            durable_appends: 0,
            pending_len: 0,
            poisoned: false,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one record. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL has an unrecoverable tail; restart to repair"));
        }
        self.pending_len += write_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len += self.pending_len;
        self.pending_len = 0;
        self.durable_appends = self.appends_since_compact;
        Ok(())
    }

    /// Drop every record since the last successful `flush_sync`, whether
    /// still buffered or already partly on disk. If the file cannot be cut
    /// back, the log refuses further appends until it is reopened.
    pub fn rollback(&mut self) -> io::Result<()> {
        let reopened = OpenOptions::new().append(true).open(&self.path).and_then(|file| {
            file.set_len(self.durable_len)?;
            file.sync_all()?;
            Ok(file)
        });
        match reopened {
            Ok(file) => {
                // into_parts hands back the unwritten buffer instead of
                // flushing it on drop.
                let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
                let _ = stale.into_parts();
                self.pending_len = 0;
                self.appends_since_compact = self.durable_appends;
                Ok(())
            }
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.compact")
    }

    /// Write a snapshot to the side file and fsync it. The live log is untouched.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            write_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the live log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.durable_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.durable_appends = 0;
        self.pending_len = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every intact event in the log, in write order. A missing file is an
    /// empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::scan(path)?.0)
    }

    /// Decode records up to the first torn one, returning them with the byte
    /// length of the intact prefix.
    fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid = 0u64;
        loop {
            match read_record(&mut reader)? {
                Record::Event(event, size) => {
                    events.push(event);
                    valid += size;
                }
                Record::End => break,
                Record::Torn => {
                    warn!("WAL {} has a torn record after {} events", path.display(), events.len());
                    break;
                }
            }
        }
        Ok((events, valid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, ResourceKey, ResourceType};

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vacancy_test_wal_{}", ulid::Ulid::new()));
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn registered(id: &str, capacity: u32) -> Event {
        Event::ResourceRegistered {
            key: ResourceKey::new(id, ResourceType::Room),
            name: Some(format!("Room {id}")),
            capacity,
            category: Category::Room {
                property_id: "P1".into(),
                room_type: "double".into(),
            },
        }
    }

    fn resized(id: &str, capacity: u32) -> Event {
        Event::ResourceUpdated {
            key: ResourceKey::new(id, ResourceType::Room),
            name: None,
            capacity,
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![registered("R1", 2), resized("R1", 3)];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn missing_file_is_empty_log() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn torn_tail_is_dropped_and_truncated() {
        let path = tmp_path("torn.wal");
        let first = registered("R1", 1);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        let intact = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first.clone()]);

        // Reopening cuts the garbage so the next record is readable.
        let second = resized("R1", 4);
        {
            let mut wal = Wal::open(&path).unwrap();
            assert_eq!(fs::metadata(&path).unwrap().len(), intact);
            wal.append(&second).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let payload = bincode::serialize(&registered("R1", 1)).unwrap();
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn absurd_length_prefix_is_torn() {
        let path = tmp_path("huge_len.wal");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0u8; 16]).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn compaction_shrinks_and_accepts_appends() {
        let path = tmp_path("compact.wal");
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&registered("R1", 1)).unwrap();
        for capacity in 2..40 {
            wal.append(&resized("R1", capacity)).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        let snapshot = vec![registered("R1", 39)];
        wal.compact(&snapshot).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");

        let next = resized("R1", 40);
        wal.append(&next).unwrap();
        drop(wal);
        assert_eq!(Wal::replay(&path).unwrap(), vec![snapshot[0].clone(), next]);
    }

    #[test]
    fn buffered_appends_count_and_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (1..=5).map(|c| resized("R1", c)).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    fn oversized() -> Event {
        Event::ResourceRegistered {
            key: ResourceKey::new("R-huge", ResourceType::Room),
            name: Some("x".repeat(MAX_RECORD_LEN + 1)),
            capacity: 1,
            category: Category::General,
        }
    }

    #[test]
    fn oversized_record_is_refused() {
        let path = tmp_path("oversized.wal");
        let mut wal = Wal::open(&path).unwrap();
        let err = wal.append_buffered(&oversized()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(wal.appends_since_compact(), 0);
    }

    #[test]
    fn rollback_discards_the_unflushed_batch() {
        let path = tmp_path("rollback.wal");
        let first = registered("R1", 1);
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&first).unwrap();
        let durable = fs::metadata(&path).unwrap().len();

        // Half a batch lands in the buffer, then one record fails.
        wal.append_buffered(&resized("R1", 2)).unwrap();
        wal.append_buffered(&resized("R1", 3)).unwrap();
        assert!(wal.append_buffered(&oversized()).is_err());
        wal.rollback().unwrap();
        assert_eq!(wal.appends_since_compact(), 1);

        // The dropped records must not reach disk later either.
        let next = resized("R1", 4);
        wal.append(&next).unwrap();
        drop(wal);
        assert!(fs::metadata(&path).unwrap().len() > durable);
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, next]);
    }

    #[test]
    fn rollback_cuts_records_already_written() {
        let path = tmp_path("rollback_written.wal");
        let first = registered("R1", 1);
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&first).unwrap();

        // Flushed to the file but never acknowledged by a successful sync.
        wal.append_buffered(&resized("R1", 2)).unwrap();
        wal.writer.flush().unwrap();
        assert_eq!(Wal::replay(&path).unwrap().len(), 2);

        wal.rollback().unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![first]);
    }
}
