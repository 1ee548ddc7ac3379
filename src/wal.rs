use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Records larger than this are treated as a corrupt length prefix.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Frame one event as `[u32 len][bincode payload][u32 crc32]`, little endian.
fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// `Ok(None)` at a clean end of file or at the first damaged record.
fn read_record(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut word = [0u8; 4];
    if !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    if !read_or_eof(reader, &mut payload)? || !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload).ok())
}

fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only write-ahead log of reservation events.
///
/// A crash can leave a torn last record; the length prefix and CRC let
/// replay stop cleanly in front of it.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(open_append(path)?),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append and fsync one event. Tests only; the engine batches through
    /// `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the compacted event list next to the WAL and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            write_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the WAL and continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        self.writer = BufWriter::new(open_append(&self.path)?);
        self.appends_since_compact = 0;
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

    /// Every intact event in the log, oldest first. A missing file is an
    /// empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(event) = read_record(&mut reader)? {
            events.push(event);
        }
        Ok(events)
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PaymentMethod, Stay};
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("lodge_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn cabin_created(id: Ulid) -> Event {
        Event::CabinCreated {
            id,
            name: "Pine".into(),
            capacity: 4,
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let cabin_id = Ulid::new();
        let guest_id = Ulid::new();
        let reservation_id = Ulid::new();
        let events = vec![
            cabin_created(cabin_id),
            Event::GuestCreated {
                id: guest_id,
                name: "Ada".into(),
                document: "X-1".into(),
                phone: None,
            },
            Event::ReservationAdmitted {
                id: reservation_id,
                guest_id,
                cabin_id,
                stay: Stay::new(d("2024-07-01"), d("2024-07-05")),
            },
            Event::PaymentRecorded {
                id: Ulid::new(),
                reservation_id,
                amount: 15_050,
                method: PaymentMethod::Card,
                recorded_on: d("2024-07-01"),
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = tmp_path("torn_tail.wal");
        let event = cabin_created(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn bad_crc_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let good = cabin_created(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&Event::CabinDeleted { id: Ulid::new() }).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn absurd_length_prefix_stops_replay() {
        let path = tmp_path("absurd_len.wal");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0u8; 16]).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compaction_shrinks_log_and_keeps_appending() {
        let path = tmp_path("compact.wal");
        let cabin_id = Ulid::new();
        let guest_id = Ulid::new();
        let stay = Stay::new(d("2024-07-01"), d("2024-07-03"));

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&cabin_created(cabin_id)).unwrap();
        for _ in 0..20 {
            let id = Ulid::new();
            wal.append(&Event::ReservationAdmitted {
                id,
                guest_id,
                cabin_id,
                stay,
            })
            .unwrap();
            wal.append(&Event::ReservationDeleted {
                id,
                guest_id,
                cabin_id,
                payment_ids: vec![],
            })
            .unwrap();
        }
        assert_eq!(wal.appends_since_compact(), 41);
        let before = fs::metadata(&path).unwrap().len();

        wal.compact(&[cabin_created(cabin_id)]).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "{after} should be below {before}");

        let later = Event::CabinDeleted { id: cabin_id };
        wal.append(&later).unwrap();
        drop(wal);

        assert_eq!(Wal::replay(&path).unwrap(), vec![cabin_created(cabin_id), later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_are_durable_after_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (0..5).map(|_| cabin_created(Ulid::new())).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }
}
