use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::model::Event;

/// Upper bound on a single record payload. A larger length prefix can only
/// come from a torn or corrupt write.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Encode a single event to [len][bincode][crc32] format.
/// Returns the number of bytes written.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(payload.len() as u64 + 8)
}

/// Read exactly `buf.len()` bytes; `Ok(false)` on a clean or torn EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Storage under the log: an append-mode byte sink that can be synced and
/// cut back to a known length.
pub trait LogFile: Write + Sized {
    fn sync(&self) -> io::Result<()>;
    fn truncate(&self, len: u64) -> io::Result<()>;
    /// A second handle onto the same storage.
    fn try_clone(&self) -> io::Result<Self>;
}

impl LogFile for File {
    fn sync(&self) -> io::Result<()> {
        self.sync_all()
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn try_clone(&self) -> io::Result<Self> {
        File::try_clone(self)
    }
}

/// Result of scanning a WAL file.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte offset just past the last valid record.
    pub valid_len: u64,
    /// Bytes after `valid_len` that did not decode.
    pub discarded: u64,
}

/// Append-only Write-Ahead Log of engine events.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - Appends go in batches. A batch that fails to write or sync is cut back
///   off the file, so a torn record never sits ahead of a later one.
/// - A torn or corrupt tail (crash mid-write) stops replay and is cut off by
///   [`Wal::recover`] so later appends stay reachable.
pub struct Wal<F: LogFile = File> {
    writer: BufWriter<F>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length covered by the last successful sync.
    durable_len: u64,
    /// Set when a failed batch could not be cut back; refuses further appends.
    broken: bool,
}

impl Wal<File> {
    /// Replay the log at `path`, drop any invalid tail, and open it for appending.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let replay = Self::replay(path)?;
        if replay.discarded > 0 {
            warn!(
                path = %path.display(),
                discarded = replay.discarded,
                "truncating invalid WAL tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let wal = Self::open(path)?;
        Ok((wal, replay.events))
    }

    /// Open (or create) the WAL file at `path` without replaying it.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self::with_file(file, path.to_path_buf(), len))
    }

    /// Replace the log with `events` via temp file + fsync + rename, then reopen.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let mut written = 0;
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                written += encode_event(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.durable_len = written;
        self.broken = false;
        Ok(())
    }

    /// Scan the log, returning every valid event in order.
    /// A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let total_len = file.metadata()?.len();
        scan(BufReader::new(file), total_len)
    }
}

impl<F: LogFile> Wal<F> {
    fn with_file(file: F, path: PathBuf, len: u64) -> Self {
        Self {
            writer: BufWriter::new(file),
            path,
            appends_since_compact: 0,
            durable_len: len,
            broken: false,
        }
    }

    /// Write `events` and fsync once. All or nothing: on failure the file is
    /// cut back to where the batch began.
    pub fn append_batch(&mut self, events: &[Event]) -> io::Result<()> {
        if self.broken {
            return Err(io::Error::other("WAL unusable after a failed rollback"));
        }
        match self.write_batch(events) {
            Ok(written) => {
                self.durable_len += written;
                self.appends_since_compact += events.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.rollback() {
                    error!(error = %rollback, "WAL rollback failed, refusing further appends");
                    self.broken = true;
                }
                Err(e)
            }
        }
    }

    /// Append one event as its own batch. Tests only.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_batch(std::slice::from_ref(event))
    }

    fn write_batch(&mut self, events: &[Event]) -> io::Result<u64> {
        let mut written = 0;
        for event in events {
            written += encode_event(&mut self.writer, event)?;
        }
        self.writer.flush()?;
        self.writer.get_ref().sync()?;
        Ok(written)
    }

    /// Drop buffered bytes and truncate the file to the last synced length.
    fn rollback(&mut self) -> io::Result<()> {
        let handle = self.writer.get_ref().try_clone()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(handle));
        // into_parts hands back the buffer instead of flushing it on drop.
        let (file, _unwritten) = stale.into_parts();
        file.truncate(self.durable_len)?;
        file.sync()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}

/// Read records from `reader` until the first torn or corrupt one.
fn scan(mut reader: impl Read, total_len: u64) -> io::Result<Replay> {
    let mut replay = Replay::default();
    loop {
        let mut len_buf = [0u8; 4];
        if !read_full(&mut reader, &mut len_buf)? {
            break;
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_RECORD_LEN {
            break;
        }

        let mut payload = vec![0u8; len];
        if !read_full(&mut reader, &mut payload)? {
            break;
        }

        let mut crc_buf = [0u8; 4];
        if !read_full(&mut reader, &mut crc_buf)? {
            break;
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            break;
        }

        match bincode::deserialize::<Event>(&payload) {
            Ok(event) => replay.events.push(event),
            Err(_) => break,
        }
        replay.valid_len += (len + 8) as u64;
    }

    replay.discarded = total_len - replay.valid_len;
    Ok(replay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Reservation, Room};
    use chrono::NaiveDate;
    use std::sync::{Arc, Mutex};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn room(name: &str) -> Room {
        let t = NaiveDate::from_ymd_opt(2030, 1, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        Room {
            id: Ulid::new(),
            name: name.into(),
            description: Some("second floor".into()),
            is_active: true,
            created_at: t,
            updated_at: t,
        }
    }

    fn reservation(room_id: Ulid) -> Reservation {
        let t = NaiveDate::from_ymd_opt(2030, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        Reservation {
            id: Ulid::new(),
            room_id,
            reserved_by: "Jan".into(),
            reserved_by_email: Some("jan@example.com".into()),
            start_date_time: t,
            end_date_time: t + chrono::Duration::hours(2),
            created_at: t,
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let r = room("A");
        let events = vec![
            Event::RoomCreated { room: r.clone() },
            Event::ReservationCreated {
                reservation: reservation(r.id),
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, events);
        assert_eq!(replay.discarded, 0);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        let replay = Wal::replay(&path).unwrap();
        assert!(replay.events.is_empty());
        assert_eq!(replay.valid_len, 0);
    }

    #[test]
    fn replay_stops_at_truncated_entry() {
        let path = tmp_path("truncation.wal");
        let event = Event::RoomCreated { room: room("A") };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap(); // partial length + some bytes
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![event]);
        assert_eq!(replay.discarded, 6);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_rejects_bad_crc() {
        let path = tmp_path("corrupt_crc.wal");
        {
            let payload = bincode::serialize(&Event::RoomDeleted { id: Ulid::new() }).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert!(replay.events.is_empty());
        assert!(replay.discarded > 0);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_rejects_absurd_length() {
        let path = tmp_path("absurd_len.wal");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[1, 2, 3]).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert!(replay.events.is_empty());
        assert_eq!(replay.discarded, 7);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn recover_truncates_tail_so_new_appends_replay() {
        let path = tmp_path("recover_tail.wal");
        let first = Event::RoomCreated { room: room("A") };
        let second = Event::RoomCreated { room: room("B") };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8; 5]).unwrap();
        }

        {
            let (mut wal, events) = Wal::recover(&path).unwrap();
            assert_eq!(events, vec![first.clone()]);
            wal.append(&second).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![first, second]);
        assert_eq!(replay.discarded, 0);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_replaces_history() {
        let path = tmp_path("compact.wal");
        let r = room("A");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&Event::RoomCreated { room: r.clone() }).unwrap();
            for _ in 0..10 {
                let res = reservation(r.id);
                wal.append(&Event::ReservationCreated {
                    reservation: res.clone(),
                })
                .unwrap();
                wal.append(&Event::ReservationDeleted {
                    id: res.id,
                    room_id: r.id,
                })
                .unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let compacted = vec![Event::RoomCreated { room: r.clone() }];
        let late = Event::RoomDeleted { id: r.id };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&compacted).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&late).unwrap();
            assert_eq!(wal.appends_since_compact(), 1);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![compacted[0].clone(), late]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn batch_is_one_unit() {
        let path = tmp_path("batch.wal");
        let events: Vec<Event> = (0..5)
            .map(|i| Event::RoomCreated {
                room: room(&format!("Room {i}")),
            })
            .collect();

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append_batch(&events).unwrap();
            assert_eq!(wal.appends_since_compact(), 5);
            assert_eq!(wal.durable_len, fs::metadata(&path).unwrap().len());
        }

        assert_eq!(Wal::replay(&path).unwrap().events, events);

        let _ = fs::remove_file(&path);
    }

    /// In-memory log storage that accepts `budget` more bytes, then fails.
    #[derive(Clone, Default)]
    struct FlakyDisk {
        bytes: Arc<Mutex<Vec<u8>>>,
        budget: Arc<Mutex<Option<usize>>>,
    }

    impl FlakyDisk {
        fn fail_after(&self, bytes: usize) {
            *self.budget.lock().unwrap() = Some(bytes);
        }

        fn heal(&self) {
            *self.budget.lock().unwrap() = None;
        }

        fn contents(&self) -> Vec<u8> {
            self.bytes.lock().unwrap().clone()
        }
    }

    impl Write for FlakyDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut budget = self.budget.lock().unwrap();
            let n = match *budget {
                Some(0) => return Err(io::Error::other("no space left on device")),
                Some(left) => left.min(buf.len()),
                None => buf.len(),
            };
            if let Some(left) = budget.as_mut() {
                *left -= n;
            }
            self.bytes.lock().unwrap().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogFile for FlakyDisk {
        fn sync(&self) -> io::Result<()> {
            Ok(())
        }

        fn truncate(&self, len: u64) -> io::Result<()> {
            self.bytes.lock().unwrap().truncate(len as usize);
            Ok(())
        }

        fn try_clone(&self) -> io::Result<Self> {
            Ok(self.clone())
        }
    }

    fn replay_disk(disk: &FlakyDisk) -> Replay {
        let bytes = disk.contents();
        scan(&bytes[..], bytes.len() as u64).unwrap()
    }

    #[test]
    fn failed_batch_leaves_no_torn_bytes() {
        let disk = FlakyDisk::default();
        let mut wal = Wal::with_file(disk.clone(), PathBuf::from("flaky.wal"), 0);

        let first = Event::RoomCreated { room: room("A") };
        wal.append(&first).unwrap();
        let committed = disk.contents().len();

        // the second record of this batch is cut off mid-payload
        let a = room("B");
        let doomed = vec![
            Event::RoomCreated { room: a.clone() },
            Event::ReservationCreated {
                reservation: reservation(a.id),
            },
        ];
        let first_len = bincode::serialize(&doomed[0]).unwrap().len() + 8;
        disk.fail_after(first_len + 7);
        assert!(wal.append_batch(&doomed).is_err());
        assert_eq!(disk.contents().len(), committed);
        assert_eq!(wal.appends_since_compact(), 1);

        disk.heal();
        let acked = Event::RoomCreated { room: room("C") };
        wal.append(&acked).unwrap();

        let replay = replay_disk(&disk);
        assert_eq!(replay.events, vec![first, acked]);
        assert_eq!(replay.discarded, 0);
    }

    #[test]
    fn failed_rollback_refuses_appends() {
        #[derive(Clone, Default)]
        struct NoClone(FlakyDisk);

        impl Write for NoClone {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        impl LogFile for NoClone {
            fn sync(&self) -> io::Result<()> {
                Ok(())
            }
            fn truncate(&self, len: u64) -> io::Result<()> {
                self.0.truncate(len)
            }
            fn try_clone(&self) -> io::Result<Self> {
                Err(io::Error::other("descriptor limit reached"))
            }
        }

        let disk = NoClone::default();
        let mut wal = Wal::with_file(disk.clone(), PathBuf::from("noclone.wal"), 0);
        disk.0.fail_after(3);
        assert!(wal.append(&Event::RoomDeleted { id: Ulid::new() }).is_err());

        disk.0.heal();
        assert!(wal.append(&Event::RoomDeleted { id: Ulid::new() }).is_err());
        assert!(replay_disk(&disk.0).events.is_empty());
    }
}
