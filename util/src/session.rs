//! Run sessions
//!
//! A session is one run of an executable. It owns a timestamped directory under the software root
//! holding the run's log and any records the run saves, and fixes the instant that log timestamps
//! are measured from.
//!
//! Records are serialised to JSON by a writer thread so that saving never blocks the caller.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use chrono::{DateTime, Utc};
use conquer_once::OnceCell;
use erased_serde::Serialize;
use log::{debug, warn};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        mpsc::{channel, Receiver, Sender},
        Mutex,
    },
    thread::{self, JoinHandle},
};
use thiserror::Error;

// Internal imports
use crate::time;

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

/// Instant the session was started.
static STARTED: OnceCell<DateTime<Utc>> = OnceCell::uninit();

/// Queue feeding the writer thread.
static WRITER_QUEUE: OnceCell<Mutex<Sender<Record>>> = OnceCell::uninit();

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Format of the timestamps in session directory and record names.
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The running session.
pub struct Session {
    /// Directory holding everything this session writes
    pub session_root: PathBuf,

    pub log_file_path: PathBuf,

    writer_jh: Option<JoinHandle<()>>,
}

/// Message to the writer thread.
enum Record {
    /// Write the value as JSON to the session relative path
    Json(PathBuf, Box<dyn Serialize + Send>),

    /// Everything queued has been written, stop
    Close,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("ASV_PLANNER_ROOT is not set, can't place the session directory")]
    RootNotSet,

    #[error("Couldn't create the session directory: {0}")]
    CreateDir(std::io::Error),

    #[error("A session has already been started in this process ({0})")]
    AlreadyStarted(conquer_once::TryInitError),

    #[error("Couldn't start the record writer thread: {0}")]
    SpawnWriter(std::io::Error),
}

#[derive(Error, Debug)]
enum WriteError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Session {
    /// Start the session, creating `$ASV_PLANNER_ROOT/{sessions_dir}/{exec_name}_{timestamp}`.
    ///
    /// Only one session may be started per process.
    pub fn new(exec_name: &str, sessions_dir: &str) -> Result<Self, SessionError> {
        let started = Utc::now();
        STARTED
            .try_init_once(|| started)
            .map_err(SessionError::AlreadyStarted)?;

        let session_root = crate::host::get_sw_root()
            .map_err(|_| SessionError::RootNotSet)?
            .join(sessions_dir)
            .join(format!("{}_{}", exec_name, started.format(STAMP_FORMAT)));
        fs::create_dir_all(&session_root).map_err(SessionError::CreateDir)?;

        let log_file_path = session_root.join(format!("{}.log", exec_name));

        let (tx, rx) = channel();
        WRITER_QUEUE.init_once(|| Mutex::new(tx));

        let root = session_root.clone();
        let writer_jh = thread::Builder::new()
            .name("session::writer".into())
            .spawn(move || write_records(&root, rx))
            .map_err(SessionError::SpawnWriter)?;

        Ok(Session {
            session_root,
            log_file_path,
            writer_jh: Some(writer_jh),
        })
    }

    /// Save a JSON record to a path relative to the session directory.
    pub fn save<P: AsRef<Path>, T: Serialize + Send + 'static>(&self, path: P, data: T) {
        save(path, data);
    }

    /// End the session once every queued record has been written.
    pub fn exit(mut self) {
        enqueue(Record::Close);

        if let Some(jh) = self.writer_jh.take() {
            if jh.join().is_err() {
                warn!("Session record writer panicked, some records may be missing");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Seconds since the session started, or zero before it has.
pub fn get_elapsed_seconds() -> f64 {
    STARTED
        .get()
        .map(|s| time::duration_to_seconds(Utc::now() - *s).unwrap_or(f64::NAN))
        .unwrap_or(0.0)
}

/// Save a JSON record to a path relative to the session directory.
///
/// Records saved before the session starts are dropped with a warning.
pub fn save<P: AsRef<Path>, T: Serialize + Send + 'static>(path: P, data: T) {
    enqueue(Record::Json(path.as_ref().to_path_buf(), Box::new(data)));
}

/// As [`save`], with the current time added to the file name so repeated saves don't overwrite
/// each other.
pub fn save_with_timestamp<P: AsRef<Path>, T: Serialize + Send + 'static>(path: P, data: T) {
    save(stamp_file_name(path.as_ref(), &Utc::now()), data);
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn enqueue(record: Record) {
    let queue = match WRITER_QUEUE.get() {
        Some(q) => q,
        None => {
            warn!("No session has been started, record dropped");
            return;
        }
    };

    match queue.lock() {
        Ok(tx) => {
            if tx.send(record).is_err() {
                warn!("Session record writer has stopped, record dropped");
            }
        }
        Err(_) => warn!("Session record queue lock is poisoned, record dropped"),
    }
}

/// `dir/name.ext` becomes `dir/name_{timestamp}.ext`.
fn stamp_file_name(path: &Path, time: &DateTime<Utc>) -> PathBuf {
    let mut name = path.file_stem().unwrap_or_default().to_os_string();
    name.push(format!("_{}", time.format(STAMP_FORMAT)));

    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }

    path.with_file_name(name)
}

/// Body of the writer thread. Records are written in the order they were saved.
fn write_records(root: &Path, queue: Receiver<Record>) {
    for record in queue.iter() {
        let (path, data) = match record {
            Record::Json(p, d) => (root.join(p), d),
            Record::Close => break,
        };

        match write_json(&path, &*data) {
            Ok(()) => debug!("Saved {:?}", path),
            Err(e) => warn!("Couldn't save {:?}: {}", path, e),
        }
    }
}

fn write_json(path: &Path, data: &dyn Serialize) -> Result<(), WriteError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let file = fs::File::create(path)?;
    serde_json::to_writer_pretty(file, data)?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stamp_file_name() {
        let time = Utc.ymd(2021, 3, 4).and_hms(5, 6, 7);

        assert_eq!(
            stamp_file_name(Path::new("stats/task.json"), &time),
            PathBuf::from("stats/task_20210304_050607.json")
        );
        assert_eq!(
            stamp_file_name(Path::new("report"), &time),
            PathBuf::from("report_20210304_050607")
        );
    }

    #[test]
    fn test_write_json_creates_parents() {
        let dir = std::env::temp_dir().join("util_session_write_json_test");
        let path = dir.join("nested").join("record.json");

        write_json(&path, &vec![1, 2, 3]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let read: Vec<i32> = serde_json::from_str(&text).unwrap();
        assert_eq!(read, vec![1, 2, 3]);

        fs::remove_dir_all(&dir).ok();
    }
}
