//! Filesystem-backed engine.
//!
//! Databases are plain files named `<name>.db` under a data directory, with an
//! optional `<name>.log` transaction log next to them. A backup artifact is a
//! single-line JSON [`ArtifactHeader`] followed by the raw database bytes.
//! Relative backup devices resolve against the engine's backup directory.
//!
//! All file work runs on the blocking pool; the session only keeps the join
//! handle and a stop flag checked between chunks.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{Span, debug};

use super::{BackupEngine, EngineEventSink, EngineSession};
use crate::error::EngineError;
use crate::request::{BackupRequest, OperationRequest, RestoreRequest};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
const ARTIFACT_FORMAT: &str = "dbvault-backup";
const ARTIFACT_VERSION: u32 = 1;

/// Kind of backup set stored in an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Complete copy of the database.
    Full,
    /// Changes since the last full backup.
    Differential,
}

/// Metadata line written at the start of every artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Format marker.
    pub format: String,
    /// Format version.
    pub version: u32,
    /// Database the backup was taken from.
    pub database: String,
    /// Backup set kind.
    pub kind: ArtifactKind,
    /// Backup set name.
    pub backup_set_name: String,
    /// Backup set description.
    pub description: String,
    /// Time the backup was taken.
    pub created_at: DateTime<Utc>,
    /// Point in time after which the backup set may be overwritten.
    pub expires_at: Option<DateTime<Utc>>,
    /// Payload length in bytes.
    pub length: u64,
    /// Hex-encoded SHA-256 of the payload.
    pub sha256: String,
}

/// Read the header of an existing artifact.
///
/// # Errors
///
/// Returns [`EngineError::DeviceUnavailable`] when the file cannot be opened
/// and [`EngineError::ArtifactFormat`] when the header is missing or invalid.
pub fn read_artifact_header(path: &Path) -> std::result::Result<ArtifactHeader, EngineError> {
    open_artifact(path).map(|(header, _)| header)
}

/// Engine that keeps databases and backup sets on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileEngine {
    data_dir: PathBuf,
    backup_dir: PathBuf,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
}

impl FileEngine {
    /// Engine over `data_dir`, resolving relative devices against `backup_dir`.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            backup_dir: backup_dir.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: None,
        }
    }

    /// Override the copy buffer size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sleep between chunks, throttling the copy loop.
    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Directory holding database files.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory relative devices resolve against.
    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Path of the data file for `database`.
    #[must_use]
    pub fn database_path(&self, database: &str) -> PathBuf {
        self.data_dir.join(format!("{database}.db"))
    }

    /// Path of the transaction log for `database`.
    #[must_use]
    pub fn log_path(&self, database: &str) -> PathBuf {
        self.data_dir.join(format!("{database}.log"))
    }

    /// Marker present while `database` is left in the restoring state.
    #[must_use]
    pub fn restoring_marker(&self, database: &str) -> PathBuf {
        self.data_dir.join(format!("{database}.restoring"))
    }

    /// Resolve a device name to a filesystem path.
    #[must_use]
    pub fn resolve_device(&self, device: &str) -> PathBuf {
        let path = Path::new(device);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.backup_dir.join(path)
        }
    }
}

#[async_trait]
impl BackupEngine for FileEngine {
    async fn open_session(&self) -> Result<Box<dyn EngineSession>> {
        let metadata = tokio::fs::metadata(&self.data_dir)
            .await
            .with_context(|| format!("data directory {} is not accessible", self.data_dir.display()))?;
        if !metadata.is_dir() {
            bail!("data directory {} is not a directory", self.data_dir.display());
        }
        Ok(Box::new(FileSession {
            engine: self.clone(),
            job: None,
            released: false,
        }))
    }
}

struct Job {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct FileSession {
    engine: FileEngine,
    job: Option<Job>,
    released: bool,
}

#[async_trait]
impl EngineSession for FileSession {
    async fn submit(&mut self, request: OperationRequest, events: EngineEventSink) -> Result<()> {
        if self.released {
            bail!("engine session already released");
        }
        if let Some(job) = &self.job
            && !job.handle.is_finished()
        {
            bail!("an operation is already running on this session");
        }
        validate_database_name(request.database())?;

        let stop = Arc::new(AtomicBool::new(false));
        let transfer = Transfer {
            engine: self.engine.clone(),
            request,
            events,
            stop: Arc::clone(&stop),
        };
        let span = Span::current();
        let handle = tokio::task::spawn_blocking(move || span.in_scope(|| transfer.run()));
        self.job = Some(Job { stop, handle });
        Ok(())
    }

    async fn abort(&mut self) -> Result<bool> {
        let Some(job) = self.job.take() else {
            return Ok(true);
        };
        job.stop.store(true, Ordering::SeqCst);
        job.handle
            .await
            .map_err(|err| anyhow!("engine worker failed while stopping: {err}"))?;
        Ok(true)
    }

    async fn release(&mut self) -> Result<()> {
        if self.released {
            bail!("engine session already released");
        }
        self.released = true;
        if let Some(job) = self.job.take() {
            if !job.handle.is_finished() {
                debug!("waiting for engine worker before releasing session");
            }
            job.handle
                .await
                .map_err(|err| anyhow!("engine worker failed: {err}"))?;
        }
        Ok(())
    }
}

fn validate_database_name(database: &str) -> Result<()> {
    if database.is_empty()
        || database.starts_with('.')
        || database.contains(['/', '\\'])
    {
        bail!("invalid database name '{database}'");
    }
    Ok(())
}

struct Transfer {
    engine: FileEngine,
    request: OperationRequest,
    events: EngineEventSink,
    stop: Arc<AtomicBool>,
}

impl Transfer {
    fn run(self) {
        let result = match &self.request {
            OperationRequest::Backup(request) => self.backup(request),
            OperationRequest::Restore(request) => self.restore(request),
        };
        match result {
            Ok(()) => {
                self.events.completed(None);
            }
            Err(err) => {
                debug!(error = %err, "engine operation failed");
                self.events.completed(Some(Box::new(err)));
            }
        }
    }

    fn backup(&self, request: &BackupRequest) -> std::result::Result<(), EngineError> {
        let database = &request.database;
        let source_path = self.engine.database_path(database);
        let mut source = match File::open(&source_path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(EngineError::DatabaseMissing {
                    database: database.clone(),
                });
            }
            Err(err) => return Err(EngineError::io("open_database", &source_path, err)),
        };

        let (length, sha256) = digest(&mut source, &source_path)?;
        drop(source);

        let device = self.engine.resolve_device(&request.device);
        let mut writer = match File::create(&device) {
            Ok(file) => file,
            Err(err) => return Err(self.device_unavailable(device, err)),
        };

        let header = ArtifactHeader {
            format: ARTIFACT_FORMAT.to_string(),
            version: ARTIFACT_VERSION,
            database: database.clone(),
            kind: if request.incremental {
                ArtifactKind::Differential
            } else {
                ArtifactKind::Full
            },
            backup_set_name: request.backup_set_name.clone(),
            description: request.description.clone(),
            created_at: Utc::now(),
            expires_at: request.expiration,
            length,
            sha256,
        };

        let written = write_header(&mut writer, &header, &device).and_then(|()| {
            let mut source = File::open(&source_path)
                .map_err(|err| EngineError::io("open_database", &source_path, err))?;
            let mut hasher = Sha256::new();
            let copied = self.copy_payload(
                &mut source,
                &mut writer,
                length,
                request.percent_notification,
                &mut hasher,
            )?;
            confirm_snapshot(&header, copied, hasher)?;
            writer
                .sync_all()
                .map_err(|err| EngineError::io("flush_device", &device, err))?;
            Ok(copied)
        });
        let copied = match written {
            Ok(copied) => copied,
            Err(err) => {
                drop(writer);
                discard(&device);
                return Err(err);
            }
        };

        self.events.informational(format!(
            "Processed {copied} bytes for database '{database}', file '{database}' on file 1."
        ));
        if request.truncate_log {
            self.truncate_log(database)?;
        }
        let statement = if request.incremental {
            "BACKUP DATABASE WITH DIFFERENTIAL"
        } else {
            "BACKUP DATABASE"
        };
        self.events
            .informational(format!("{statement} successfully processed {copied} bytes."));
        Ok(())
    }

    fn restore(&self, request: &RestoreRequest) -> std::result::Result<(), EngineError> {
        let database = &request.database;
        let device = self.engine.resolve_device(&request.device);
        let (header, mut reader) = match open_artifact(&device) {
            Ok(opened) => opened,
            Err(EngineError::DeviceUnavailable { path, source }) => {
                return Err(self.device_unavailable(path, source));
            }
            Err(err) => return Err(err),
        };

        let target = self.engine.database_path(database);
        let marker = self.engine.restoring_marker(database);
        let restoring = marker.exists();
        match header.kind {
            ArtifactKind::Differential if !restoring => {
                return Err(EngineError::NotRestoring {
                    database: database.clone(),
                });
            }
            ArtifactKind::Full if target.exists() && !request.replace && !restoring => {
                return Err(EngineError::DatabaseExists {
                    database: database.clone(),
                });
            }
            _ => {}
        }

        let staging = target.with_extension("db.partial");
        let mut writer =
            File::create(&staging).map_err(|err| EngineError::io("create_staging", &staging, err))?;
        let mut hasher = Sha256::new();
        let copied = match self.copy_payload(
            &mut (&mut reader).take(header.length),
            &mut writer,
            header.length,
            request.percent_notification,
            &mut hasher,
        ) {
            Ok(copied) => copied,
            Err(err) => {
                drop(writer);
                discard(&staging);
                return Err(err);
            }
        };

        if copied != header.length || hex::encode(hasher.finalize()) != header.sha256 {
            if !request.continue_after_error {
                drop(writer);
                discard(&staging);
                return Err(EngineError::ChecksumMismatch { path: device });
            }
            self.events.informational(format!(
                "RESTORE detected a checksum mismatch on backup device '{}'.",
                device.display()
            ));
            self.events.informational(
                "RESTORE WITH CONTINUE_AFTER_ERROR was successful but some damage was encountered. \
                 Inconsistencies in the database are possible.",
            );
        }

        writer
            .sync_all()
            .map_err(|err| EngineError::io("flush_staging", &staging, err))?;
        drop(writer);
        fs::rename(&staging, &target)
            .map_err(|err| EngineError::io("install_database", &target, err))?;

        if request.no_recovery {
            File::create(&marker).map_err(|err| EngineError::io("mark_restoring", &marker, err))?;
        } else if restoring {
            fs::remove_file(&marker)
                .map_err(|err| EngineError::io("clear_restoring", &marker, err))?;
        }

        self.events.informational(format!(
            "Processed {copied} bytes for database '{database}', file '{database}' on file 1."
        ));
        if request.no_recovery {
            self.events.informational(format!(
                "RESTORE DATABASE successfully processed {copied} bytes. \
                 The database is left in the restoring state."
            ));
        } else {
            self.events
                .informational(format!("RESTORE DATABASE successfully processed {copied} bytes."));
        }
        Ok(())
    }

    fn copy_payload(
        &self,
        reader: &mut impl Read,
        writer: &mut impl Write,
        total: u64,
        step: u8,
        hasher: &mut Sha256,
    ) -> std::result::Result<u64, EngineError> {
        let mut meter = ProgressMeter::new(total, step);
        let mut buffer = vec![0_u8; self.engine.chunk_size];
        let mut copied = 0_u64;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Err(EngineError::Aborted { operation: "copy" });
            }
            let read = reader
                .read(&mut buffer)
                .map_err(|err| EngineError::io("read_payload", self.engine.data_dir(), err))?;
            if read == 0 {
                break;
            }
            let chunk = &buffer[..read];
            hasher.update(chunk);
            writer
                .write_all(chunk)
                .map_err(|err| EngineError::io("write_payload", self.engine.data_dir(), err))?;
            copied += read as u64;
            meter.advance(copied, &self.events);
            if let Some(delay) = self.engine.chunk_delay {
                std::thread::sleep(delay);
            }
        }
        meter.finish(&self.events);
        Ok(copied)
    }

    fn truncate_log(&self, database: &str) -> std::result::Result<(), EngineError> {
        let log = self.engine.log_path(database);
        match OpenOptions::new().write(true).open(&log) {
            Ok(file) => {
                file.set_len(0)
                    .map_err(|err| EngineError::io("truncate_log", &log, err))?;
                debug!(path = %log.display(), "transaction log truncated");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(EngineError::io("truncate_log", &log, err)),
        }
    }

    fn device_unavailable(&self, path: PathBuf, source: io::Error) -> EngineError {
        self.events.informational(format!(
            "Cannot open backup device '{}'. Operating system error {}({source}).",
            path.display(),
            source.raw_os_error().unwrap_or_default(),
        ));
        self.events.informational(format!(
            "{} is terminating abnormally.",
            self.request.action()
        ));
        EngineError::DeviceUnavailable { path, source }
    }
}

/// Emits progress each time the completed share crosses a multiple of `step`.
struct ProgressMeter {
    total: u64,
    step: u8,
    last: u8,
}

impl ProgressMeter {
    fn new(total: u64, step: u8) -> Self {
        Self {
            total,
            step: step.clamp(1, 100),
            last: 0,
        }
    }

    fn advance(&mut self, done: u64, events: &EngineEventSink) {
        let percent = if self.total == 0 {
            100
        } else {
            u8::try_from(done.saturating_mul(100) / self.total)
                .unwrap_or(100)
                .min(100)
        };
        while self.last < 100 && self.last.saturating_add(self.step) <= percent {
            self.last += self.step;
            events.progress(self.last);
        }
    }

    fn finish(&mut self, events: &EngineEventSink) {
        self.advance(self.total, events);
        if self.last < 100 {
            self.last = 100;
            events.progress(100);
        }
    }
}

fn digest(file: &mut File, path: &Path) -> std::result::Result<(u64, String), EngineError> {
    let mut hasher = Sha256::new();
    let length = io::copy(file, &mut hasher)
        .map_err(|err| EngineError::io("checksum_database", path, err))?;
    Ok((length, hex::encode(hasher.finalize())))
}

/// Checks that the copied payload is the one the header was computed from.
fn confirm_snapshot(
    header: &ArtifactHeader,
    copied: u64,
    hasher: Sha256,
) -> std::result::Result<(), EngineError> {
    if copied == header.length && hex::encode(hasher.finalize()) == header.sha256 {
        return Ok(());
    }
    Err(EngineError::SourceChanged {
        database: header.database.clone(),
    })
}

fn write_header(
    writer: &mut File,
    header: &ArtifactHeader,
    device: &Path,
) -> std::result::Result<(), EngineError> {
    let mut line = serde_json::to_vec(header).map_err(|_| EngineError::ArtifactFormat {
        path: device.to_path_buf(),
        reason: "header could not be encoded",
    })?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .map_err(|err| EngineError::io("write_header", device, err))
}

fn open_artifact(
    path: &Path,
) -> std::result::Result<(ArtifactHeader, BufReader<File>), EngineError> {
    let file = File::open(path).map_err(|source| EngineError::DeviceUnavailable {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let read = match reader.read_line(&mut line) {
        Ok(read) => read,
        Err(err) if err.kind() == io::ErrorKind::InvalidData => 0,
        Err(err) => return Err(EngineError::io("read_header", path, err)),
    };
    if read == 0 {
        return Err(EngineError::ArtifactFormat {
            path: path.to_path_buf(),
            reason: "missing header",
        });
    }
    let header: ArtifactHeader =
        serde_json::from_str(line.trim_end()).map_err(|_| EngineError::ArtifactFormat {
            path: path.to_path_buf(),
            reason: "unreadable header",
        })?;
    if header.format != ARTIFACT_FORMAT || header.version != ARTIFACT_VERSION {
        return Err(EngineError::ArtifactFormat {
            path: path.to_path_buf(),
            reason: "unsupported format",
        });
    }
    Ok((header, reader))
}

fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        debug!(path = %path.display(), error = %err, "failed to remove partial file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbvault_core::EngineEvent;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::timeout;
    use uuid::Uuid;

    const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

    struct Fixture {
        _temp: TempDir,
        engine: FileEngine,
    }

    impl Fixture {
        fn new() -> Result<Self> {
            let temp = TempDir::new()?;
            let data_dir = temp.path().join("data");
            let backup_dir = temp.path().join("backup");
            fs::create_dir_all(&data_dir)?;
            fs::create_dir_all(&backup_dir)?;
            let engine = FileEngine::new(data_dir, backup_dir).with_chunk_size(1024);
            Ok(Self {
                _temp: temp,
                engine,
            })
        }

        fn seed(&self, database: &str, contents: &[u8]) -> Result<()> {
            fs::write(self.engine.database_path(database), contents)?;
            Ok(())
        }
    }

    fn backup(database: &str, device: &str, incremental: bool) -> OperationRequest {
        OperationRequest::Backup(BackupRequest {
            operation_id: Uuid::new_v4(),
            database: database.to_string(),
            device: device.to_string(),
            incremental,
            backup_set_name: format!("{database} Backup"),
            description: format!("Full backup of {database}"),
            expiration: None,
            truncate_log: true,
            continue_after_error: false,
            percent_notification: 25,
        })
    }

    fn restore(database: &str, device: &str) -> RestoreRequest {
        RestoreRequest {
            operation_id: Uuid::new_v4(),
            database: database.to_string(),
            device: device.to_string(),
            replace: false,
            no_recovery: false,
            continue_after_error: false,
            percent_notification: 50,
        }
    }

    async fn run(engine: &FileEngine, request: OperationRequest) -> Result<Vec<EngineEvent>> {
        let mut session = engine.open_session().await?;
        let (sink, receiver) = EngineEventSink::channel();
        session.submit(request, sink).await?;
        let events = collect(receiver).await?;
        session.release().await?;
        Ok(events)
    }

    async fn collect(mut receiver: UnboundedReceiver<EngineEvent>) -> Result<Vec<EngineEvent>> {
        let mut events = Vec::new();
        while let Some(event) = timeout(EVENT_TIMEOUT, receiver.recv()).await? {
            let done = matches!(event, EngineEvent::Completed { .. });
            events.push(event);
            if done {
                break;
            }
        }
        Ok(events)
    }

    fn progress(events: &[EngineEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|event| match event {
                EngineEvent::Progress { percent } => Some(*percent),
                _ => None,
            })
            .collect()
    }

    fn messages(events: &[EngineEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                EngineEvent::Informational { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn completion_error(events: &[EngineEvent]) -> Option<String> {
        events.iter().find_map(|event| match event {
            EngineEvent::Completed { error } => error.as_ref().map(ToString::to_string),
            _ => None,
        })
    }

    #[tokio::test]
    async fn backup_then_restore_round_trips_database() -> Result<()> {
        let fixture = Fixture::new()?;
        let contents: Vec<u8> = (0..10_000_u32).map(|value| (value % 251) as u8).collect();
        fixture.seed("Northwind", &contents)?;
        fs::write(fixture.engine.log_path("Northwind"), b"pending transactions")?;

        let events = run(&fixture.engine, backup("Northwind", "northwind.bak", false)).await?;
        assert_eq!(progress(&events), vec![25, 50, 75, 100]);
        assert!(completion_error(&events).is_none());
        assert!(
            messages(&events)
                .iter()
                .any(|message| message == "BACKUP DATABASE successfully processed 10000 bytes.")
        );
        assert!(fs::read(fixture.engine.log_path("Northwind"))?.is_empty());

        let header = read_artifact_header(&fixture.engine.resolve_device("northwind.bak"))?;
        assert_eq!(header.database, "Northwind");
        assert_eq!(header.kind, ArtifactKind::Full);
        assert_eq!(header.length, 10_000);
        assert_eq!(header.sha256, hex::encode(Sha256::digest(&contents)));
        assert_eq!(header.backup_set_name, "Northwind Backup");

        fs::write(fixture.engine.database_path("Northwind"), b"drifted")?;
        let mut request = restore("Northwind", "northwind.bak");
        request.replace = true;
        let events = run(&fixture.engine, OperationRequest::Restore(request)).await?;
        assert_eq!(progress(&events), vec![50, 100]);
        assert!(completion_error(&events).is_none());
        assert_eq!(fs::read(fixture.engine.database_path("Northwind"))?, contents);
        Ok(())
    }

    #[tokio::test]
    async fn missing_device_reports_cannot_open_message() -> Result<()> {
        let fixture = Fixture::new()?;
        let events = run(
            &fixture.engine,
            OperationRequest::Restore(restore("Northwind", "missing.bak")),
        )
        .await?;

        let messages = messages(&events);
        assert!(messages[0].starts_with("Cannot open backup device '"));
        assert_eq!(messages[1], "RESTORE DATABASE is terminating abnormally.");
        assert_eq!(
            completion_error(&events).as_deref(),
            Some("backup device unavailable")
        );
        Ok(())
    }

    #[tokio::test]
    async fn backup_into_missing_directory_reports_cannot_open_message() -> Result<()> {
        let fixture = Fixture::new()?;
        fixture.seed("Northwind", b"rows")?;
        let events = run(
            &fixture.engine,
            backup("Northwind", "no-such-dir/northwind.bak", false),
        )
        .await?;
        let messages = messages(&events);
        assert!(messages[0].contains("Cannot open backup device"));
        assert_eq!(messages[1], "BACKUP DATABASE is terminating abnormally.");
        Ok(())
    }

    #[tokio::test]
    async fn backup_of_missing_database_fails_without_messages() -> Result<()> {
        let fixture = Fixture::new()?;
        let events = run(&fixture.engine, backup("Ghost", "ghost.bak", false)).await?;
        assert!(messages(&events).is_empty());
        assert_eq!(
            completion_error(&events).as_deref(),
            Some("database does not exist")
        );
        Ok(())
    }

    #[tokio::test]
    async fn restore_without_replace_refuses_existing_database() -> Result<()> {
        let fixture = Fixture::new()?;
        fixture.seed("Northwind", b"rows")?;
        run(&fixture.engine, backup("Northwind", "northwind.bak", false)).await?;

        let events = run(
            &fixture.engine,
            OperationRequest::Restore(restore("Northwind", "northwind.bak")),
        )
        .await?;
        assert_eq!(
            completion_error(&events).as_deref(),
            Some("database already exists")
        );
        Ok(())
    }

    #[tokio::test]
    async fn checksum_mismatch_honours_continue_after_error() -> Result<()> {
        let fixture = Fixture::new()?;
        fixture.seed("Northwind", b"original rows")?;
        run(&fixture.engine, backup("Northwind", "northwind.bak", false)).await?;

        let device = fixture.engine.resolve_device("northwind.bak");
        let mut bytes = fs::read(&device)?;
        if let Some(last) = bytes.last_mut() {
            *last ^= 0xFF;
        }
        fs::write(&device, bytes)?;

        let mut strict = restore("Northwind", "northwind.bak");
        strict.replace = true;
        let events = run(&fixture.engine, OperationRequest::Restore(strict.clone())).await?;
        assert_eq!(
            completion_error(&events).as_deref(),
            Some("backup checksum mismatch")
        );
        assert_eq!(
            fs::read(fixture.engine.database_path("Northwind"))?,
            b"original rows"
        );

        strict.continue_after_error = true;
        let events = run(&fixture.engine, OperationRequest::Restore(strict)).await?;
        assert!(completion_error(&events).is_none());
        assert!(
            messages(&events)
                .iter()
                .any(|message| message.contains("CONTINUE_AFTER_ERROR"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn differential_restore_requires_restoring_state() -> Result<()> {
        let fixture = Fixture::new()?;
        fixture.seed("Northwind", b"full")?;
        run(&fixture.engine, backup("Northwind", "full.bak", false)).await?;
        fixture.seed("Northwind", b"full plus changes")?;
        run(&fixture.engine, backup("Northwind", "diff.bak", true)).await?;

        let events = run(
            &fixture.engine,
            OperationRequest::Restore(restore("Northwind", "diff.bak")),
        )
        .await?;
        assert_eq!(
            completion_error(&events).as_deref(),
            Some("database is not in the restoring state")
        );

        let mut full = restore("Northwind", "full.bak");
        full.replace = true;
        full.no_recovery = true;
        let events = run(&fixture.engine, OperationRequest::Restore(full)).await?;
        assert!(completion_error(&events).is_none());
        assert!(fixture.engine.restoring_marker("Northwind").exists());

        let events = run(
            &fixture.engine,
            OperationRequest::Restore(restore("Northwind", "diff.bak")),
        )
        .await?;
        assert!(completion_error(&events).is_none());
        assert!(!fixture.engine.restoring_marker("Northwind").exists());
        assert_eq!(
            fs::read(fixture.engine.database_path("Northwind"))?,
            b"full plus changes"
        );
        Ok(())
    }

    #[tokio::test]
    async fn abort_stops_copy_and_removes_partial_artifact() -> Result<()> {
        let fixture = Fixture::new()?;
        fixture.seed("Northwind", &vec![7_u8; 16 * 1024])?;
        let engine = fixture
            .engine
            .clone()
            .with_chunk_size(16)
            .with_chunk_delay(Duration::from_millis(2));

        let mut session = engine.open_session().await?;
        let (sink, mut receiver) = EngineEventSink::channel();
        session
            .submit(backup("Northwind", "slow.bak", false), sink)
            .await?;
        assert!(matches!(
            timeout(EVENT_TIMEOUT, receiver.recv()).await?,
            Some(EngineEvent::Progress { .. })
        ));

        assert!(timeout(EVENT_TIMEOUT, session.abort()).await??);
        assert!(!engine.resolve_device("slow.bak").exists());
        session.release().await?;
        assert!(session.release().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn open_and_submit_validate_inputs() -> Result<()> {
        let fixture = Fixture::new()?;
        let missing = FileEngine::new(fixture.engine.data_dir().join("absent"), "backup");
        assert!(missing.open_session().await.is_err());

        let mut session = fixture.engine.open_session().await?;
        let (sink, _receiver) = EngineEventSink::channel();
        let err = session
            .submit(backup("../escape", "escape.bak", false), sink)
            .await
            .err()
            .ok_or_else(|| anyhow!("expected invalid name to be rejected"))?;
        assert!(err.to_string().contains("invalid database name"));
        session.release().await?;
        Ok(())
    }

    #[test]
    fn snapshot_check_rejects_payload_that_drifted_from_header() {
        let payload = b"original rows";
        let header = ArtifactHeader {
            format: ARTIFACT_FORMAT.to_string(),
            version: ARTIFACT_VERSION,
            database: "Northwind".to_string(),
            kind: ArtifactKind::Full,
            backup_set_name: "Northwind Backup".to_string(),
            description: String::new(),
            created_at: Utc::now(),
            expires_at: None,
            length: payload.len() as u64,
            sha256: hex::encode(Sha256::digest(payload)),
        };

        let mut hasher = Sha256::new();
        hasher.update(payload);
        assert!(confirm_snapshot(&header, payload.len() as u64, hasher).is_ok());

        let mut hasher = Sha256::new();
        hasher.update(b"rewritten rows");
        let err = confirm_snapshot(&header, payload.len() as u64, hasher)
            .err()
            .map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("database changed during backup"));

        let mut hasher = Sha256::new();
        hasher.update(payload);
        hasher.update(b" appended");
        assert!(confirm_snapshot(&header, payload.len() as u64 + 9, hasher).is_err());
    }

    #[test]
    fn devices_resolve_against_backup_dir() {
        let engine = FileEngine::new("/srv/data", "/srv/backup");
        assert_eq!(
            engine.resolve_device("northwind.bak"),
            PathBuf::from("/srv/backup/northwind.bak")
        );
        assert_eq!(
            engine.resolve_device("/mnt/tape/northwind.bak"),
            PathBuf::from("/mnt/tape/northwind.bak")
        );
        assert_eq!(
            engine.database_path("Northwind"),
            PathBuf::from("/srv/data/Northwind.db")
        );
    }

    #[test]
    fn header_reader_rejects_foreign_files() -> Result<()> {
        let temp = TempDir::new()?;
        let empty = temp.path().join("empty.bak");
        fs::write(&empty, b"")?;
        let foreign = temp.path().join("foreign.bak");
        fs::write(&foreign, b"{\"hello\":\"world\"}\npayload")?;

        for path in [empty, foreign] {
            match read_artifact_header(&path) {
                Err(EngineError::ArtifactFormat { .. }) => {}
                other => anyhow::bail!("expected format error, got {other:?}"),
            }
        }
        Ok(())
    }
}
