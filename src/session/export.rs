//! Writes fetched sessions to a directory as JSON files.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    error::Result,
    session::{SessionMetadata, SessionSnapshot, session_id},
};

/// The file the session list is written to.
pub const SESSIONS_FILE: &str = "sessions.json";

/// The directory the per-session records are written to.
pub const RECORDS_DIR: &str = "sessions";

/// Formats an RFC 3339 timestamp as local time, or returns it unchanged if it does not parse.
pub fn local_time(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp).map_or_else(
        |_| timestamp.to_owned(),
        |time| {
            time.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        },
    )
}

/// The file name a session record is written to.
pub fn record_file_name(session: &SessionMetadata) -> String {
    let id = session_id(session).unwrap_or("unknown");
    format!("{}.json", sanitize_filename::sanitize(id))
}

async fn write_json<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    tokio::fs::write(path, serde_json::to_vec_pretty(value)?).await?;
    debug!("wrote {path:?}");
    Ok(())
}

/// Writes the session list to [`SESSIONS_FILE`] under `dir`, creating `dir` if needed.
///
/// # Errors
///
/// Returns an error if the directory or the file cannot be written.
pub async fn write_sessions<P>(dir: P, sessions: &[SessionMetadata]) -> Result<PathBuf>
where
    P: AsRef<Path> + Send + Sync,
{
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.as_ref().join(SESSIONS_FILE);
    write_json(&path, sessions).await?;

    info!("wrote {} sessions to {path:?}", sessions.len());
    Ok(path)
}

/// Writes every record of a snapshot to its own file under `dir`/[`RECORDS_DIR`], in list order.
///
/// # Errors
///
/// Returns an error if the directory or any file cannot be written.
pub async fn write_records<P>(dir: P, snapshot: &SessionSnapshot) -> Result<Vec<PathBuf>>
where
    P: AsRef<Path> + Send + Sync,
{
    let records_dir = dir.as_ref().join(RECORDS_DIR);
    tokio::fs::create_dir_all(&records_dir).await?;

    let mut paths = Vec::with_capacity(snapshot.records.len());
    for session in &snapshot.sessions {
        let Some(record) = session_id(session).and_then(|id| snapshot.records.get(id)) else {
            continue;
        };

        let path = records_dir.join(record_file_name(session));
        write_json(&path, record).await?;
        paths.push(path);
    }

    info!("wrote {} session records to {records_dir:?}", paths.len());
    Ok(paths)
}
