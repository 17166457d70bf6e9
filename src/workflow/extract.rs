//! Locates the analysis report inside a downloaded artifact archive.

use std::io::{Cursor, Read, Seek};

use serde_json::Value;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::Result;

/// Known report filenames, in priority order. An entry matches when its path ends with the filename.
pub const REPORT_CANDIDATES: [&str; 2] = ["gatekeeper-consolidated.json", "council-results.json"];

/// The filename prefix of the impact analysis merged into reports.
pub const IMPACT_ANALYSIS_PREFIX: &str = "cast-impact-analysis";

/// The report key the impact analysis is merged under.
pub const IMPACT_ANALYSIS_KEY: &str = "cast_impact_analysis";

/// Extracts the report from an in-memory zip archive.
///
/// Returns [`None`] if the archive holds no JSON file at all.
///
/// # Errors
///
/// Returns an error if the archive is malformed or the selected entry is not valid JSON.
pub fn extract_report(bytes: &[u8]) -> Result<Option<Value>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let names: Vec<String> = archive.file_names().map(str::to_owned).collect();

    let Some(entry) = locate_report(&names) else {
        warn!("no JSON found among {} archive entries", names.len());
        return Ok(None);
    };

    debug!("reading report from {entry}…");
    let mut report: Value = serde_json::from_slice(&read_entry(&mut archive, entry)?)?;
    merge_impact_analysis(&mut archive, &names, &mut report);

    Ok(Some(report))
}

/// Picks the entry holding the report: the first match of each [`REPORT_CANDIDATES`] in turn, then any
/// `.json` entry.
pub fn locate_report(names: &[String]) -> Option<&str> {
    REPORT_CANDIDATES
        .into_iter()
        .find_map(|candidate| names.iter().find(|name| name.ends_with(candidate)))
        .or_else(|| names.iter().find(|name| name.ends_with(".json")))
        .map(String::as_str)
}

fn base_name(name: &str) -> &str {
    name.rsplit_once('/').map_or(name, |(_, base)| base)
}

fn read_entry<R>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>>
where
    R: Read + Seek,
{
    let mut file = archive.by_name(name)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Attaches the first impact analysis entry to an object report, lossily decoded.
fn merge_impact_analysis<R>(archive: &mut ZipArchive<R>, names: &[String], report: &mut Value)
where
    R: Read + Seek,
{
    let Some(name) = names
        .iter()
        .find(|name| base_name(name).starts_with(IMPACT_ANALYSIS_PREFIX))
    else {
        return;
    };

    let Value::Object(fields) = report else {
        warn!("report is not an object, skipping {name}");
        return;
    };

    match read_entry(archive, name) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            fields.insert(IMPACT_ANALYSIS_KEY.to_owned(), Value::String(text));
            debug!("merged {name} into report");
        }
        Err(err) => warn!("failed to read {name}, skipping: {err}"),
    }
}
