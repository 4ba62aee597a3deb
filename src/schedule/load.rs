use std::path::Path;

use chrono::{NaiveDateTime, TimeDelta};
use tracing::{info, warn};

use crate::error::LoadError;
use crate::runtime::VolumeBinding;
use crate::schedule::ScheduleEntry;

/// Minimum spacing between two slots before the loader complains.
const MIN_SLOT_SPACING_MINUTES: i64 = 30;

/// Validated schedule, ready for [crate::schedule::ScheduleStore::load].
#[derive(Debug, Clone)]
pub struct LoadedSchedule {
    pub entries: Vec<ScheduleEntry>,
    pub volume: VolumeBinding,
}

/// Read a JSON schedule file and validate it against the current time.
pub fn load_schedule(
    path: impl AsRef<Path>,
    now: NaiveDateTime,
    mount_point: &str,
) -> Result<LoadedSchedule, LoadError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let entries: Vec<ScheduleEntry> = serde_json::from_str(&raw)?;
    info!(path = %path.display(), entries = entries.len(), "loaded schedule file");

    validate(entries, now, mount_point)
}

pub fn validate(
    mut entries: Vec<ScheduleEntry>,
    now: NaiveDateTime,
    mount_point: &str,
) -> Result<LoadedSchedule, LoadError> {
    let directory = match entries.first() {
        Some(first) => first.file.parent().unwrap_or(Path::new("")).to_path_buf(),
        None => return Err(LoadError::Empty),
    };

    if entries
        .iter()
        .any(|entry| entry.file.parent().unwrap_or(Path::new("")) != directory)
    {
        return Err(LoadError::MixedDirectories);
    }

    if let Some(missing) = entries.iter().find(|entry| !entry.file.exists()) {
        return Err(LoadError::MissingFile(missing.file.clone()));
    }

    entries.sort_by_key(|entry| entry.scheduled_at);

    let spacing = TimeDelta::minutes(MIN_SLOT_SPACING_MINUTES);
    for pair in entries.windows(2) {
        if pair[1].scheduled_at - pair[0].scheduled_at < spacing {
            warn!(
                first = %pair[0].file_name(),
                second = %pair[1].file_name(),
                "stream timepoints are closer together than {MIN_SLOT_SPACING_MINUTES} min"
            );
        }
    }

    entries.retain(|entry| entry.scheduled_at > now);
    if entries.is_empty() {
        return Err(LoadError::OnlyPastEntries);
    }

    Ok(LoadedSchedule {
        entries,
        volume: VolumeBinding {
            host: directory,
            container: mount_point.to_string(),
        },
    })
}
