// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
//
// SPDX-License-Identifier: MIT

//! Change detection based on the input's modification time.
//!
//! The last processed fingerprint is persisted as a small JSON document. A run
//! proceeds only when the current fingerprint is strictly greater than the
//! stored one. Writes go through a `.tmp` file followed by a rename so an
//! interrupted run never leaves a truncated state file behind.

use std::{
    fs,
    path::Path,
    time::UNIX_EPOCH,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{self, Error};

/// Persisted state between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,)]
pub struct RunState
{
    /// Fingerprint of the input when the last generation pass succeeded.
    #[serde(rename = "source_fingerprint", alias = "excel_mtime", default)]
    pub last_source_fingerprint: i64,
}

/// Produces a monotonically comparable fingerprint for the input file.
pub trait Fingerprint
{
    /// Returns the fingerprint of `source`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the source cannot be inspected.
    fn fingerprint(&self, source: &Path,) -> Result<i64, Error,>;
}

impl<F,> Fingerprint for F
where
    F: Fn(&Path,) -> Result<i64, Error,>,
{
    fn fingerprint(&self, source: &Path,) -> Result<i64, Error,>
    {
        self(source,)
    }
}

/// Fingerprint equal to the file's modification time in whole seconds.
#[derive(Debug, Clone, Copy, Default,)]
pub struct ModifiedTime;

impl Fingerprint for ModifiedTime
{
    fn fingerprint(&self, source: &Path,) -> Result<i64, Error,>
    {
        let modified = fs::metadata(source,)
            .and_then(|metadata| metadata.modified(),)
            .map_err(|e| error::io_error(source, e,),)?;

        let seconds = match modified.duration_since(UNIX_EPOCH,) {
            Ok(elapsed,) => i64::try_from(elapsed.as_secs(),).unwrap_or(i64::MAX,),
            Err(before,) => -i64::try_from(before.duration().as_secs(),).unwrap_or(i64::MAX,),
        };
        Ok(seconds,)
    }
}

/// Returns `true` iff `current` is strictly newer than the stored fingerprint.
///
/// # Examples
///
/// ```
/// use stashgen::{RunState, should_run};
///
/// let state = RunState { last_source_fingerprint: 100 };
/// assert!(should_run(101, &state));
/// assert!(!should_run(100, &state));
/// ```
pub fn should_run(current: i64, state: &RunState,) -> bool
{
    current > state.last_source_fingerprint
}

/// Loads the run state, treating a missing file as a fresh state.
///
/// # Errors
///
/// Returns [`Error::Io`] when the file exists but cannot be read and
/// [`Error::State`] when it is not valid JSON.
pub fn load_state(path: &Path,) -> Result<RunState, Error,>
{
    let contents = match fs::read_to_string(path,) {
        Ok(contents,) => contents,
        Err(e,) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No run state at {}, starting fresh", path.display());
            return Ok(RunState::default(),);
        }
        Err(e,) => return Err(error::io_error(path, e,),),
    };

    Ok(serde_json::from_str(&contents,)?,)
}

/// Persists the run state atomically.
///
/// # Errors
///
/// Returns [`Error::Io`] when the directory, temporary file or rename fails.
pub fn save_state(path: &Path, state: &RunState,) -> Result<(), Error,>
{
    if let Some(parent,) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent,).map_err(|e| error::io_error(parent, e,),)?;
    }

    let json = serde_json::to_string_pretty(state,)?;
    let tmp = path.with_extension("json.tmp",);
    fs::write(&tmp, json,).map_err(|e| error::io_error(&tmp, e,),)?;
    fs::rename(&tmp, path,).map_err(|e| error::io_error(path, e,),)?;

    debug!("Stored fingerprint {} in {}", state.last_source_fingerprint, path.display());
    Ok((),)
}
