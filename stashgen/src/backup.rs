// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
//
// SPDX-License-Identifier: MIT

//! Zipped snapshots of the output directory with count-based retention.
//!
//! Bundles are named `output_<tag>.zip`. Tags are fixed-width timestamps, so
//! sorting bundle names lexicographically orders them chronologically and the
//! oldest are evicted first. Other files in the backup directory are never
//! touched.

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::error::{self, Error};

/// File name prefix shared by every bundle.
pub const BUNDLE_PREFIX: &str = "output_";

/// `chrono` format of version and backup tags. Fixed width, so tags sort
/// chronologically as strings.
pub const TAG_FORMAT: &str = "%Y%m%d%H%M%S";

static BUNDLE_NAME: LazyLock<Regex,> = LazyLock::new(|| {
    Regex::new(r"^output_[0-9A-Za-z_-]+\.zip$",).expect("bundle pattern is a valid regex",)
},);

static TAG: LazyLock<Regex,> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z_-]+$",).expect("tag pattern is a valid regex",),);

/// Outcome of a rotation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize,)]
pub struct BackupReport
{
    /// Bundle written by this rotation, `None` when the output was empty.
    pub archive:  Option<PathBuf,>,
    /// Bundles deleted to honour the retention limit.
    pub removed:  Vec<PathBuf,>,
    /// Bundles left after rotation, oldest first.
    pub retained: Vec<PathBuf,>,
}

/// Returns the current local time formatted with [`TAG_FORMAT`].
pub fn timestamp_tag() -> String
{
    chrono::Local::now().format(TAG_FORMAT,).to_string()
}

/// Checks that `tag` can be used both in a bundle file name and as a URL
/// query value.
///
/// # Errors
///
/// Returns [`Error::Validation`] unless `tag` is a non-empty run of letters,
/// digits, `-` and `_`.
pub fn validate_tag(tag: &str,) -> Result<(), Error,>
{
    if TAG.is_match(tag,) {
        return Ok((),);
    }
    Err(Error::validation(format!("tag '{tag}' may only contain letters, digits, '-' and '_'"),),)
}

/// Archives `output_dir` into `backup_dir` as `output_<tag>.zip` and keeps
/// only the `keep` most recent bundles.
///
/// An empty or missing output directory is a no-op.
///
/// # Errors
///
/// Returns [`Error::Validation`] when `keep` is zero or `tag` is not a plain
/// file name fragment, [`Error::Io`] for filesystem failures and
/// [`Error::Archive`] when the zip cannot be written.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
///
/// # fn main() -> Result<(), stashgen::Error> {
/// let report = stashgen::rotate(Path::new("output"), Path::new("backups"), "20250101120000", 3)?;
/// println!("removed {} old bundles", report.removed.len());
/// # Ok(())
/// # }
/// ```
pub fn rotate(output_dir: &Path, backup_dir: &Path, tag: &str, keep: usize,) -> Result<BackupReport, Error,>
{
    if keep == 0 {
        return Err(Error::validation("backup retention must keep at least one bundle",),);
    }
    validate_tag(tag,)?;

    if !has_files(output_dir, backup_dir,) {
        info!("Output directory {} is empty, skipping backup", output_dir.display());
        return Ok(BackupReport::default(),);
    }

    fs::create_dir_all(backup_dir,).map_err(|e| error::io_error(backup_dir, e,),)?;
    let archive = backup_dir.join(format!("{BUNDLE_PREFIX}{tag}.zip"),);
    write_archive(output_dir, backup_dir, &archive,)?;
    info!("Backed up {} to {}", output_dir.display(), archive.display());

    let (removed, retained,) = prune(backup_dir, keep,)?;
    Ok(BackupReport {
        archive: Some(archive,),
        removed,
        retained,
    },)
}

/// Lists bundles in `backup_dir`, oldest first.
///
/// # Errors
///
/// Returns [`Error::Io`] when the directory cannot be read.
pub fn list_bundles(backup_dir: &Path,) -> Result<Vec<PathBuf,>, Error,>
{
    let entries = match fs::read_dir(backup_dir,) {
        Ok(entries,) => entries,
        Err(e,) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new(),),
        Err(e,) => return Err(error::io_error(backup_dir, e,),),
    };

    let mut bundles = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| error::io_error(backup_dir, e,),)?;
        let is_file = entry.file_type().map(|kind| kind.is_file(),).unwrap_or(false,);
        let name = entry.file_name();
        if is_file && name.to_str().is_some_and(|name| BUNDLE_NAME.is_match(name,),) {
            bundles.push(entry.path(),);
        }
    }

    bundles.sort_by(|a, b| a.file_name().cmp(&b.file_name(),),);
    Ok(bundles,)
}

fn prune(backup_dir: &Path, keep: usize,) -> Result<(Vec<PathBuf,>, Vec<PathBuf,>,), Error,>
{
    let mut bundles = list_bundles(backup_dir,)?;
    let excess = bundles.len().saturating_sub(keep,);
    let retained = bundles.split_off(excess,);

    for bundle in &bundles {
        fs::remove_file(bundle,).map_err(|e| error::io_error(bundle, e,),)?;
        debug!("Removed old backup {}", bundle.display());
    }

    Ok((bundles, retained,),)
}

fn has_files(output_dir: &Path, backup_dir: &Path,) -> bool
{
    WalkDir::new(output_dir,)
        .into_iter()
        .filter_entry(|entry| !entry.path().starts_with(backup_dir,),)
        .filter_map(Result::ok,)
        .any(|entry| entry.file_type().is_file(),)
}

fn write_archive(output_dir: &Path, backup_dir: &Path, archive: &Path,) -> Result<(), Error,>
{
    let partial = archive.with_extension("zip.partial",);
    let file = File::create(&partial,).map_err(|e| error::io_error(&partial, e,),)?;
    let mut writer = ZipWriter::new(file,);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated,)
        .unix_permissions(0o644,);

    let walker = WalkDir::new(output_dir,)
        .min_depth(1,)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !entry.path().starts_with(backup_dir,),);

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(output_dir,).to_path_buf();
            error::io_error(&path, io::Error::other(e,),)
        },)?;
        let relative = entry.path().strip_prefix(output_dir,).unwrap_or(entry.path(),);
        let name = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy(),)
            .collect::<Vec<_,>>()
            .join("/",);

        if entry.file_type().is_dir() {
            writer
                .add_directory(format!("{name}/"), options,)
                .map_err(|e| error::archive_error(archive, e,),)?;
        } else if entry.file_type().is_file() {
            writer.start_file(name, options,).map_err(|e| error::archive_error(archive, e,),)?;
            let mut source = File::open(entry.path(),).map_err(|e| error::io_error(entry.path(), e,),)?;
            io::copy(&mut source, &mut writer,).map_err(|e| error::io_error(entry.path(), e,),)?;
        }
    }

    writer.finish().map_err(|e| error::archive_error(archive, e,),)?;
    fs::rename(&partial, archive,).map_err(|e| error::io_error(archive, e,),)
}
