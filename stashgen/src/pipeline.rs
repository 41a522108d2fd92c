// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

/// End-to-end generation run.
///
/// Gates on the input fingerprint, loads every row, renders and publishes one
/// profile per device, then rotates backups and synchronizes the repository.
/// Input problems abort before any file is written; per-device encoding
/// failures, backup failures and sync failures are reported but do not stop
/// the run.
use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    backup::{self, BackupReport},
    config::{RenderMode, ResolvedPaths, Settings},
    error::Error,
    git::{GitCli, SyncResult, VersionControl},
    loader::{self, DeviceRecord},
    naming::{self, DeviceSlots},
    publish::{CodeEncoder, PublishSlot, PublishedArtifact, Publisher},
    render::{self, Renderer},
    state::{self, Fingerprint, ModifiedTime, RunState},
};

/// Per-invocation switches.
#[derive(Debug, Clone, PartialEq, Eq,)]
pub struct RunOptions
{
    /// Regenerate even when the input is not newer than the stored state.
    pub force:       bool,
    /// Tag naming the backup bundle and, with cache busting enabled, the
    /// `v` query parameter of every public URL.
    pub tag:         String,
    /// Skip backup rotation for this run.
    pub skip_backup: bool,
    /// Skip repository synchronization for this run.
    pub skip_sync:   bool,
}

impl Default for RunOptions
{
    fn default() -> Self
    {
        Self {
            force:       false,
            tag:         backup::timestamp_tag(),
            skip_backup: false,
            skip_sync:   false,
        }
    }
}

/// Whether a device's artifacts were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize,)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus
{
    Published,
    Failed,
}

/// Result of publishing one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize,)]
pub struct DeviceReport
{
    pub id:         u32,
    pub status:     DeviceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact:   Option<PublishedArtifact,>,
    /// Provider descriptor written in provider mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<PathBuf,>,
    /// Document written before a failed encoding step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document:   Option<PathBuf,>,
    /// URL of the document when its QR code could not be produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String,>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error:      Option<String,>,
}

/// Summary of a completed generation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize,)]
pub struct RunReport
{
    /// Input fingerprint the run was based on.
    pub fingerprint: i64,
    /// Tag used for the backup bundle and cache busting.
    pub tag:         String,
    pub mode:        RenderMode,
    pub devices:     Vec<DeviceReport,>,
    /// `None` when rotation was skipped or failed.
    pub backup:      Option<BackupReport,>,
    /// `None` when synchronization was skipped.
    pub sync:        Option<SyncResult,>,
    /// Non-fatal problems encountered after generation.
    pub warnings:    Vec<String,>,
    /// Whether the fingerprint was persisted.
    pub state_saved: bool,
}

impl RunReport
{
    /// Returns `true` when every device was published.
    pub fn all_published(&self,) -> bool
    {
        self.devices.iter().all(|device| device.status == DeviceStatus::Published,)
    }
}

/// Outcome of [`Pipeline::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize,)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome
{
    /// The input was not newer than the last processed fingerprint.
    Skipped
    {
        fingerprint: i64,
        last:        i64,
    },
    Completed(RunReport,),
}

/// Rendered documents for one device without touching the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize,)]
pub struct PreviewDocument
{
    pub id:         u32,
    pub slot:       String,
    pub public_url: String,
    pub document:   String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String,>,
}

/// Wires settings, renderer, publisher, change detection and sync together.
pub struct Pipeline
{
    settings:        Settings,
    paths:           ResolvedPaths,
    renderer:        Renderer,
    publisher:       Publisher,
    fingerprint:     Box<dyn Fingerprint,>,
    version_control: Box<dyn VersionControl,>,
    progress:        bool,
}

impl std::fmt::Debug for Pipeline
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_,>,) -> std::fmt::Result
    {
        f.debug_struct("Pipeline",)
            .field("paths", &self.paths,)
            .field("renderer", &self.renderer,)
            .field("publisher", &self.publisher,)
            .finish_non_exhaustive()
    }
}

impl Pipeline
{
    /// Builds a pipeline with the modification-time fingerprint, the QR PNG
    /// encoder and the git driver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the settings are invalid or carry
    /// no CDN base.
    pub fn new(settings: Settings,) -> Result<Self, Error,>
    {
        let renderer = Renderer::from_settings(&settings,)?;
        let paths = settings.resolve();
        let publisher = Publisher::new(paths.output.clone(), settings.require_cdn_base()?,);
        let version_control = GitCli::new(&settings.sync,);

        Ok(Self {
            settings,
            paths,
            renderer,
            publisher,
            fingerprint: Box::new(ModifiedTime,),
            version_control: Box::new(version_control,),
            progress: false,
        },)
    }

    /// Replaces the input fingerprint source.
    pub fn with_fingerprint<F: Fingerprint + 'static,>(mut self, fingerprint: F,) -> Self
    {
        self.fingerprint = Box::new(fingerprint,);
        self
    }

    /// Replaces the version-control driver.
    pub fn with_version_control<V: VersionControl + 'static,>(mut self, version_control: V,) -> Self
    {
        self.version_control = Box::new(version_control,);
        self
    }

    /// Replaces the image encoder used by the publisher.
    pub fn with_encoder<E: CodeEncoder + 'static,>(mut self, encoder: E,) -> Self
    {
        let cdn_base = self.settings.cdn_base.trim().trim_end_matches('/',).to_owned();
        self.publisher = Publisher::with_encoder(self.paths.output.clone(), cdn_base, encoder,);
        self
    }

    /// Shows a progress bar on stderr while publishing.
    pub fn with_progress(mut self, enabled: bool,) -> Self
    {
        self.progress = enabled;
        self
    }

    pub fn settings(&self,) -> &Settings
    {
        &self.settings
    }

    pub fn paths(&self,) -> &ResolvedPaths
    {
        &self.paths
    }

    /// Executes one generation run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a tag unusable in a file name or URL
    /// before anything is read, [`Error::Io`] when the input is missing or
    /// output cannot be written, [`Error::Validation`]/[`Error::Coercion`]/[`Error::Spreadsheet`]
    /// for bad input and [`Error::State`] for a corrupt state file. Encoding,
    /// backup and sync failures are reported in the [`RunReport`] instead.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use stashgen::{Pipeline, RunOptions, RunOutcome, Settings};
    ///
    /// # fn main() -> Result<(), stashgen::Error> {
    /// let settings = Settings {
    ///     cdn_base: "https://cdn.example/out".to_owned(),
    ///     ..Settings::default()
    /// };
    /// match Pipeline::new(settings)?.run(&RunOptions::default())? {
    ///     RunOutcome::Skipped { .. } => println!("input unchanged"),
    ///     RunOutcome::Completed(report) => println!("{} devices", report.devices.len()),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn run(&self, options: &RunOptions,) -> Result<RunOutcome, Error,>
    {
        backup::validate_tag(&options.tag,)?;
        let paths = &self.paths;
        let current = self.fingerprint.fingerprint(&paths.input,)?;
        let stored = state::load_state(&paths.state_file,)?;

        if !options.force && !state::should_run(current, &stored,) {
            info!(
                "Input {} unchanged (fingerprint {current}, last {}), skipping",
                paths.input.display(),
                stored.last_source_fingerprint
            );
            return Ok(RunOutcome::Skipped {
                fingerprint: current,
                last:        stored.last_source_fingerprint,
            },);
        }

        let records = loader::load_records(&paths.input,)?;

        let version = self.settings.cache_busting.then_some(options.tag.as_str(),);
        let devices = self.publish_all(&records, version,)?;

        let mut warnings = Vec::new();
        for device in devices.iter().filter(|device| device.status == DeviceStatus::Failed,) {
            warnings.push(format!(
                "device {} failed: {}",
                device.id,
                device.error.as_deref().unwrap_or("unknown error",)
            ),);
        }

        let backup = if options.skip_backup || !self.settings.backup {
            debug!("Backup disabled for this run");
            None
        } else {
            match self.backup(&options.tag,) {
                Ok(report,) => Some(report,),
                Err(error,) => {
                    warn!("Backup failed: {}", error.to_display_string());
                    warnings.push(format!("backup failed: {}", error.to_display_string()),);
                    None
                }
            }
        };

        let sync = if options.skip_sync || !self.settings.sync.enabled {
            debug!("Sync disabled for this run");
            None
        } else {
            let result = self.sync();
            if !result.ok {
                warn!("Sync failed: {}", result.message);
                warnings.push(format!("sync failed: {}", result.message),);
            }
            Some(result,)
        };

        let mut report = RunReport {
            fingerprint: current,
            tag: options.tag.clone(),
            mode: self.settings.mode,
            devices,
            backup,
            sync,
            warnings,
            state_saved: false,
        };

        if report.all_published() {
            state::save_state(&paths.state_file, &RunState {
                last_source_fingerprint: current,
            },)?;
            report.state_saved = true;
        } else {
            warn!("Not every device was published, keeping previous state");
        }

        info!(
            "Published {}/{} devices",
            report.devices.iter().filter(|device| device.status == DeviceStatus::Published,).count(),
            report.devices.len()
        );
        Ok(RunOutcome::Completed(report,),)
    }

    /// Renders every device to YAML without writing anything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an unusable tag, loader errors and
    /// [`Error::Render`].
    pub fn preview(&self, tag: Option<&str,>,) -> Result<Vec<PreviewDocument,>, Error,>
    {
        if let Some(tag,) = tag {
            backup::validate_tag(tag,)?;
        }
        let records = loader::load_records(&self.paths.input,)?;
        let version = if self.settings.cache_busting { tag } else { None };
        let cdn_base = self.settings.require_cdn_base()?;

        records
            .iter()
            .map(|record| {
                let slots = DeviceSlots::for_device(record.id,);
                let rendered = self.renderer.render(record, self.settings.mode,);
                let descriptor = rendered.descriptor.as_ref().map(render::to_yaml,).transpose()?;
                Ok(PreviewDocument {
                    id: record.id,
                    public_url: naming::public_url(cdn_base, &slots.document, version,),
                    slot: slots.document,
                    document: render::to_yaml(&rendered.config,)?,
                    descriptor,
                },)
            },)
            .collect()
    }

    /// Archives the output directory under `tag` and prunes old bundles.
    ///
    /// # Errors
    ///
    /// See [`backup::rotate`].
    pub fn backup(&self, tag: &str,) -> Result<BackupReport, Error,>
    {
        backup::rotate(&self.paths.output, &self.paths.backups, tag, self.settings.keep_backups,)
    }

    /// Runs the version-control driver against the repository.
    pub fn sync(&self,) -> SyncResult
    {
        self.version_control.sync(&self.paths.repo,)
    }

    fn publish_all(&self, records: &[DeviceRecord], version: Option<&str,>,) -> Result<Vec<DeviceReport,>, Error,>
    {
        let bar = if self.progress {
            ProgressBar::new(records.len() as u64,)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}",)
                .expect("valid template",),
        );

        let mut reports = Vec::with_capacity(records.len(),);
        for record in records {
            bar.set_message(format!("Phone{}", record.id),);
            let report = self.publish_device(record, version,)?;
            if report.status == DeviceStatus::Published {
                debug!("Published device {}", record.id);
            }
            reports.push(report,);
            bar.inc(1,);
        }
        bar.finish_and_clear();

        Ok(reports,)
    }

    fn publish_device(&self, record: &DeviceRecord, version: Option<&str,>,) -> Result<DeviceReport, Error,>
    {
        let slots = DeviceSlots::for_device(record.id,);
        let rendered = self.renderer.render(record, self.settings.mode,);

        let descriptor = match &rendered.descriptor {
            Some(document,) => Some(self.publisher.write_document(&slots.descriptor, document,)?,),
            None => None,
        };

        let slot = PublishSlot {
            document: &slots.document,
            image:    &slots.image,
        };
        match self.publisher.publish(&rendered.config, slot, version,) {
            Ok(artifact,) => Ok(DeviceReport {
                id: record.id,
                status: DeviceStatus::Published,
                artifact: Some(artifact,),
                descriptor,
                document: None,
                public_url: None,
                error: None,
            },),
            Err(error @ Error::Encoding { .. },) => {
                warn!("Device {}: {}", record.id, error.to_display_string());
                Ok(DeviceReport {
                    id: record.id,
                    status: DeviceStatus::Failed,
                    artifact: None,
                    descriptor,
                    document: Some(self.publisher.output_root().join(&slots.document,),),
                    public_url: Some(self.publisher.public_url(&slots.document, version,),),
                    error: Some(error.to_display_string(),),
                },)
            }
            Err(error,) => Err(error,),
        }
    }
}
