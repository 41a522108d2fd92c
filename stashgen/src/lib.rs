// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
//
// SPDX-License-Identifier: MIT

//! Per-device Stash profile generation.
//!
//! The library turns a spreadsheet of device credentials into one YAML
//! profile per device, a QR code pointing at the profile's public URL and,
//! in provider mode, a separately published proxy descriptor. Runs are gated
//! on the input's modification time, the output directory is archived into a
//! bounded set of zip bundles, and the repository holding the output is
//! synchronized through git.
//!
//! Every component receives its configuration explicitly through
//! [`Settings`]; external effects (fingerprinting, image encoding, version
//! control) sit behind traits so they can be replaced in tests.

mod backup;
mod config;
mod error;
mod git;
mod loader;
mod naming;
mod pipeline;
mod publish;
mod render;
mod state;

pub use backup::{
    BUNDLE_PREFIX, BackupReport, TAG_FORMAT, list_bundles, rotate, timestamp_tag, validate_tag,
};
pub use config::{
    BaseProfile, DEFAULT_SETTINGS_FILE, RenderMode, ResolvedPaths, Settings, SyncSettings,
};
pub use error::{Error, io_error};
pub use git::{GitCli, StepOutcome, SyncResult, VersionControl};
pub use loader::{Cell, DeviceRecord, Table, load_records, read_table, records_from_table};
pub use naming::{DeviceSlots, provider_key, proxy_name, public_url};
pub use pipeline::{
    DeviceReport, DeviceStatus, Pipeline, PreviewDocument, RunOptions, RunOutcome, RunReport,
};
pub use publish::{CodeEncoder, PublishSlot, PublishedArtifact, Publisher, QrPngEncoder};
pub use render::{
    ProviderDocument, ProxyDescriptor, ProxyGroup, ProxyProvider, Rendered, RenderedConfig,
    Renderer, to_yaml,
};
pub use state::{Fingerprint, ModifiedTime, RunState, load_state, save_state, should_run};
