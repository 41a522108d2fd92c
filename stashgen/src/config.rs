// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
//
// SPDX-License-Identifier: MIT

//! Settings document describing where the generator reads and writes.
//!
//! The types mirror the structure of the optional `stashgen.yaml` file. Every
//! field has a default so an empty document is valid; the CDN base is the only
//! value that must be supplied (either in the file or on the command line)
//! before documents can be rendered.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{self, Error};

/// File name probed in the working directory when no `--config` is given.
pub const DEFAULT_SETTINGS_FILE: &str = "stashgen.yaml";

/// Strategy used by the renderer to lay out a device profile.
///
/// # Examples
///
/// ```
/// use stashgen::RenderMode;
///
/// let mode: RenderMode = serde_yaml::from_str("provider",).expect("valid mode",);
/// assert_eq!(mode, RenderMode::Provider);
/// ```
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum,)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode
{
    /// Single document carrying the proxy inline.
    #[default]
    Inline,
    /// Main document referencing a separately published proxy descriptor.
    Provider,
}

/// Root settings document.
///
/// # Examples
///
/// ```
/// use stashgen::Settings;
///
/// let yaml = r#"
/// cdn_base: https://cdn.example/out
/// keep_backups: 5
/// "#;
/// let settings: Settings = serde_yaml::from_str(yaml,).expect("valid settings",);
/// assert_eq!(settings.keep_backups, 5);
/// assert_eq!(settings.output_dir.to_str(), Some("output"));
/// ```
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq,)]
#[serde(default, deny_unknown_fields)]
pub struct Settings
{
    /// Working copy of the published repository. Relative paths below are
    /// resolved against it.
    pub repo_path:     PathBuf,
    /// Spreadsheet or CSV file with one row per device.
    pub input:         PathBuf,
    /// Directory receiving generated documents and QR codes.
    pub output_dir:    PathBuf,
    /// Directory receiving zipped snapshots of the output directory.
    pub backup_dir:    PathBuf,
    /// JSON file holding the last processed source fingerprint.
    pub state_file:    PathBuf,
    /// Content-delivery URL that mirrors the output directory.
    pub cdn_base:      String,
    /// Number of backup bundles retained after rotation.
    pub keep_backups:  usize,
    /// Layout strategy for rendered documents.
    pub mode:          RenderMode,
    /// Append a `?v=<timestamp>` token to QR payloads.
    pub cache_busting: bool,
    /// Archive the output directory after each generation pass.
    pub backup:        bool,
    /// Version-control options.
    pub sync:          SyncSettings,
    /// Fixed parts of every rendered document.
    pub profile:       BaseProfile,
}

impl Default for Settings
{
    fn default() -> Self
    {
        Self {
            repo_path:     PathBuf::from(".",),
            input:         PathBuf::from("手机IP列表.xlsx",),
            output_dir:    PathBuf::from("output",),
            backup_dir:    PathBuf::from("backups",),
            state_file:    PathBuf::from(".last_update.json",),
            cdn_base:      String::new(),
            keep_backups:  3,
            mode:          RenderMode::Inline,
            cache_busting: true,
            backup:        true,
            sync:          SyncSettings::default(),
            profile:       BaseProfile::default(),
        }
    }
}

/// Options for the version-control publish step.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq,)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings
{
    /// Run the sync driver at the end of a generation pass.
    pub enabled:        bool,
    /// Version-control executable.
    pub program:        PathBuf,
    /// Remote that receives the forced push.
    pub remote:         String,
    /// Branch checked out, rebased and pushed.
    pub branch:         String,
    /// Commit message used for generated changes.
    pub commit_message: String,
}

impl Default for SyncSettings
{
    fn default() -> Self
    {
        Self {
            enabled:        true,
            program:        PathBuf::from("git",),
            remote:         "origin".to_owned(),
            branch:         "main".to_owned(),
            commit_message: "Auto update stash configs".to_owned(),
        }
    }
}

/// Values shared by every rendered profile.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq,)]
#[serde(default, deny_unknown_fields)]
pub struct BaseProfile
{
    /// Top-level operating mode.
    pub mode:              String,
    /// Client logging level.
    pub log_level:         String,
    /// Whether the client exposes its proxy on the LAN.
    pub allow_lan:         bool,
    /// Proxy protocol written into each descriptor.
    pub proxy_type:        String,
    /// UDP relay flag written into each descriptor.
    pub udp:               bool,
    /// `ip-version` written into each descriptor when set.
    pub ip_version:        Option<u8,>,
    /// `tls` flag written into each descriptor when set.
    pub tls:               Option<bool,>,
    /// `skip-cert-verify` flag written into each descriptor when set.
    pub skip_cert_verify:  Option<bool,>,
    /// Name of the selection group.
    pub group_name:        String,
    /// Type of the selection group.
    pub group_type:        String,
    /// Type of the provider reference in provider mode.
    pub provider_type:     String,
    /// Refresh interval in seconds of the provider reference.
    pub provider_interval: u32,
    /// Ordered routing rules; the last one must be a `MATCH` catch-all.
    pub rules:             Vec<String,>,
}

impl Default for BaseProfile
{
    fn default() -> Self
    {
        Self {
            mode:              "Rule".to_owned(),
            log_level:         "info".to_owned(),
            allow_lan:         true,
            proxy_type:        "socks5".to_owned(),
            udp:               false,
            ip_version:        None,
            tls:               None,
            skip_cert_verify:  None,
            group_name:        "Proxy".to_owned(),
            group_type:        "select".to_owned(),
            provider_type:     "http".to_owned(),
            provider_interval: 3600,
            rules:             vec![
                "DOMAIN-SUFFIX,whatsapp.net,Proxy".to_owned(),
                "DOMAIN-SUFFIX,whatsapp.com,Proxy".to_owned(),
                "IP-CIDR,31.13.64.0/18,Proxy".to_owned(),
                "MATCH,Proxy".to_owned(),
            ],
        }
    }
}

/// Absolute locations derived from [`Settings`].
#[derive(Debug, Clone, PartialEq, Eq,)]
pub struct ResolvedPaths
{
    /// Repository working copy.
    pub repo:       PathBuf,
    /// Input spreadsheet.
    pub input:      PathBuf,
    /// Output root.
    pub output:     PathBuf,
    /// Backup directory.
    pub backups:    PathBuf,
    /// Persisted run state.
    pub state_file: PathBuf,
}

impl Settings
{
    /// Loads settings from an explicit path, from [`DEFAULT_SETTINGS_FILE`]
    /// in the working directory, or falls back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when an explicit file cannot be read and
    /// [`Error::Parse`] when the YAML is malformed.
    pub fn load(path: Option<&Path,>,) -> Result<Self, Error,>
    {
        match path {
            Some(path,) => Self::from_file(path,),
            None => {
                let fallback = Path::new(DEFAULT_SETTINGS_FILE,);
                if fallback.is_file() {
                    Self::from_file(fallback,)
                } else {
                    Ok(Self::default(),)
                }
            }
        }
    }

    /// Reads and parses a settings file.
    ///
    /// # Errors
    ///
    /// See [`Settings::load`].
    pub fn from_file(path: &Path,) -> Result<Self, Error,>
    {
        let contents =
            fs::read_to_string(path,).map_err(|source| error::io_error(path, source,),)?;
        Self::parse(&contents,)
    }

    /// Parses settings from a YAML string. An empty document yields defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] when the YAML is malformed or contains unknown
    /// keys.
    pub fn parse(contents: &str,) -> Result<Self, Error,>
    {
        if contents.trim().is_empty() {
            return Ok(Self::default(),);
        }
        Ok(serde_yaml::from_str(contents,)?,)
    }

    /// Checks invariants that do not depend on the requested command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when `keep_backups` is zero, the rule
    /// list is empty or does not end with a `MATCH` rule, or names used in
    /// rendered documents are blank.
    pub fn validate(&self,) -> Result<(), Error,>
    {
        if self.keep_backups == 0 {
            return Err(Error::validation("keep_backups must be at least 1",),);
        }

        let profile = &self.profile;
        if profile.group_name.trim().is_empty() {
            return Err(Error::validation("profile.group_name cannot be empty",),);
        }
        if profile.proxy_type.trim().is_empty() {
            return Err(Error::validation("profile.proxy_type cannot be empty",),);
        }

        match profile.rules.last() {
            None => Err(Error::validation("profile.rules cannot be empty",),),
            Some(last,) if !is_catch_all(last,) => Err(Error::validation(format!(
                "profile.rules must end with a MATCH rule, found '{last}'"
            ),),),
            Some(_,) => Ok((),),
        }
    }

    /// Returns the CDN base without trailing slashes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when no CDN base was configured.
    pub fn require_cdn_base(&self,) -> Result<&str, Error,>
    {
        let trimmed = self.cdn_base.trim().trim_end_matches('/',);
        if trimmed.is_empty() {
            return Err(Error::validation(
                "cdn_base must be provided (settings file or --cdn-base)",
            ),);
        }
        Ok(trimmed,)
    }

    /// Resolves every configured location against `repo_path`.
    pub fn resolve(&self,) -> ResolvedPaths
    {
        let repo = self.repo_path.clone();
        let join = |path: &Path| {
            if path.is_absolute() { path.to_path_buf() } else { repo.join(path,) }
        };

        ResolvedPaths {
            input:      join(&self.input,),
            output:     join(&self.output_dir,),
            backups:    join(&self.backup_dir,),
            state_file: join(&self.state_file,),
            repo:       repo.clone(),
        }
    }
}

fn is_catch_all(rule: &str,) -> bool
{
    rule.split(',',).next().is_some_and(|kind| kind.trim().eq_ignore_ascii_case("MATCH",),)
}

#[cfg(test)]
mod tests
{
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn empty_document_yields_defaults()
    {
        let settings = Settings::parse("",).expect("empty settings should parse",);
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.keep_backups, 3);
        assert_eq!(settings.mode, RenderMode::Inline);
        assert!(settings.sync.enabled);
    }

    #[test]
    fn partial_document_keeps_nested_defaults()
    {
        let yaml = r"
cdn_base: https://cdn.example/out/
mode: provider
sync:
  branch: release
profile:
  rules:
    - MATCH,Proxy
";
        let settings = Settings::parse(yaml,).expect("valid settings",);
        assert_eq!(settings.mode, RenderMode::Provider);
        assert_eq!(settings.sync.branch, "release");
        assert_eq!(settings.sync.remote, "origin");
        assert_eq!(settings.profile.rules, vec!["MATCH,Proxy".to_owned()]);
        assert_eq!(settings.profile.group_name, "Proxy");
        assert_eq!(settings.require_cdn_base().expect("cdn base",), "https://cdn.example/out");
    }

    #[test]
    fn transport_flags_are_optional()
    {
        let yaml = r"
profile:
  ip_version: 4
  skip_cert_verify: true
";
        let settings = Settings::parse(yaml,).expect("valid settings",);
        assert_eq!(settings.profile.ip_version, Some(4));
        assert_eq!(settings.profile.tls, None);
        assert_eq!(settings.profile.skip_cert_verify, Some(true));
        assert_eq!(Settings::default().profile.ip_version, None);
    }

    #[test]
    fn unknown_keys_are_rejected()
    {
        let error = Settings::parse("cdn_url: https://example\n",).expect_err("unknown key",);
        assert!(matches!(error, Error::Parse { .. }));
    }

    #[test]
    fn missing_cdn_base_is_a_validation_error()
    {
        let settings = Settings::default();
        let error = settings.require_cdn_base().expect_err("missing cdn base",);
        assert!(matches!(error, Error::Validation { .. }));
    }

    #[test]
    fn validate_rejects_zero_retention()
    {
        let settings = Settings {
            keep_backups: 0, ..Settings::default()
        };
        let error = settings.validate().expect_err("zero retention",);
        assert!(error.to_string().contains("keep_backups"));
    }

    #[test]
    fn validate_requires_catch_all_rule_last()
    {
        let mut settings = Settings::default();
        settings.profile.rules = vec!["MATCH,Proxy".to_owned(), "DOMAIN,example.com,Proxy".to_owned()];
        let error = settings.validate().expect_err("catch-all must be last",);
        assert!(error.to_string().contains("MATCH"));

        settings.profile.rules.clear();
        assert!(settings.validate().is_err());

        settings.profile.rules = vec!["match,DIRECT".to_owned()];
        settings.validate().expect("lowercase MATCH is accepted",);
    }

    #[test]
    fn default_settings_validate()
    {
        Settings::default().validate().expect("defaults should be valid",);
    }

    #[test]
    fn resolve_joins_relative_paths_against_repository()
    {
        let settings = Settings {
            repo_path: PathBuf::from("/srv/repo",),
            backup_dir: PathBuf::from("/var/backups/stash",),
            ..Settings::default()
        };
        let paths = settings.resolve();
        assert_eq!(paths.output, PathBuf::from("/srv/repo/output"));
        assert_eq!(paths.state_file, PathBuf::from("/srv/repo/.last_update.json"));
        assert_eq!(paths.backups, PathBuf::from("/var/backups/stash"));
    }

    #[test]
    fn load_reads_explicit_file()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let path = temp.path().join("settings.yaml",);
        fs::write(&path, "keep_backups: 7\n",).expect("failed to write settings",);

        let settings = Settings::load(Some(&path,),).expect("settings should load",);
        assert_eq!(settings.keep_backups, 7);
    }

    #[test]
    fn load_reports_missing_explicit_file()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let error = Settings::load(Some(&temp.path().join("absent.yaml",),),)
            .expect_err("missing file",);
        assert!(matches!(error, Error::Io { .. }));
    }
}
