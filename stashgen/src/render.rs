// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

/// Template renderer producing one Stash profile per device.
///
/// Documents are plain structs so `serde_yaml` emits fields in declaration
/// order and writes booleans and integers as native scalars.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    config::{BaseProfile, RenderMode, Settings},
    error::Error,
    loader::DeviceRecord,
    naming::{self, DeviceSlots},
};

/// One proxy entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,)]
pub struct ProxyDescriptor
{
    pub name:             String,
    #[serde(rename = "type")]
    pub kind:             String,
    pub server:           String,
    pub port:             u16,
    pub username:         String,
    pub password:         String,
    pub udp:              bool,
    #[serde(rename = "ip-version", default, skip_serializing_if = "Option::is_none")]
    pub ip_version:       Option<u8,>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls:              Option<bool,>,
    #[serde(rename = "skip-cert-verify", default, skip_serializing_if = "Option::is_none")]
    pub skip_cert_verify: Option<bool,>,
}

/// Remote proxy list referenced from the main document in provider mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,)]
pub struct ProxyProvider
{
    #[serde(rename = "type")]
    pub kind:     String,
    pub url:      String,
    pub interval: u32,
    pub path:     String,
}

/// Selection group routing rule traffic to the device proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,)]
pub struct ProxyGroup
{
    pub name:    String,
    #[serde(rename = "type")]
    pub kind:    String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxies: Option<Vec<String,>,>,
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub uses:    Option<Vec<String,>,>,
}

/// Complete profile for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,)]
#[serde(rename_all = "kebab-case")]
pub struct RenderedConfig
{
    pub mode:            String,
    pub log_level:       String,
    pub allow_lan:       bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxies:         Option<Vec<ProxyDescriptor,>,>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_providers: Option<BTreeMap<String, ProxyProvider,>,>,
    pub proxy_groups:    Vec<ProxyGroup,>,
    pub rules:           Vec<String,>,
}

/// Stand-alone descriptor document published in provider mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,)]
pub struct ProviderDocument
{
    pub proxies: Vec<ProxyDescriptor,>,
}

/// Output of [`Renderer::render`].
#[derive(Debug, Clone, PartialEq, Eq,)]
pub struct Rendered
{
    /// Main profile document.
    pub config:     RenderedConfig,
    /// Descriptor that must be published at [`DeviceSlots::descriptor`] when
    /// the profile was rendered in provider mode.
    pub descriptor: Option<ProviderDocument,>,
}

/// Renders device records against a fixed base profile.
#[derive(Debug, Clone,)]
pub struct Renderer
{
    profile:  BaseProfile,
    cdn_base: String,
}

impl Renderer
{
    /// Creates a renderer. `cdn_base` is used for provider URLs.
    pub fn new<S: Into<String,>,>(profile: BaseProfile, cdn_base: S,) -> Self
    {
        Self {
            profile,
            cdn_base: cdn_base.into(),
        }
    }

    /// Builds a renderer from validated settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the settings are invalid or carry no
    /// CDN base.
    pub fn from_settings(settings: &Settings,) -> Result<Self, Error,>
    {
        settings.validate()?;
        let cdn_base = settings.require_cdn_base()?;
        Ok(Self::new(settings.profile.clone(), cdn_base,),)
    }

    /// Renders the profile for `record`.
    ///
    /// The output depends only on the record, the mode and the renderer's
    /// profile, so equal inputs always serialize to equal bytes.
    pub fn render(&self, record: &DeviceRecord, mode: RenderMode,) -> Rendered
    {
        let profile = &self.profile;
        let descriptor = self.descriptor(record,);

        let (proxies, proxy_providers, group, document,) = match mode {
            RenderMode::Inline => {
                let group = ProxyGroup {
                    name:    profile.group_name.clone(),
                    kind:    profile.group_type.clone(),
                    proxies: Some(vec![descriptor.name.clone()],),
                    uses:    None,
                };
                (Some(vec![descriptor],), None, group, None,)
            }
            RenderMode::Provider => {
                let key = naming::provider_key(record.id,);
                let slots = DeviceSlots::for_device(record.id,);
                let provider = ProxyProvider {
                    kind:     profile.provider_type.clone(),
                    url:      naming::public_url(&self.cdn_base, &slots.descriptor, None,),
                    interval: profile.provider_interval,
                    path:     slots.cache_path,
                };
                let group = ProxyGroup {
                    name:    profile.group_name.clone(),
                    kind:    profile.group_type.clone(),
                    proxies: None,
                    uses:    Some(vec![key.clone()],),
                };
                let providers = BTreeMap::from([(key, provider,)],);
                let document = ProviderDocument {
                    proxies: vec![descriptor],
                };
                (None, Some(providers,), group, Some(document,),)
            }
        };

        Rendered {
            config: RenderedConfig {
                mode: profile.mode.clone(),
                log_level: profile.log_level.clone(),
                allow_lan: profile.allow_lan,
                proxies,
                proxy_providers,
                proxy_groups: vec![group],
                rules: profile.rules.clone(),
            },
            descriptor: document,
        }
    }

    fn descriptor(&self, record: &DeviceRecord,) -> ProxyDescriptor
    {
        ProxyDescriptor {
            name:             naming::proxy_name(record.id,),
            kind:             self.profile.proxy_type.clone(),
            server:           record.address.clone(),
            port:             record.port,
            username:         record.username.clone(),
            password:         record.secret.clone(),
            udp:              self.profile.udp,
            ip_version:       self.profile.ip_version,
            tls:              self.profile.tls,
            skip_cert_verify: self.profile.skip_cert_verify,
        }
    }
}

/// Serializes a rendered document to YAML.
///
/// # Errors
///
/// Returns [`Error::Render`] when serialization fails.
pub fn to_yaml<T: Serialize,>(document: &T,) -> Result<String, Error,>
{
    serde_yaml::to_string(document,).map_err(|source| Error::Render {
        source,
    },)
}
