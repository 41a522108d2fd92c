// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
//
// SPDX-License-Identifier: MIT

//! Deterministic names derived from a device id.
//!
//! Every name written into a document or used as a file path is a pure
//! function of the id, which is what makes regeneration idempotent: running
//! the pipeline twice over the same rows rewrites the same slots with the
//! same bytes.

/// Name of the proxy entry and selection target, e.g. `Phone7`.
pub fn proxy_name(id: u32,) -> String
{
    format!("Phone{id}")
}

/// Key of the provider reference in provider mode, e.g. `phone7`.
pub fn provider_key(id: u32,) -> String
{
    format!("phone{id}")
}

/// Relative output locations for one device.
#[derive(Debug, Clone, PartialEq, Eq,)]
pub struct DeviceSlots
{
    /// Main profile document, e.g. `stash_7.yaml`.
    pub document:   String,
    /// QR image next to the document, e.g. `QR_Phone7.png`.
    pub image:      String,
    /// Provider descriptor, e.g. `providers/proxy_7.yaml`.
    pub descriptor: String,
    /// Client-side cache path of the provider, e.g. `./providers/phone7.yaml`.
    pub cache_path: String,
}

impl DeviceSlots
{
    /// Builds the slot set for `id`.
    ///
    /// # Examples
    ///
    /// ```
    /// use stashgen::DeviceSlots;
    ///
    /// let slots = DeviceSlots::for_device(3,);
    /// assert_eq!(slots.document, "stash_3.yaml");
    /// assert_eq!(slots.image, "QR_Phone3.png");
    /// assert_eq!(slots.descriptor, "providers/proxy_3.yaml");
    /// ```
    pub fn for_device(id: u32,) -> Self
    {
        Self {
            document:   format!("stash_{id}.yaml"),
            image:      format!("QR_{}.png", proxy_name(id,)),
            descriptor: format!("providers/proxy_{id}.yaml"),
            cache_path: format!("./providers/{}.yaml", provider_key(id,)),
        }
    }
}

/// Joins a CDN base and a slot into the public URL, optionally appending a
/// cache-busting `v` query parameter.
///
/// Trailing slashes on `base` and leading slashes on `slot` are collapsed so
/// exactly one separator remains.
///
/// # Examples
///
/// ```
/// use stashgen::public_url;
///
/// assert_eq!(
///     public_url("https://cdn.example/out/", "stash_1.yaml", Some("20250101120000"),),
///     "https://cdn.example/out/stash_1.yaml?v=20250101120000"
/// );
/// assert_eq!(public_url("https://cdn.example/out", "stash_1.yaml", None,), "https://cdn.example/out/stash_1.yaml");
/// ```
pub fn public_url(base: &str, slot: &str, version: Option<&str,>,) -> String
{
    let base = base.trim_end_matches('/',);
    let slot = slot.trim_start_matches('/',);

    let mut url = String::with_capacity(base.len() + slot.len() + 24,);
    url.push_str(base,);
    url.push('/',);
    url.push_str(slot,);

    if let Some(version,) = version.map(str::trim,).filter(|value| !value.is_empty(),) {
        url.push_str("?v=",);
        url.push_str(version,);
    }

    url
}
