// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
//
// SPDX-License-Identifier: MIT

//! Publisher writing rendered documents and their QR codes.
//!
//! Each call writes the document into its slot under the output root, derives
//! the public URL of that slot and encodes the URL into a PNG next to it.
//! Parent directories are created on demand and existing files are
//! overwritten, so repeated runs converge on the same tree.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Component, Path, PathBuf},
};

use serde::Serialize;
use tracing::debug;

use crate::{
    error::{self, Error},
    naming,
    render::{self, RenderedConfig},
};

/// Files written for one published document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize,)]
pub struct PublishedArtifact
{
    /// Location of the written document.
    pub config_path: PathBuf,
    /// Location of the QR image encoding [`Self::public_url`].
    pub image_path:  PathBuf,
    /// URL under which the document is served.
    pub public_url:  String,
}

/// Encodes a string into an image file.
pub trait CodeEncoder
{
    /// Writes an image encoding `payload` to `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] when the payload cannot be encoded and
    /// [`Error::Io`] when the image cannot be written.
    fn encode(&self, payload: &str, destination: &Path,) -> Result<(), Error,>;
}

/// QR encoder producing grayscale PNG files.
#[derive(Debug, Clone, Copy, PartialEq, Eq,)]
pub struct QrPngEncoder
{
    /// Minimum width and height of the generated image in pixels.
    pub min_dimension: u32,
}

impl Default for QrPngEncoder
{
    fn default() -> Self
    {
        Self {
            min_dimension: 256,
        }
    }
}

impl CodeEncoder for QrPngEncoder
{
    fn encode(&self, payload: &str, destination: &Path,) -> Result<(), Error,>
    {
        if payload.is_empty() {
            return Err(Error::encoding("payload is empty",),);
        }

        let code = qrcode::QrCode::new(payload.as_bytes(),)
            .map_err(|e| Error::encoding(format!("{e} ({} bytes)", payload.len()),),)?;
        let image = code
            .render::<image::Luma<u8,>>()
            .min_dimensions(self.min_dimension, self.min_dimension,)
            .build();

        image.save_with_format(destination, image::ImageFormat::Png,).map_err(|e| match e {
            image::ImageError::IoError(source,) => error::io_error(destination, source,),
            other => Error::encoding(other.to_string(),),
        },)
    }
}

/// Slot pair naming where a document and its image go.
#[derive(Debug, Clone, Copy, PartialEq, Eq,)]
pub struct PublishSlot<'a,>
{
    /// Relative path of the document.
    pub document: &'a str,
    /// Relative path of the QR image.
    pub image:    &'a str,
}

/// Writes documents below an output root and encodes their public URLs.
pub struct Publisher
{
    output_root: PathBuf,
    cdn_base:    String,
    encoder:     Box<dyn CodeEncoder,>,
}

impl std::fmt::Debug for Publisher
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_,>,) -> std::fmt::Result
    {
        f.debug_struct("Publisher",)
            .field("output_root", &self.output_root,)
            .field("cdn_base", &self.cdn_base,)
            .finish_non_exhaustive()
    }
}

impl Publisher
{
    /// Creates a publisher using the default [`QrPngEncoder`].
    pub fn new<P: Into<PathBuf,>, S: Into<String,>,>(output_root: P, cdn_base: S,) -> Self
    {
        Self::with_encoder(output_root, cdn_base, QrPngEncoder::default(),)
    }

    /// Creates a publisher with a custom encoder.
    pub fn with_encoder<P, S, E,>(output_root: P, cdn_base: S, encoder: E,) -> Self
    where
        P: Into<PathBuf,>,
        S: Into<String,>,
        E: CodeEncoder + 'static,
    {
        Self {
            output_root: output_root.into(),
            cdn_base:    cdn_base.into(),
            encoder:     Box::new(encoder,),
        }
    }

    /// Output root all slots are relative to.
    pub fn output_root(&self,) -> &Path
    {
        &self.output_root
    }

    /// Writes `document` to `slot.document`, then encodes its public URL into
    /// `slot.image`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for slots escaping the output root,
    /// [`Error::Render`] when the document cannot be serialized,
    /// [`Error::Io`] when a file cannot be written and [`Error::Encoding`]
    /// when the QR code cannot be produced.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use stashgen::{BaseProfile, DeviceRecord, PublishSlot, Publisher, RenderMode, Renderer};
    ///
    /// # fn main() -> Result<(), stashgen::Error> {
    /// let renderer = Renderer::new(BaseProfile::default(), "https://cdn.example/out");
    /// let publisher = Publisher::new("output", "https://cdn.example/out");
    /// let device = DeviceRecord {
    ///     id:       1,
    ///     address:  "1.2.3.4".to_owned(),
    ///     port:     1080,
    ///     username: "u".to_owned(),
    ///     secret:   "p".to_owned(),
    /// };
    /// let rendered = renderer.render(&device, RenderMode::Inline);
    /// let slot = PublishSlot { document: "stash_1.yaml", image: "QR_Phone1.png" };
    /// let artifact = publisher.publish(&rendered.config, slot, None)?;
    /// println!("{}", artifact.public_url);
    /// # Ok(())
    /// # }
    /// ```
    pub fn publish(
        &self,
        document: &RenderedConfig,
        slot: PublishSlot<'_,>,
        version_tag: Option<&str,>,
    ) -> Result<PublishedArtifact, Error,>
    {
        let config_path = self.write_document(slot.document, document,)?;
        let public_url = self.public_url(slot.document, version_tag,);

        let image_path = self.slot_path(slot.image,)?;
        ensure_parent(&image_path,)?;
        self.encoder.encode(&public_url, &image_path,)?;
        debug!("Encoded {} into {}", public_url, image_path.display());

        Ok(PublishedArtifact {
            config_path,
            image_path,
            public_url,
        },)
    }

    /// URL under which `slot` is served.
    pub fn public_url(&self, slot: &str, version_tag: Option<&str,>,) -> String
    {
        naming::public_url(&self.cdn_base, slot, version_tag,)
    }

    /// Serializes `document` as YAML into `slot` without producing an image.
    ///
    /// # Errors
    ///
    /// Same as [`Publisher::publish`] minus encoding failures.
    pub fn write_document<T: Serialize,>(&self, slot: &str, document: &T,) -> Result<PathBuf, Error,>
    {
        let path = self.slot_path(slot,)?;
        let contents = render::to_yaml(document,)?;

        ensure_parent(&path,)?;
        let file = File::create(&path,).map_err(|source| error::io_error(&path, source,),)?;
        let mut writer = BufWriter::new(file,);
        writer
            .write_all(contents.as_bytes(),)
            .map_err(|source| error::io_error(&path, source,),)?;
        writer.flush().map_err(|source| error::io_error(&path, source,),)?;

        debug!("Wrote {}", path.display());
        Ok(path,)
    }

    fn slot_path(&self, slot: &str,) -> Result<PathBuf, Error,>
    {
        let relative = Path::new(slot,);
        let escapes = relative.components().any(|component| {
            !matches!(component, Component::Normal(_) | Component::CurDir)
        },);

        if slot.trim().is_empty() || escapes {
            return Err(Error::validation(format!(
                "publish slot '{slot}' must be a relative path inside the output directory"
            ),),);
        }

        Ok(self.output_root.join(relative,),)
    }
}

fn ensure_parent(path: &Path,) -> Result<(), Error,>
{
    match path.parent() {
        Some(parent,) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent,).map_err(|source| error::io_error(parent, source,),)
        }
        _ => Ok((),),
    }
}

#[cfg(test)]
mod tests
{
    use std::{cell::RefCell, rc::Rc};

    use tempfile::tempdir;

    use super::*;
    use crate::{
        config::{BaseProfile, RenderMode},
        loader::DeviceRecord,
        naming::DeviceSlots,
        render::Renderer,
    };

    const CDN: &str = "https://cdn.example/out";

    #[derive(Clone, Default,)]
    struct RecordingEncoder
    {
        payloads: Rc<RefCell<Vec<String,>,>,>,
    }

    impl CodeEncoder for RecordingEncoder
    {
        fn encode(&self, payload: &str, destination: &Path,) -> Result<(), Error,>
        {
            self.payloads.borrow_mut().push(payload.to_owned(),);
            fs::write(destination, payload,).map_err(|source| error::io_error(destination, source,),)
        }
    }

    fn device() -> DeviceRecord
    {
        DeviceRecord {
            id:       1,
            address:  "1.2.3.4".to_owned(),
            port:     1080,
            username: "u".to_owned(),
            secret:   "p".to_owned(),
        }
    }

    fn slot(slots: &DeviceSlots,) -> PublishSlot<'_,>
    {
        PublishSlot {
            document: &slots.document, image: &slots.image,
        }
    }

    #[test]
    fn publish_writes_document_and_image()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let root = temp.path().join("nested/output",);
        let encoder = RecordingEncoder::default();
        let publisher = Publisher::with_encoder(&root, CDN, encoder.clone(),);
        let rendered = Renderer::new(BaseProfile::default(), CDN,).render(&device(), RenderMode::Inline,);
        let slots = DeviceSlots::for_device(1,);

        let artifact = publisher.publish(&rendered.config, slot(&slots,), None,).expect("publish failed",);

        assert_eq!(artifact.public_url, "https://cdn.example/out/stash_1.yaml");
        assert_eq!(artifact.config_path, root.join("stash_1.yaml"));
        assert_eq!(artifact.image_path, root.join("QR_Phone1.png"));
        let written = fs::read_to_string(&artifact.config_path,).expect("document written",);
        assert!(written.contains("name: Phone1"));
        assert_eq!(encoder.payloads.borrow().as_slice(), ["https://cdn.example/out/stash_1.yaml"]);
    }

    #[test]
    fn version_tag_is_appended_to_the_url_only()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let publisher = Publisher::with_encoder(temp.path(), CDN, RecordingEncoder::default(),);
        let rendered = Renderer::new(BaseProfile::default(), CDN,).render(&device(), RenderMode::Inline,);
        let slots = DeviceSlots::for_device(1,);

        let untagged = publisher.publish(&rendered.config, slot(&slots,), None,).expect("publish failed",);
        let first = fs::read(&untagged.config_path,).expect("document written",);
        let tagged = publisher
            .publish(&rendered.config, slot(&slots,), Some("20250101120000",),)
            .expect("publish failed",);
        let second = fs::read(&tagged.config_path,).expect("document written",);

        assert_eq!(tagged.public_url, "https://cdn.example/out/stash_1.yaml?v=20250101120000");
        assert_eq!(first, second);
    }

    #[test]
    fn qr_encoder_writes_png()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let destination = temp.path().join("code.png",);
        QrPngEncoder::default()
            .encode("https://cdn.example/out/stash_1.yaml", &destination,)
            .expect("encoding failed",);

        let bytes = fs::read(&destination,).expect("image written",);
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn qr_encoder_rejects_empty_and_oversized_payloads()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let destination = temp.path().join("code.png",);

        let empty = QrPngEncoder::default().encode("", &destination,).expect_err("empty payload",);
        assert!(matches!(empty, Error::Encoding { .. }));

        let oversized = "x".repeat(8_000,);
        let error = QrPngEncoder::default().encode(&oversized, &destination,).expect_err("too long",);
        assert!(matches!(error, Error::Encoding { .. }));
        assert!(!destination.exists());
    }

    #[test]
    fn slots_cannot_escape_the_output_root()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let publisher = Publisher::with_encoder(temp.path(), CDN, RecordingEncoder::default(),);

        for slot in ["../stash_1.yaml", "/etc/stash_1.yaml", ""] {
            let error = publisher
                .write_document(slot, &serde_yaml::Value::Null,)
                .expect_err("slot should be rejected",);
            assert!(matches!(error, Error::Validation { .. }), "slot {slot:?} accepted");
        }
    }

    #[test]
    fn write_document_creates_provider_directory()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let publisher = Publisher::with_encoder(temp.path(), CDN, RecordingEncoder::default(),);
        let rendered = Renderer::new(BaseProfile::default(), CDN,).render(&device(), RenderMode::Provider,);
        let descriptor = rendered.descriptor.expect("descriptor",);

        let path = publisher
            .write_document("providers/proxy_1.yaml", &descriptor,)
            .expect("descriptor written",);
        assert_eq!(path, temp.path().join("providers/proxy_1.yaml"));
        assert!(fs::read_to_string(&path,).expect("readable",).starts_with("proxies:\n"));
    }
}
