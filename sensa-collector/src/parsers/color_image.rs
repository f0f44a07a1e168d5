//! Color image parser
//!
//! The pixel data is too large to travel through the broker, so it is
//! written to `<data_dir>/color_images/<user_id>/<snapshot_id>.rgb` and only
//! the dimensions and path are published.

use super::{Parser, artifact_path};
use crate::error::{Error, Result};
use crate::records::ParsedResult;
use crate::store::write_atomic;
use crate::topics;
use sensa_wire::Snapshot;
use std::path::PathBuf;

pub const NAME: &str = "color_image";

pub struct ColorImageParser {
    data_dir: PathBuf,
}

impl ColorImageParser {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

impl Parser for ColorImageParser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn topic(&self) -> &'static str {
        topics::COLOR_IMAGE
    }

    fn parse(&self, user_id: u64, snapshot: &Snapshot) -> Result<ParsedResult> {
        let image = snapshot
            .color_image
            .as_ref()
            .ok_or(Error::MissingField("color image"))?;
        if !image.is_consistent() {
            return Err(Error::InvalidField(format!(
                "color image is {}x{} but carries {} bytes",
                image.width,
                image.height,
                image.data.len()
            )));
        }

        let path = artifact_path(&self.data_dir, "color_images", user_id, snapshot.id(), "rgb");
        write_atomic(&path, &image.data)?;
        log::debug!("Wrote color image to {}", path.display());

        Ok(ParsedResult::new(self.topic(), snapshot.id(), user_id)
            .with("width", image.width)
            .with("height", image.height)
            .with("data_path", path.to_string_lossy().into_owned()))
    }
}
