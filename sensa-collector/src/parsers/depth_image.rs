//! Depth image parser
//!
//! Writes the depth map as little-endian f32 values, row-major, to
//! `<data_dir>/depth_images/<user_id>/<snapshot_id>.f32`.

use super::{Parser, artifact_path};
use crate::error::{Error, Result};
use crate::records::ParsedResult;
use crate::store::write_atomic;
use crate::topics;
use sensa_wire::Snapshot;
use std::path::PathBuf;

pub const NAME: &str = "depth_image";

pub struct DepthImageParser {
    data_dir: PathBuf,
}

impl DepthImageParser {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

impl Parser for DepthImageParser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn topic(&self) -> &'static str {
        topics::DEPTH_IMAGE
    }

    fn parse(&self, user_id: u64, snapshot: &Snapshot) -> Result<ParsedResult> {
        let image = snapshot
            .depth_image
            .as_ref()
            .ok_or(Error::MissingField("depth image"))?;
        if !image.is_consistent() {
            return Err(Error::InvalidField(format!(
                "depth image is {}x{} but carries {} values",
                image.width,
                image.height,
                image.data.len()
            )));
        }

        let bytes: Vec<u8> = image.data.iter().flat_map(|v| v.to_le_bytes()).collect();
        let path = artifact_path(&self.data_dir, "depth_images", user_id, snapshot.id(), "f32");
        write_atomic(&path, &bytes)?;

        Ok(ParsedResult::new(self.topic(), snapshot.id(), user_id)
            .with("width", image.width)
            .with("height", image.height)
            .with("data_path", path.to_string_lossy().into_owned()))
    }
}
