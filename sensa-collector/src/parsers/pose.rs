//! Pose parser: translation and rotation of the user in world space.

use super::Parser;
use crate::error::{Error, Result};
use crate::records::ParsedResult;
use crate::topics;
use sensa_wire::Snapshot;
use serde_json::json;

pub const NAME: &str = "pose";

pub struct PoseParser;

impl Parser for PoseParser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn topic(&self) -> &'static str {
        topics::POSE
    }

    fn parse(&self, user_id: u64, snapshot: &Snapshot) -> Result<ParsedResult> {
        let pose = snapshot.pose.as_ref().ok_or(Error::MissingField("pose"))?;
        let t = pose
            .translation
            .as_ref()
            .ok_or(Error::MissingField("pose translation"))?;
        let r = pose
            .rotation
            .as_ref()
            .ok_or(Error::MissingField("pose rotation"))?;

        Ok(ParsedResult::new(self.topic(), snapshot.id(), user_id)
            .with("translation", json!({"x": t.x, "y": t.y, "z": t.z}))
            .with("rotation", json!({"x": r.x, "y": r.y, "z": r.z, "w": r.w})))
    }
}
