//! Snapshot parsers
//!
//! Each parser projects one part of a raw snapshot into a JSON result and
//! names the `parse_results` topic it is published on. Parsers are
//! independent of one another and of message order.
//!
//! | Parser        | Topic         | Output                                     |
//! |---------------|---------------|--------------------------------------------|
//! | `pose`        | `pose`        | translation and rotation                   |
//! | `feelings`    | `feelings`    | hunger, thirst, exhaustion, happiness      |
//! | `color_image` | `color_image` | raw RGB written under `data_dir`, its path |
//! | `depth_image` | `depth_image` | LE f32 depths written under `data_dir`     |

pub mod color_image;
pub mod consumer;
pub mod depth_image;
pub mod feelings;
pub mod pose;

use crate::error::{Error, Result};
use crate::records::ParsedResult;
use sensa_wire::Snapshot;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub use consumer::{ParserConsumer, parse_file};

/// Projects one snapshot part
pub trait Parser: Send + Sync {
    /// Registry name
    fn name(&self) -> &'static str;

    /// `parse_results` routing key
    fn topic(&self) -> &'static str;

    fn parse(&self, user_id: u64, snapshot: &Snapshot) -> Result<ParsedResult>;
}

/// Shared inputs for parser construction
#[derive(Debug, Clone)]
pub struct ParserContext {
    /// Root for files parsers write alongside their results
    pub data_dir: PathBuf,
}

impl ParserContext {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

type ParserConstructor = fn(&ParserContext) -> Box<dyn Parser>;

/// Name → parser constructor
#[derive(Clone)]
pub struct ParserRegistry {
    constructors: BTreeMap<&'static str, ParserConstructor>,
}

impl ParserRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self {
            constructors: BTreeMap::new(),
        };
        registry.register(pose::NAME, |_| Box::new(pose::PoseParser));
        registry.register(feelings::NAME, |_| Box::new(feelings::FeelingsParser));
        registry.register(color_image::NAME, |ctx| {
            Box::new(color_image::ColorImageParser::new(ctx.data_dir()))
        });
        registry.register(depth_image::NAME, |ctx| {
            Box::new(depth_image::DepthImageParser::new(ctx.data_dir()))
        });
        registry
    }

    pub fn register(&mut self, name: &'static str, constructor: ParserConstructor) {
        self.constructors.insert(name, constructor);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }

    /// Build the parser registered under `name`.
    pub fn create(&self, name: &str, context: &ParserContext) -> Result<Box<dyn Parser>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| Error::UnknownParser(name.to_string()))?;
        Ok(constructor(context))
    }
}

impl fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}

/// `<data_dir>/<kind>/<user_id>/<snapshot_id>.<ext>`
pub(crate) fn artifact_path(
    data_dir: &Path,
    kind: &str,
    user_id: u64,
    snapshot_id: u64,
    ext: &str,
) -> PathBuf {
    data_dir
        .join(kind)
        .join(user_id.to_string())
        .join(format!("{}.{}", snapshot_id, ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        let registry = ParserRegistry::builtin();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["color_image", "depth_image", "feelings", "pose"]
        );
    }

    #[test]
    fn test_create_by_name() {
        let registry = ParserRegistry::builtin();
        let context = ParserContext::new("data");
        for name in registry.names() {
            let parser = registry.create(name, &context).unwrap();
            assert_eq!(parser.name(), name);
            assert_eq!(parser.topic(), name);
        }
    }

    #[test]
    fn test_unknown_parser() {
        let err = ParserRegistry::builtin()
            .create("mood", &ParserContext::new("data"))
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Parser \"mood\" does not exist");
    }

    #[test]
    fn test_artifact_path() {
        let path = artifact_path(Path::new("/d"), "color_images", 42, 1000, "rgb");
        assert_eq!(path, PathBuf::from("/d/color_images/42/1000.rgb"));
    }
}
