//! Snapshot and user records carried over the collector link.
//!
//! These are protobuf messages (via `prost` derives) so the encoding is
//! compact, reversible and keeps field ids stable. The same structs also
//! derive `serde` so the reference client can build them from JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Gender as recorded in the capture header
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum Gender {
    Male = 0,
    Female = 1,
    Other = 2,
}

impl Gender {
    /// Lowercase display name used in published projections
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }

    /// Parse a display name (`"male"`, `"f"`, `"Other"`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "male" | "m" => Some(Gender::Male),
            "female" | "f" => Some(Gender::Female),
            "other" | "o" => Some(Gender::Other),
            _ => None,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User identity sent once per capture session
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct UserData {
    #[prost(uint64, tag = "1")]
    pub user_id: u64,
    #[prost(string, tag = "2")]
    pub username: String,
    /// Seconds since the Unix epoch
    #[prost(uint32, tag = "3")]
    pub birthday: u32,
    #[prost(enumeration = "Gender", tag = "4")]
    #[serde(with = "gender_field")]
    pub gender: i32,
}

impl UserData {
    pub fn new(user_id: u64, username: impl Into<String>, birthday: u32, gender: Gender) -> Self {
        Self {
            user_id,
            username: username.into(),
            birthday,
            gender: gender as i32,
        }
    }
}

/// One capture. Every part is optional; a session may record any subset.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct Snapshot {
    /// Capture time in milliseconds since the epoch. Doubles as snapshot id.
    #[prost(uint64, tag = "1")]
    pub datetime: u64,
    #[prost(message, optional, tag = "2")]
    #[serde(default)]
    pub pose: Option<Pose>,
    #[prost(message, optional, tag = "3")]
    #[serde(default)]
    pub color_image: Option<ColorImage>,
    #[prost(message, optional, tag = "4")]
    #[serde(default)]
    pub depth_image: Option<DepthImage>,
    #[prost(message, optional, tag = "5")]
    #[serde(default)]
    pub feelings: Option<Feelings>,
}

impl Snapshot {
    /// An empty snapshot taken at `datetime` (ms since epoch).
    pub fn at(datetime: u64) -> Self {
        Self {
            datetime,
            ..Default::default()
        }
    }

    /// Snapshot id; currently the capture timestamp.
    pub fn id(&self) -> u64 {
        self.datetime
    }
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct Pose {
    #[prost(message, optional, tag = "1")]
    #[serde(default)]
    pub translation: Option<Translation>,
    #[prost(message, optional, tag = "2")]
    #[serde(default)]
    pub rotation: Option<Rotation>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct Translation {
    #[prost(double, tag = "1")]
    pub x: f64,
    #[prost(double, tag = "2")]
    pub y: f64,
    #[prost(double, tag = "3")]
    pub z: f64,
}

/// Orientation quaternion
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct Rotation {
    #[prost(double, tag = "1")]
    pub x: f64,
    #[prost(double, tag = "2")]
    pub y: f64,
    #[prost(double, tag = "3")]
    pub z: f64,
    #[prost(double, tag = "4")]
    pub w: f64,
}

/// Row-major RGB, 3 bytes per pixel
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct ColorImage {
    #[prost(uint32, tag = "1")]
    pub width: u32,
    #[prost(uint32, tag = "2")]
    pub height: u32,
    #[prost(bytes = "vec", tag = "3")]
    #[serde(default)]
    pub data: Vec<u8>,
}

impl ColorImage {
    /// Whether `data` holds exactly `width * height` pixels.
    pub fn is_consistent(&self) -> bool {
        self.data.len() as u64 == u64::from(self.width) * u64::from(self.height) * 3
    }
}

/// Row-major depth values, one f32 per pixel
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct DepthImage {
    #[prost(uint32, tag = "1")]
    pub width: u32,
    #[prost(uint32, tag = "2")]
    pub height: u32,
    #[prost(float, repeated, tag = "3")]
    #[serde(default)]
    pub data: Vec<f32>,
}

impl DepthImage {
    pub fn is_consistent(&self) -> bool {
        self.data.len() as u64 == u64::from(self.width) * u64::from(self.height)
    }
}

/// Self-reported state, each in [0, 1]
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct Feelings {
    #[prost(float, tag = "1")]
    pub hunger: f32,
    #[prost(float, tag = "2")]
    pub thirst: f32,
    #[prost(float, tag = "3")]
    pub exhaustion: f32,
    #[prost(float, tag = "4")]
    pub happiness: f32,
}

impl Feelings {
    /// Name of the first value outside [0, 1], if any.
    pub fn out_of_range(&self) -> Option<&'static str> {
        [
            ("hunger", self.hunger),
            ("thirst", self.thirst),
            ("exhaustion", self.exhaustion),
            ("happiness", self.happiness),
        ]
        .into_iter()
        .find(|(_, v)| !(0.0..=1.0).contains(v))
        .map(|(name, _)| name)
    }
}

/// Serialize the raw `i32` gender tag as its lowercase name.
mod gender_field {
    use super::Gender;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &i32, serializer: S) -> Result<S::Ok, S::Error> {
        let gender = Gender::try_from(*value).unwrap_or(Gender::Other);
        serializer.serialize_str(gender.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
        let name = String::deserialize(deserializer)?;
        Gender::from_name(&name)
            .map(|g| g as i32)
            .ok_or_else(|| D::Error::custom(format!("unknown gender \"{}\"", name)))
    }
}
