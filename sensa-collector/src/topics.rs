//! Routing keys on the `parse_results` exchange

pub const USERS: &str = "users";
pub const SNAPSHOTS: &str = "snapshots";
pub const POSE: &str = "pose";
pub const FEELINGS: &str = "feelings";
pub const COLOR_IMAGE: &str = "color_image";
pub const DEPTH_IMAGE: &str = "depth_image";

/// Every topic the saver binds by default
pub const ALL: &[&str] = &[USERS, SNAPSHOTS, POSE, FEELINGS, COLOR_IMAGE, DEPTH_IMAGE];
