#![allow(dead_code)]

use std::time::Duration;

pub const MODEL_1_ID: &str = "m1";
pub const MODEL_2_ID: &str = "m2";
pub const MODEL_6_ID: &str = "m6";

/// Ids served by the "all" and "marketplace" views.
pub const CATALOG_MODEL_IDS: [&str; 6] = ["m1", "m2", "m3", "m4", "m5", "m6"];

pub const TOOL_1_ID: &str = "filesystem";

pub const VIEW_ALL: &str = "all";
pub const VIEW_OWNED: &str = "owned";
pub const VIEW_MARKETPLACE: &str = "marketplace";
pub const VIEW_TOOLS: &str = "tools";

pub const THROTTLE_INTERVAL_MS: u64 = 20;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
