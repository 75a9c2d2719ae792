//! Resource categories

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CacheError;

/// Kind of crawled resource a cache entry holds
///
/// Every category has its own TTL, memory capacity and SWR policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Per-URL crawl metadata
    Url,
    /// Downloaded asset bytes (scripts, stylesheets, images)
    Asset,
    /// Rendered page screenshots
    Screenshot,
    /// OCR output for a screenshot or image
    Ocr,
    /// Extracted training samples
    TrainingSample,
}

impl Category {
    /// Number of categories
    pub const COUNT: usize = 5;

    /// All categories in index order
    pub const ALL: [Category; Category::COUNT] = [
        Category::Url,
        Category::Asset,
        Category::Screenshot,
        Category::Ocr,
        Category::TrainingSample,
    ];

    /// Stable label used in storage keys and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Url => "url",
            Category::Asset => "asset",
            Category::Screenshot => "screenshot",
            Category::Ocr => "ocr",
            Category::TrainingSample => "training_sample",
        }
    }

    /// Dense index, for per-category arrays
    pub fn index(&self) -> usize {
        match self {
            Category::Url => 0,
            Category::Asset => 1,
            Category::Screenshot => 2,
            Category::Ocr => 3,
            Category::TrainingSample => 4,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| CacheError::InvalidInput(format!("unknown category: {s}")))
    }
}
