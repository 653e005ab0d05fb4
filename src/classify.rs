//! # Post classification
//! Pure mapping from a wall post to a [`Category`]. No I/O.
//!
//! Rules run in fixed priority order, first match wins:
//! pinned → video marker → calendar marker → normal.
//! Markers match case-insensitively anywhere in the text.

use serde::{Deserialize, Serialize};

use crate::source::RawPost;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Normal,
    Calendar,
    SkippedVideo,
    SkippedPinned,
}

impl Category {
    /// Skipped posts are marked seen but never delivered.
    pub fn is_skipped(self) -> bool {
        matches!(self, Category::SkippedVideo | Category::SkippedPinned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Normal => "normal",
            Category::Calendar => "calendar",
            Category::SkippedVideo => "skip-video",
            Category::SkippedPinned => "skip-pinned",
        }
    }
}

/// Marker phrases loaded from config (`[markers]`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MarkerSet {
    pub video: Vec<String>,
    pub calendar: Vec<String>,
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self {
            video: vec!["🎥".into(), "📹".into(), "#видео".into(), "#video".into()],
            calendar: vec!["🗓".into(), "📅".into()],
        }
    }
}

pub trait Classifier: Send + Sync {
    fn classify(&self, post: &RawPost) -> Category;
}

/// Default strategy: pinned flag plus marker phrases.
#[derive(Debug, Clone)]
pub struct MarkerClassifier {
    video: Vec<String>,
    calendar: Vec<String>,
}

impl MarkerClassifier {
    pub fn new(markers: &MarkerSet) -> Self {
        Self {
            video: prepare(&markers.video),
            calendar: prepare(&markers.calendar),
        }
    }

    /// Classification only ever looks at these two inputs.
    pub fn classify_parts(&self, text: &str, pinned: bool) -> Category {
        if pinned {
            return Category::SkippedPinned;
        }
        let lc = text.to_lowercase();
        if any_contains(&lc, &self.video) {
            Category::SkippedVideo
        } else if any_contains(&lc, &self.calendar) {
            Category::Calendar
        } else {
            Category::Normal
        }
    }
}

impl Default for MarkerClassifier {
    fn default() -> Self {
        Self::new(&MarkerSet::default())
    }
}

impl Classifier for MarkerClassifier {
    fn classify(&self, post: &RawPost) -> Category {
        self.classify_parts(&post.text, post.pinned)
    }
}

fn prepare(markers: &[String]) -> Vec<String> {
    markers
        .iter()
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .collect()
}

fn any_contains(haystack_lc: &str, needles_lc: &[String]) -> bool {
    needles_lc.iter().any(|n| haystack_lc.contains(n.as_str()))
}
