use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Beginner,
    Intermediate,
    Advanced,
    Unknown,
}

impl Category {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "beginner" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }

    /// Map the border colour the listing uses to mark difficulty.
    pub fn from_color(hex: &str) -> Self {
        match hex.trim().to_ascii_lowercase().as_str() {
            "#28a745" => Self::Beginner,
            "#ffc107" => Self::Intermediate,
            "#dc3545" => Self::Advanced,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linux,
    Windows,
    Unknown,
}

impl Platform {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "linux" => Some(Self::Linux),
            "windows" => Some(Self::Windows),
            _ => None,
        }
    }

    /// Detect the platform from an icon's `src`/`title` attributes.
    pub fn from_icon(src: &str, title: &str) -> Option<Self> {
        let src = src.to_ascii_lowercase();
        let title = title.to_ascii_lowercase();
        if src.contains("linux") || title.contains("linux") {
            Some(Self::Linux)
        } else if src.contains("windows") || title.contains("windows") {
            Some(Self::Windows)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Completed,
}

impl Status {
    /// Recognise a status badge. Labels outside the known vocabulary yield `None`
    /// so the caller can keep scanning other badges.
    pub fn from_badge(text: &str) -> Option<Self> {
        match text.trim().to_ascii_uppercase().as_str() {
            "TO HACK" | "PENDING" => Some(Self::Pending),
            "DONE" | "PWNED" | "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "TO HACK",
            Self::Completed => "DONE",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub creator: String,
    pub size_label: String,
    pub category: Category,
    pub platform: Platform,
    pub status: Status,
}

impl Record {
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    pub fn size_magnitude(&self) -> f64 {
        size_magnitude(&self.size_label)
    }
}

/// Deduplication and reconciliation key: trimmed and lower-cased.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Leading numeric token of a size label such as `"350 MB"`. Labels without a
/// parsable leading number have magnitude zero.
pub fn size_magnitude(label: &str) -> f64 {
    match label.split_whitespace().next() {
        Some(token) => token.parse::<f64>().unwrap_or(0.0),
        None => 0.0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationMarker(String);

impl PaginationMarker {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Page count from the segment after the last `/`. Anything unparsable, and a
    /// zero count, is treated as a single page.
    pub fn total_pages(&self) -> u32 {
        let tail = match self.0.rsplit_once('/') {
            Some((_, tail)) => tail,
            None => self.0.as_str(),
        };
        match tail.trim().parse::<u32>() {
            Ok(total) if total >= 1 => total,
            _ => 1,
        }
    }
}

impl fmt::Display for PaginationMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct PageResult {
    pub page: u32,
    pub records: Vec<Record>,
    pub marker: PaginationMarker,
}
