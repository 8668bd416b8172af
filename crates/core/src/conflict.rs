use serde::{Deserialize, Serialize};

/// Resolution state of a detected field-level conflict. Starts `Pending`;
/// once a decision is recorded it never reopens automatically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    Pending,
    UseLocal,
    UseExternal,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::UseLocal => "use_local",
            Self::UseExternal => "use_external",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "use_local" => Some(Self::UseLocal),
            "use_external" => Some(Self::UseExternal),
            _ => None,
        }
    }
}
