use crate::common::*;

/// The dataset split.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Validation,
}

/// An image path with its category, without image pixels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExampleRecord {
    /// The image id unique within the split.
    pub id: u64,
    pub path: PathBuf,
    pub category: String,
    /// The index of the category in the label vocabulary.
    pub label: usize,
}
