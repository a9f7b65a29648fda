use serde::{Deserialize, Serialize};

/// MRI modalities stacked on the channel axis (T1, T1c, T2, FLAIR).
pub const NUM_MODALITIES: usize = 4;
/// Segmentation classes, one-hot encoded per voxel.
pub const NUM_CLASSES: usize = 5;

pub const CLASS_NAMES: [&str; NUM_CLASSES] = [
    "background",
    "necrosis",
    "edema",
    "non_enhancing",
    "enhancing",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Valid,
}

impl Split {
    pub const ALL: [Split; 2] = [Split::Train, Split::Valid];

    /// Directory name used for data, summary logs, and metric keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
