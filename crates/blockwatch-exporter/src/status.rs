//! Ordinal codes for free-text lifecycle statuses.
//!
//! The position of a status in its vocabulary is exported as a metric
//! value, so dashboards depend on it: entries may be appended, never
//! reordered or removed.

/// An ordered, closed set of known status strings.
#[derive(Debug, Clone, Copy)]
pub struct StatusVocabulary(&'static [&'static str]);

/// Cinder volume statuses.
pub const VOLUME_STATUS: StatusVocabulary = StatusVocabulary(&[
    "creating",
    "available",
    "reserved",
    "attaching",
    "detaching",
    "in-use",
    "maintenance",
    "deleting",
    "awaiting-transfer",
    "error",
    "error_deleting",
    "backing-up",
    "restoring-backup",
    "error_backing-up",
    "error_restoring",
    "error_extending",
    "downloading",
    "uploading",
    "retyping",
    "extending",
]);

impl StatusVocabulary {
    /// Index of `status` (case-insensitive), or -1 if it is not known.
    pub fn ordinal(&self, status: &str) -> i32 {
        let status = status.to_lowercase();
        self.0
            .iter()
            .position(|known| *known == status)
            .map_or(-1, |idx| idx as i32)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn statuses(&self) -> &'static [&'static str] {
        self.0
    }
}
