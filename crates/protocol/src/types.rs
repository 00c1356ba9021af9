use serde::{Deserialize, Serialize};

/// Scheduling priority of a transfer.
///
/// Variants are declared in ascending order so `Ord` ranks `High` above
/// `Normal` above `Low`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "low")]
    Low,
    #[default]
    #[serde(rename = "normal")]
    Normal,
    #[serde(rename = "high")]
    High,
}

impl Priority {
    /// Returns the next level up, saturating at `High`.
    pub fn promote(self) -> Self {
        match self {
            Priority::Low => Priority::Normal,
            Priority::Normal | Priority::High => Priority::High,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Lifecycle state of a transfer on the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    #[serde(rename = "initiated")]
    Initiated,
    #[serde(rename = "uploading")]
    Uploading,
    #[serde(rename = "complete_pending_assembly")]
    CompletePendingAssembly,
    #[serde(rename = "assembled")]
    Assembled,
    #[serde(rename = "verified")]
    Verified,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl TransferStatus {
    /// Returns `true` for states no further chunk or assembly work can change.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Verified | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }

    /// Returns `true` if the transfer no longer accepts chunks.
    pub fn is_closed(self) -> bool {
        matches!(self, TransferStatus::Failed | TransferStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Initiated => "initiated",
            TransferStatus::Uploading => "uploading",
            TransferStatus::CompletePendingAssembly => "complete_pending_assembly",
            TransferStatus::Assembled => "assembled",
            TransferStatus::Verified => "verified",
            TransferStatus::Failed => "failed",
            TransferStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful chunk upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkOutcome {
    /// The chunk was persisted by this request.
    #[serde(rename = "stored")]
    Stored,
    /// The chunk was already stored with the same checksum.
    #[serde(rename = "duplicate")]
    Duplicate,
}

/// Why an assembly did not verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// One or more stored chunks no longer match their own checksum.
    #[serde(rename = "chunk_corruption")]
    ChunkCorruption,
    /// Every chunk is healthy but the concatenation does not match the
    /// declared overall checksum.
    #[serde(rename = "assembly_corruption")]
    AssemblyCorruption,
}

/// Details of a failed assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyFailure {
    pub reason: FailureReason,
    /// Chunk indices whose stored bytes differ from their recorded checksum.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suspect_chunks: Vec<u32>,
    pub message: String,
}
