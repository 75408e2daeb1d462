use serde::{Deserialize, Serialize};

/// A transfer-ready attachment: base64 payload plus the metadata Xray
/// expects on each evidence entry.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub data: String,
    pub filename: String,
    pub content_type: String,
}
