use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::LibraryFile;

/// 节点请求下一个文件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NextFileRequest {
    pub node_uid: Uuid,
    #[serde(default)]
    pub node_version: String,
    /// 调用方生成的runner UID，同时作为幂等键
    pub runner_uid: Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NextFileStatus {
    Success,
    NoFile,
    NodeNotFound,
    NodeNotEnabled,
    NodeUnversioned,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NextFileResult {
    pub status: NextFileStatus,
    pub file: Option<LibraryFile>,
}

impl NextFileResult {
    pub fn success(file: LibraryFile) -> Self {
        Self {
            status: NextFileStatus::Success,
            file: Some(file),
        }
    }

    pub fn status(status: NextFileStatus) -> Self {
        Self { status, file: None }
    }

    pub fn no_file() -> Self {
        Self::status(NextFileStatus::NoFile)
    }

    pub fn is_success(&self) -> bool {
        self.status == NextFileStatus::Success
    }
}

/// 预览请求：返回排好序的一页候选文件，不做领取
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NextFilePreviewRequest {
    pub node_uid: Uuid,
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_preview_rows")]
    pub rows: usize,
    #[serde(default)]
    pub name_filter: Option<String>,
    #[serde(default)]
    pub max_size_bytes: Option<u64>,
}

fn default_preview_rows() -> usize {
    25
}
