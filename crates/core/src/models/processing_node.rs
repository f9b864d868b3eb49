use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 节点对库的限制方式
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LibraryRestriction {
    #[default]
    All,
    Only,
    AllExcept,
}

/// 处理节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingNode {
    pub uid: Uuid,
    pub name: String,
    /// 主机名
    pub address: String,
    pub enabled: bool,
    #[serde(default)]
    pub version: String,
    /// 单位MB，None或0表示不限制
    #[serde(default)]
    pub max_file_size_mb: Option<u64>,
    #[serde(default)]
    pub library_restriction: LibraryRestriction,
    #[serde(default)]
    pub libraries: Vec<Uuid>,
    #[serde(default)]
    pub is_internal: bool,
    /// 远程派发Runner时使用的节点地址
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_runners")]
    pub max_runners: u32,
}

fn default_max_runners() -> u32 {
    1
}

impl ProcessingNode {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            uid: Uuid::new_v4(),
            address: name.clone(),
            name,
            enabled: true,
            version: version.into(),
            max_file_size_mb: None,
            library_restriction: LibraryRestriction::All,
            libraries: Vec::new(),
            is_internal: false,
            base_url: None,
            max_runners: default_max_runners(),
        }
    }

    pub fn max_file_size_bytes(&self) -> Option<u64> {
        self.max_file_size_mb
            .filter(|mb| *mb > 0)
            .map(|mb| mb.saturating_mul(1024 * 1024))
    }

    /// 按限制方式判断节点是否可处理该库
    pub fn allows_library(&self, library_uid: &Uuid) -> bool {
        match self.library_restriction {
            LibraryRestriction::All => true,
            LibraryRestriction::Only => self.libraries.contains(library_uid),
            LibraryRestriction::AllExcept => !self.libraries.contains(library_uid),
        }
    }

    pub fn is_versioned(&self) -> bool {
        !self.version.trim().is_empty()
    }
}
