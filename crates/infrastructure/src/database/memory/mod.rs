//! 仓储的内存实现
//!
//! 单进程部署和测试使用。所有写操作都在 `RwLock` 写锁内完成，
//! 因此 `compare_and_set_status` 的检查与写入天然是一个原子步骤。

mod library_file_repository;
mod library_repository;
mod node_repository;

pub use library_file_repository::InMemoryLibraryFileRepository;
pub use library_repository::InMemoryLibraryRepository;
pub use node_repository::InMemoryProcessingNodeRepository;
