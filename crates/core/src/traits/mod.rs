pub mod clock;
pub mod repository;

pub use clock::{Clock, ManualClock, SystemClock};
pub use repository::{LibraryFileRepository, LibraryRepository, ProcessingNodeRepository};
