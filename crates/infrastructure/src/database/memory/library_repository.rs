use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fileflow_core::{traits::LibraryRepository, Library, SchedulerResult};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct InMemoryLibraryRepository {
    libraries: Arc<RwLock<HashMap<Uuid, Library>>>,
}

impl InMemoryLibraryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_libraries(libraries: Vec<Library>) -> Self {
        let map = libraries.into_iter().map(|l| (l.uid, l)).collect();
        Self {
            libraries: Arc::new(RwLock::new(map)),
        }
    }
}

#[async_trait]
impl LibraryRepository for InMemoryLibraryRepository {
    async fn list(&self) -> SchedulerResult<Vec<Library>> {
        let libraries = self.libraries.read().await;
        let mut list: Vec<Library> = libraries.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then(a.uid.cmp(&b.uid)));
        Ok(list)
    }

    async fn get_by_id(&self, uid: Uuid) -> SchedulerResult<Option<Library>> {
        Ok(self.libraries.read().await.get(&uid).cloned())
    }

    async fn upsert(&self, library: &Library) -> SchedulerResult<()> {
        self.libraries
            .write()
            .await
            .insert(library.uid, library.clone());
        Ok(())
    }
}
