use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fileflow_core::{traits::ProcessingNodeRepository, ProcessingNode, SchedulerResult};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct InMemoryProcessingNodeRepository {
    nodes: Arc<RwLock<HashMap<Uuid, ProcessingNode>>>,
}

impl InMemoryProcessingNodeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(nodes: Vec<ProcessingNode>) -> Self {
        let map = nodes.into_iter().map(|n| (n.uid, n)).collect();
        Self {
            nodes: Arc::new(RwLock::new(map)),
        }
    }
}

#[async_trait]
impl ProcessingNodeRepository for InMemoryProcessingNodeRepository {
    async fn list(&self) -> SchedulerResult<Vec<ProcessingNode>> {
        let nodes = self.nodes.read().await;
        let mut list: Vec<ProcessingNode> = nodes.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then(a.uid.cmp(&b.uid)));
        Ok(list)
    }

    async fn get_by_id(&self, uid: Uuid) -> SchedulerResult<Option<ProcessingNode>> {
        Ok(self.nodes.read().await.get(&uid).cloned())
    }

    async fn upsert(&self, node: &ProcessingNode) -> SchedulerResult<()> {
        self.nodes.write().await.insert(node.uid, node.clone());
        Ok(())
    }
}
