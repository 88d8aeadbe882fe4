use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use fleetlink_frame::Fault;
use fleetlink_host::{HostOperations, OperationDescription, Repository};
use tracing::{debug, info};

use crate::store::Data;

/// Operations announced by the loaded extension, in registration order.
#[derive(Debug, Default)]
pub struct OperationTable {
    operations: Mutex<Vec<OperationDescription>>,
}

impl OperationTable {
    /// Add an operation, replacing an earlier one with the same name.
    pub fn insert(&self, description: OperationDescription) {
        let mut operations = self.operations.lock().unwrap_or_else(PoisonError::into_inner);
        match operations.iter_mut().find(|op| op.name == description.name) {
            Some(existing) => *existing = description,
            None => operations.push(description),
        }
    }

    pub fn get(&self, name: &str) -> Option<OperationDescription> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|op| op.name == name)
            .cloned()
    }

    pub fn list(&self) -> Vec<OperationDescription> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Host service handed to the extension worker.
#[derive(Debug)]
pub struct ExtensionHost {
    operations: OperationTable,
    data: Data,
}

impl ExtensionHost {
    pub fn new(data: Data) -> Self {
        Self {
            operations: OperationTable::default(),
            data,
        }
    }

    pub fn operations(&self) -> &OperationTable {
        &self.operations
    }
}

#[async_trait]
impl HostOperations for ExtensionHost {
    async fn register_operation(&self, description: OperationDescription) -> Result<(), Fault> {
        info!(operation = %description.name, args = ?description.args, "registering operation");
        self.operations.insert(description);
        Ok(())
    }

    async fn lookup_repository_for_project(
        &self,
        project: String,
    ) -> Result<Option<Repository>, Fault> {
        let repository = self.data.repository_for_project(&project).cloned();
        debug!(project = %project, found = repository.is_some(), "repository lookup");
        Ok(repository)
    }
}
