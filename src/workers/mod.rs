pub mod workflow_cleanup;

pub use workflow_cleanup::{WorkflowCleanupQueue, WorkflowCleanupReceiver, workflow_cleanup_worker};
