use crate::domain::ModuleKind;

/// Events emitted while a task runs through its chain.
///
/// Sent on a broadcast channel; a missing or lagging subscriber never slows
/// the pipeline down.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Chain constructed, targets about to be fed.
    TaskStarted {
        task_id: String,
        modules: Vec<ModuleKind>,
    },
    /// A link received its first item.
    ModuleStarted { task_id: String, module: ModuleKind },
    /// A link drained and its downstream finished.
    ModuleFinished {
        task_id: String,
        module: ModuleKind,
        accepted: usize,
    },
    /// A result passed dedup and was forwarded.
    ResultAccepted {
        task_id: String,
        module: ModuleKind,
        dedup_key: String,
    },
    /// The whole chain drained.
    TaskCompleted {
        task_id: String,
        accepted: usize,
        duration_secs: f64,
    },
}

impl PipelineEvent {
    pub fn task_id(&self) -> &str {
        match self {
            PipelineEvent::TaskStarted { task_id, .. }
            | PipelineEvent::ModuleStarted { task_id, .. }
            | PipelineEvent::ModuleFinished { task_id, .. }
            | PipelineEvent::ResultAccepted { task_id, .. }
            | PipelineEvent::TaskCompleted { task_id, .. } => task_id,
        }
    }
}
