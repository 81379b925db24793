pub mod evaluation;
pub mod execution;
pub mod history;
pub mod job;
pub mod node;
pub mod plan;

pub use evaluation::{EvalTrigger, Evaluation};
pub use execution::{
    Execution, ExecutionDesiredState, ExecutionDesiredStateType, ExecutionState,
    ExecutionStateType,
};
pub use history::{HistoryLevel, JobHistory};
pub use job::{Job, JobState, JobStateType, JobType, ReschedulingPolicy};
pub use node::{NodeInfo, NodeState};
pub use plan::{ExecutionAction, ExecutionUpdate, Plan, StopReason};
