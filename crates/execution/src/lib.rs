//! Execution layer - token resolution, task strategies, scheduling and the
//! job driver.

#![warn(missing_docs)]

pub mod error;
pub mod config;
pub mod resolver;
pub mod extract;
pub mod strategy;
pub mod token;
pub mod worker;
pub mod scheduler;
pub mod engine;
pub mod queue;
pub mod pool;

pub use error::{ExecutionError, Result};
pub use config::WorkerConfig;
pub use resolver::{referenced_tokens, resolve, substitute, substitute_rollback, Scope};
pub use strategy::{
    ActionRequest, ActionStrategy, ApiStrategy, DelayStrategy, Outcome, QueryStrategy, StrategySet,
};
pub use token::{LoginTokenIssuer, StaticTokenIssuer, TokenIssuer};
pub use worker::TaskWorker;
pub use scheduler::{next_eligible, resume_eligible, Completion};
pub use engine::{Dispatch, DispatchKind, JobReport, JobRunner, Report};
pub use queue::{JobQueue, MemoryQueue, QueueHandle};
pub use pool::{ActiveGuard, ActiveJobs, WorkerPool};
