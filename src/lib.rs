pub mod digest;
pub mod error;
pub mod job;
pub mod observability;
pub mod outputs;
pub mod pipeline;
pub mod process;
pub mod report;
pub mod runner;
pub mod stages;
pub mod validation;

pub use error::{PipelineError, PipelineResult};
pub use job::JobConfig;
pub use pipeline::{PipelineExecutor, PipelineOutput, PipelinePlan, PipelineState};
pub use process::{InvocationResult, ProcessInvoker, SystemInvoker};
pub use runner::run_bounded;
