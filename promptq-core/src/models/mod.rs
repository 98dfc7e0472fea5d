pub mod job;
pub mod result;
pub mod run;
pub mod summary;

pub use job::{
    BatchEnqueueRequest, BatchItem, Job, JobPayload, JobStats, JobStatus, JobType, NewJob,
    ProviderRequestPayload,
};
pub use result::{
    provider_error_answer, NewResult, NewRunResult, ReportedResult, ResultRow, RunResultRow,
    PROVIDER_ERROR_MARKER,
};
pub use run::RunId;
pub use summary::{NewPromptSummary, PromptSummary, SummaryKey};
