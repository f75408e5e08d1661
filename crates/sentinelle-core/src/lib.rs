pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod fabric;
pub mod guard;
pub mod job;
pub mod job_queue;
pub mod models;
pub mod scheduler;
pub mod selector;
pub mod stages;
pub mod stats;
pub mod traits;
pub mod worker;


pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use config::{PipelineConfig, RetentionConfig};
pub use error::AppError;
pub use fabric::Fabric;
pub use guard::DispatchGuard;
pub use job::{EnqueueOptions, FabricConfig, Job, JobPayload, JobState, QueueName};
pub use job_queue::JobQueue;
pub use models::compute_hash;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use selector::DuePolicy;
pub use traits::{
    AlertStore, AnalysisProvider, Collector, MentionStore, NotificationSink, ReportStore,
    SourceRegistry, StatsStore,
};
pub use worker::{JobHandler, QueueWorker, TracingWorkerReporter, WorkerReporter};
