pub mod alert_repository;
pub mod config;
pub mod database;
pub mod job_repository;
pub mod mention_repository;
pub mod report_repository;
pub mod source_repository;
pub mod stats_repository;

pub use alert_repository::AlertRepository;
pub use config::DatabaseConfig;
pub use database::Database;
pub use job_repository::PgJobQueue;
pub use mention_repository::MentionRepository;
pub use report_repository::ReportRepository;
pub use source_repository::SourceRepository;
pub use stats_repository::StatsRepository;
