use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AlertKind, AlertSeverity, CleanupTarget, Period};

/// Named queues of the fabric, one per pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Collection,
    Analysis,
    Alerting,
    Aggregation,
    Reporting,
    Cleanup,
}

impl QueueName {
    pub const ALL: [QueueName; 6] = [
        QueueName::Collection,
        QueueName::Analysis,
        QueueName::Alerting,
        QueueName::Aggregation,
        QueueName::Reporting,
        QueueName::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Collection => "collection",
            QueueName::Analysis => "analysis",
            QueueName::Alerting => "alerting",
            QueueName::Aggregation => "aggregation",
            QueueName::Reporting => "reporting",
            QueueName::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "collection" => Ok(QueueName::Collection),
            "analysis" => Ok(QueueName::Analysis),
            "alerting" => Ok(QueueName::Alerting),
            "aggregation" => Ok(QueueName::Aggregation),
            "reporting" => Ok(QueueName::Reporting),
            "cleanup" => Ok(QueueName::Cleanup),
            _ => Err(format!("Unknown queue: {}", s)),
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    /// Lost its worker; picked up again by stall recovery.
    Stalled,
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 6] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
        JobState::Stalled,
        JobState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Stalled => "stalled",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "stalled" => Ok(JobState::Stalled),
            "cancelled" => Ok(JobState::Cancelled),
            _ => Err(format!("Unknown job state: {}", s)),
        }
    }
}

const MAX_BACKOFF: TimeDelta = TimeDelta::hours(1);

/// Delay between a failed attempt and the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backoff {
    None,
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at one hour.
    Exponential { base: Duration },
}

impl Backoff {
    /// Delay before retrying after `attempt` (1-indexed) failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> TimeDelta {
        let delay = match self {
            Backoff::None => TimeDelta::zero(),
            Backoff::Fixed(d) => TimeDelta::from_std(*d).unwrap_or(MAX_BACKOFF),
            Backoff::Exponential { base } => {
                let exp = attempt.saturating_sub(1).min(20);
                base.checked_mul(1u32 << exp)
                    .and_then(|d| TimeDelta::from_std(d).ok())
                    .unwrap_or(MAX_BACKOFF)
            }
        };
        std::cmp::min(delay, MAX_BACKOFF)
    }

    /// Storage discriminator (`none`, `fixed`, `exponential`).
    pub fn kind(&self) -> &'static str {
        match self {
            Backoff::None => "none",
            Backoff::Fixed(_) => "fixed",
            Backoff::Exponential { .. } => "exponential",
        }
    }

    pub fn base_ms(&self) -> i64 {
        match self {
            Backoff::None => 0,
            Backoff::Fixed(d) | Backoff::Exponential { base: d } => {
                i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
            }
        }
    }

    pub fn from_parts(kind: &str, base_ms: i64) -> Result<Self, String> {
        let base = Duration::from_millis(u64::try_from(base_ms).unwrap_or(0));
        match kind {
            "none" => Ok(Backoff::None),
            "fixed" => Ok(Backoff::Fixed(base)),
            "exponential" => Ok(Backoff::Exponential { base }),
            _ => Err(format!("Unknown backoff kind: {}", kind)),
        }
    }
}

/// Concurrency and retry policy for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl QueuePolicy {
    pub fn new(concurrency: usize, max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            concurrency: concurrency.max(1),
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

/// Configuration shared by every queue consumer of a process.
#[derive(Debug, Clone)]
pub struct FabricConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    /// An active job whose heartbeat is older than this is considered stalled.
    pub stall_timeout: Duration,
    policies: HashMap<QueueName, QueuePolicy>,
}

impl Default for FabricConfig {
    fn default() -> Self {
        let policies = QueueName::ALL
            .into_iter()
            .map(|q| (q, Self::default_policy(q)))
            .collect();

        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            poll_interval: Duration::from_secs(1),
            stall_timeout: Duration::from_secs(60),
            policies,
        }
    }
}

impl FabricConfig {
    pub fn default_policy(queue: QueueName) -> QueuePolicy {
        match queue {
            QueueName::Collection => QueuePolicy::new(
                5,
                3,
                Backoff::Exponential {
                    base: Duration::from_secs(5),
                },
            ),
            QueueName::Analysis => QueuePolicy::new(
                10,
                3,
                Backoff::Exponential {
                    base: Duration::from_secs(2),
                },
            ),
            QueueName::Alerting => {
                QueuePolicy::new(20, 5, Backoff::Fixed(Duration::from_secs(3)))
            }
            QueueName::Aggregation => {
                QueuePolicy::new(3, 2, Backoff::Fixed(Duration::from_secs(5)))
            }
            QueueName::Reporting => {
                QueuePolicy::new(5, 2, Backoff::Fixed(Duration::from_secs(5)))
            }
            QueueName::Cleanup => QueuePolicy::new(1, 1, Backoff::None),
        }
    }

    pub fn policy(&self, queue: QueueName) -> QueuePolicy {
        self.policies
            .get(&queue)
            .copied()
            .unwrap_or_else(|| Self::default_policy(queue))
    }

    pub fn with_policy(mut self, queue: QueueName, policy: QueuePolicy) -> Self {
        self.policies.insert(queue, policy);
        self
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Worker id of the consumer bound to `queue`.
    pub fn consumer_id(&self, queue: QueueName) -> String {
        format!("{}-{}", self.worker_id, queue.as_str())
    }
}

/// Typed job payloads, one variant per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    Collect {
        source_id: Uuid,
    },
    Analyze {
        mention_id: Uuid,
        organization_id: Uuid,
        text: String,
    },
    Alert {
        mention_id: Uuid,
        organization_id: Uuid,
        kind: AlertKind,
        severity: AlertSeverity,
        message: String,
    },
    Aggregate {
        organization_id: Uuid,
        date: NaiveDate,
        period: Period,
    },
    GenerateReport {
        report_id: Uuid,
    },
    Cleanup {
        target: CleanupTarget,
        retention_days: u32,
    },
}

impl JobPayload {
    /// The queue this payload is routed to.
    pub fn queue(&self) -> QueueName {
        match self {
            JobPayload::Collect { .. } => QueueName::Collection,
            JobPayload::Analyze { .. } => QueueName::Analysis,
            JobPayload::Alert { .. } => QueueName::Alerting,
            JobPayload::Aggregate { .. } => QueueName::Aggregation,
            JobPayload::GenerateReport { .. } => QueueName::Reporting,
            JobPayload::Cleanup { .. } => QueueName::Cleanup,
        }
    }

    /// Deduplication key used when the caller does not supply one.
    pub fn default_dedup_key(&self) -> Option<String> {
        match self {
            JobPayload::Collect { source_id } => Some(format!("collection:{source_id}")),
            JobPayload::Analyze { mention_id, .. } => Some(format!("analysis:{mention_id}")),
            JobPayload::Alert { mention_id, .. } => Some(format!("alerting:{mention_id}")),
            JobPayload::GenerateReport { report_id } => Some(format!("reporting:{report_id}")),
            JobPayload::Aggregate {
                organization_id,
                date,
                period,
            } => Some(format!(
                "aggregation:{organization_id}:{date}:{}",
                period.as_str()
            )),
            JobPayload::Cleanup { target, .. } => Some(format!("cleanup:{}", target.as_str())),
        }
    }
}

/// Per-enqueue overrides of the queue policy.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub max_attempts: Option<u32>,
    pub backoff: Option<Backoff>,
    pub delay: Option<Duration>,
    pub dedup_key: Option<String>,
    /// Skip deduplication entirely, even the payload's default key.
    pub no_dedup: bool,
}

impl EnqueueOptions {
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn without_dedup(mut self) -> Self {
        self.no_dedup = true;
        self
    }
}

/// Fully resolved insert request handed to a `JobQueue`.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub queue: QueueName,
    pub payload: JobPayload,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub run_at: DateTime<Utc>,
    pub dedup_key: Option<String>,
}

impl NewJob {
    /// Resolve `options` against the queue policy.
    pub fn resolve(
        payload: JobPayload,
        options: EnqueueOptions,
        policy: QueuePolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let delay = options
            .delay
            .and_then(|d| TimeDelta::from_std(d).ok())
            .unwrap_or_else(TimeDelta::zero);
        let dedup_key = if options.no_dedup {
            None
        } else {
            options.dedup_key.or_else(|| payload.default_dedup_key())
        };

        Self {
            queue: payload.queue(),
            max_attempts: options.max_attempts.unwrap_or(policy.max_attempts).max(1),
            backoff: options.backoff.unwrap_or(policy.backoff),
            run_at: now + delay,
            dedup_key,
            payload,
        }
    }
}

/// A job record in the queue.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub queue: QueueName,
    pub payload: JobPayload,
    pub state: JobState,
    /// Number of times the job has been claimed.
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub run_at: DateTime<Utc>,
    pub dedup_key: Option<String>,
    pub worker_id: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub stalled_count: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn is_final_attempt(&self) -> bool {
        !self.can_retry()
    }

    pub fn next_run_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.backoff.delay_for_attempt(self.attempts)
    }
}

/// Result of an enqueue call.
#[derive(Debug, Clone)]
pub struct Enqueued {
    pub job: Job,
    /// True when an existing non-terminal job with the same dedup key was returned.
    pub deduplicated: bool,
}
