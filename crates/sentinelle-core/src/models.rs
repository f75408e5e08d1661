use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, DateTime, Days, Months, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::AppError;

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Collector kind behind a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    Twitter,
    Facebook,
    Instagram,
    Linkedin,
    GoogleReviews,
    Trustpilot,
    Tripadvisor,
    Youtube,
    Reddit,
    News,
    Blog,
    Forum,
    Rss,
    Yelp,
    Web,
    Other,
}

impl SourceType {
    pub const ALL: [SourceType; 16] = [
        SourceType::Twitter,
        SourceType::Facebook,
        SourceType::Instagram,
        SourceType::Linkedin,
        SourceType::GoogleReviews,
        SourceType::Trustpilot,
        SourceType::Tripadvisor,
        SourceType::Youtube,
        SourceType::Reddit,
        SourceType::News,
        SourceType::Blog,
        SourceType::Forum,
        SourceType::Rss,
        SourceType::Yelp,
        SourceType::Web,
        SourceType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Twitter => "TWITTER",
            SourceType::Facebook => "FACEBOOK",
            SourceType::Instagram => "INSTAGRAM",
            SourceType::Linkedin => "LINKEDIN",
            SourceType::GoogleReviews => "GOOGLE_REVIEWS",
            SourceType::Trustpilot => "TRUSTPILOT",
            SourceType::Tripadvisor => "TRIPADVISOR",
            SourceType::Youtube => "YOUTUBE",
            SourceType::Reddit => "REDDIT",
            SourceType::News => "NEWS",
            SourceType::Blog => "BLOG",
            SourceType::Forum => "FORUM",
            SourceType::Rss => "RSS",
            SourceType::Yelp => "YELP",
            SourceType::Web => "WEB",
            SourceType::Other => "OTHER",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        SourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| format!("Unknown source type: {s}"))
    }
}

/// A monitored collection target owned by a brand.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub brand_id: Uuid,
    pub name: String,
    pub source_type: SourceType,
    /// Target URL from the source configuration, when the collector needs one.
    pub url: Option<String>,
    pub active: bool,
    /// Per-source override; `None` means the scheduler default.
    pub collection_interval: Option<TimeDelta>,
    pub last_collected_at: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub last_error: Option<String>,
}

/// Result of one collection attempt, fed back into source bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionOutcome {
    Success,
    Failure { error: String },
}

/// Source state after a bookkeeping update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStatus {
    pub error_count: u32,
    pub active: bool,
}

// ---------------------------------------------------------------------------
// Mentions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    Mixed,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
            Sentiment::Mixed => "mixed",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "neutral" => Ok(Sentiment::Neutral),
            "negative" => Ok(Sentiment::Negative),
            "mixed" => Ok(Sentiment::Mixed),
            _ => Err(format!("Unknown sentiment: {s}")),
        }
    }
}

/// One raw item returned by a collector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectedItem {
    #[serde(default)]
    pub external_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// A collected content item.
#[derive(Debug, Clone, Serialize)]
pub struct Mention {
    pub id: Uuid,
    pub source_id: Uuid,
    pub brand_id: Uuid,
    pub organization_id: Uuid,
    pub external_id: String,
    pub content: String,
    pub author: Option<String>,
    pub url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
    pub sentiment: Option<Sentiment>,
    pub sentiment_score: Option<f64>,
    pub emotions: Vec<String>,
    pub virality_score: Option<f64>,
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl Mention {
    pub fn is_analyzed(&self) -> bool {
        self.analyzed_at.is_some()
    }
}

/// DTO for inserting a mention in its unanalyzed form.
#[derive(Debug, Clone, Serialize)]
pub struct NewMention {
    pub source_id: Uuid,
    pub brand_id: Uuid,
    pub organization_id: Uuid,
    pub external_id: String,
    pub content: String,
    pub author: Option<String>,
    pub url: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl NewMention {
    /// Build the insert DTO for an item collected from `source`.
    ///
    /// Items without an external id get a content-derived one so that
    /// re-collecting the same item maps onto the same unique key.
    pub fn from_item(source: &Source, item: &CollectedItem, collected_at: DateTime<Utc>) -> Self {
        let external_id = match item.external_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => compute_hash(&format!(
                "{}\n{}",
                item.url.as_deref().unwrap_or_default(),
                item.content
            )),
        };

        Self {
            source_id: source.id,
            brand_id: source.brand_id,
            organization_id: source.organization_id,
            external_id,
            content: item.content.clone(),
            author: item.author.clone(),
            url: item.url.clone(),
            published_at: item.published_at.unwrap_or(collected_at),
        }
    }
}

/// Outcome of `MentionStore::upsert_if_absent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub created: bool,
    pub id: Uuid,
}

/// Sentiment/virality scores returned by the analysis provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub sentiment: Sentiment,
    pub score: f64,
    #[serde(default)]
    pub emotions: Vec<String>,
    #[serde(alias = "viralityScore")]
    pub virality_score: f64,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(AlertSeverity::Low),
            "medium" => Ok(AlertSeverity::Medium),
            "high" => Ok(AlertSeverity::High),
            "critical" => Ok(AlertSeverity::Critical),
            _ => Err(format!("Unknown alert severity: {s}")),
        }
    }
}

/// The condition that raised an alert. One alert per (mention, kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ViralRisk,
    NegativeSentiment,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::ViralRisk => "viral_risk",
            AlertKind::NegativeSentiment => "negative_sentiment",
        }
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viral_risk" => Ok(AlertKind::ViralRisk),
            "negative_sentiment" => Ok(AlertKind::NegativeSentiment),
            _ => Err(format!("Unknown alert kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub mention_id: Uuid,
    pub organization_id: Uuid,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    /// Set once every recipient has been notified.
    pub notified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewAlert {
    pub mention_id: Uuid,
    pub organization_id: Uuid,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Email,
    Sms,
    Push,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Sms => "sms",
            NotificationChannel::Push => "push",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "email" => Ok(NotificationChannel::Email),
            "sms" => Ok(NotificationChannel::Sms),
            "push" => Ok(NotificationChannel::Push),
            _ => Err(format!("Unknown notification channel: {s}")),
        }
    }
}

/// Where an alert notification goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub channel: NotificationChannel,
    pub target: String,
}

// ---------------------------------------------------------------------------
// Aggregates and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
        }
    }

    /// Half-open UTC window `[start, end)` of this period containing `date`.
    ///
    /// Weekly windows are ISO weeks starting on Monday.
    pub fn window(&self, date: NaiveDate) -> Result<TimeWindow, AppError> {
        let overflow = || AppError::InvalidPayload(format!("date out of range: {date}"));

        let (first, next) = match self {
            Period::Daily => (date, date.checked_add_days(Days::new(1)).ok_or_else(overflow)?),
            Period::Weekly => {
                let monday = date
                    .checked_sub_days(Days::new(u64::from(
                        date.weekday().num_days_from_monday(),
                    )))
                    .ok_or_else(overflow)?;
                (
                    monday,
                    monday.checked_add_days(Days::new(7)).ok_or_else(overflow)?,
                )
            }
            Period::Monthly => {
                let first = date
                    .checked_sub_days(Days::new(u64::from(date.day0())))
                    .ok_or_else(overflow)?;
                (
                    first,
                    first
                        .checked_add_months(Months::new(1))
                        .ok_or_else(overflow)?,
                )
            }
        };

        Ok(TimeWindow {
            start: first.and_time(NaiveTime::MIN).and_utc(),
            end: next.and_time(NaiveTime::MIN).and_utc(),
        })
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            _ => Err(format!("Unknown period: {s}")),
        }
    }
}

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// Computed statistics over a set of mentions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_mentions: u64,
    pub positive_mentions: u64,
    pub neutral_mentions: u64,
    pub negative_mentions: u64,
    pub mixed_mentions: u64,
    pub unanalyzed_mentions: u64,
    pub average_sentiment_score: f64,
    pub average_virality_score: f64,
    /// Mention count keyed by source id.
    pub source_breakdown: std::collections::BTreeMap<String, u64>,
    pub top_emotions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_count: Option<u64>,
}

/// Aggregated statistics snapshot keyed by (organization, date, period).
#[derive(Debug, Clone, Serialize)]
pub struct AggregateStat {
    pub organization_id: Uuid,
    pub date: NaiveDate,
    pub period: Period,
    pub window: TimeWindow,
    pub stats: StatsSnapshot,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Processing => "processing",
            ReportStatus::Completed => "completed",
            ReportStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ReportStatus::Pending),
            "processing" => Ok(ReportStatus::Processing),
            "completed" => Ok(ReportStatus::Completed),
            "failed" => Ok(ReportStatus::Failed),
            _ => Err(format!("Unknown report status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// Restricts the report to one brand when set.
    pub brand_id: Option<Uuid>,
    pub period: Period,
    pub window: TimeWindow,
    pub status: ReportStatus,
    pub stats: Option<StatsSnapshot>,
    pub output_ref: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub generated_at: Option<DateTime<Utc>>,
}

/// What the reporting stage writes back onto a report.
#[derive(Debug, Clone)]
pub struct ReportResult {
    pub status: ReportStatus,
    pub stats: Option<StatsSnapshot>,
    pub output_ref: Option<String>,
    pub error_message: Option<String>,
    pub generated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupTarget {
    Mentions,
    Alerts,
    Reports,
    /// Finished job records kept by the queue.
    Logs,
}

impl CleanupTarget {
    pub const ALL: [CleanupTarget; 4] = [
        CleanupTarget::Mentions,
        CleanupTarget::Alerts,
        CleanupTarget::Reports,
        CleanupTarget::Logs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupTarget::Mentions => "mentions",
            CleanupTarget::Alerts => "alerts",
            CleanupTarget::Reports => "reports",
            CleanupTarget::Logs => "logs",
        }
    }
}

impl fmt::Display for CleanupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CleanupTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mentions" => Ok(CleanupTarget::Mentions),
            "alerts" => Ok(CleanupTarget::Alerts),
            "reports" => Ok(CleanupTarget::Reports),
            "logs" => Ok(CleanupTarget::Logs),
            _ => Err(format!("Unknown cleanup target: {s}")),
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
