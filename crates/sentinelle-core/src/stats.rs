use std::collections::{BTreeMap, HashMap};

use crate::models::{Mention, Sentiment, StatsSnapshot};

const TOP_EMOTIONS: usize = 5;

/// Summarize a set of mentions.
///
/// Averages are taken over analyzed mentions only and are zero when none
/// are analyzed.
pub fn compute_stats(mentions: &[Mention]) -> StatsSnapshot {
    let mut snapshot = StatsSnapshot {
        total_mentions: mentions.len() as u64,
        ..Default::default()
    };

    let mut sentiment_sum = 0.0;
    let mut virality_sum = 0.0;
    let mut analyzed = 0u64;
    let mut source_breakdown: BTreeMap<String, u64> = BTreeMap::new();

    for mention in mentions {
        *source_breakdown
            .entry(mention.source_id.to_string())
            .or_default() += 1;

        match mention.sentiment {
            Some(Sentiment::Positive) => snapshot.positive_mentions += 1,
            Some(Sentiment::Neutral) => snapshot.neutral_mentions += 1,
            Some(Sentiment::Negative) => snapshot.negative_mentions += 1,
            Some(Sentiment::Mixed) => snapshot.mixed_mentions += 1,
            None => snapshot.unanalyzed_mentions += 1,
        }

        if mention.is_analyzed() {
            analyzed += 1;
            sentiment_sum += mention.sentiment_score.unwrap_or_default();
            virality_sum += mention.virality_score.unwrap_or_default();
        }
    }

    if analyzed > 0 {
        snapshot.average_sentiment_score = sentiment_sum / analyzed as f64;
        snapshot.average_virality_score = virality_sum / analyzed as f64;
    }
    snapshot.source_breakdown = source_breakdown;
    snapshot.top_emotions = top_emotions(mentions.iter().flat_map(|m| m.emotions.iter()));
    snapshot
}

/// Most frequent emotions, ties broken by first appearance, capped at five.
pub fn top_emotions<'a>(emotions: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    // emotion -> (count, first-seen index)
    let mut seen: HashMap<&str, (u64, usize)> = HashMap::new();
    for (idx, emotion) in emotions.into_iter().enumerate() {
        seen.entry(emotion.as_str()).or_insert((0, idx)).0 += 1;
    }

    let mut ranked: Vec<(&str, u64, usize)> = seen
        .into_iter()
        .map(|(emotion, (count, first))| (emotion, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked
        .into_iter()
        .take(TOP_EMOTIONS)
        .map(|(emotion, _, _)| emotion.to_string())
        .collect()
}
