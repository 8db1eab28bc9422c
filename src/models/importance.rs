//! Weighted merge of per-model feature importances

use crate::types::prediction::FeatureImportance;
use std::collections::HashMap;

/// Importances reported by one model, together with its ensemble weight
#[derive(Debug, Clone)]
pub struct ImportanceReport {
    pub weight: f64,
    pub importances: Vec<(String, f64)>,
}

/// Merge importance reports into one ranking, highest first.
///
/// Each feature gets `sum(weight * importance) / reporting_models`; the result
/// is renormalised to sum to 1 unless the total is zero. Ties keep first-seen
/// order (report order, then feature order within a report).
pub fn aggregate(reports: &[ImportanceReport]) -> Vec<FeatureImportance> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut totals: Vec<(&str, f64, usize)> = Vec::new();

    for report in reports {
        for (feature, importance) in &report.importances {
            let slot = *index.entry(feature.as_str()).or_insert_with(|| {
                totals.push((feature.as_str(), 0.0, 0));
                totals.len() - 1
            });
            totals[slot].1 += report.weight * importance;
            totals[slot].2 += 1;
        }
    }

    let mut ranking: Vec<FeatureImportance> = totals
        .into_iter()
        .map(|(feature, sum, count)| FeatureImportance {
            feature: feature.to_string(),
            importance: sum / count as f64,
        })
        .collect();

    let total: f64 = ranking.iter().map(|f| f.importance).sum();
    if total > 0.0 {
        for entry in &mut ranking {
            entry.importance /= total;
        }
    }

    // stable sort keeps insertion order on ties
    ranking.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranking
}

/// First `n` entries of a ranking
pub fn top_n(ranking: &[FeatureImportance], n: usize) -> Vec<FeatureImportance> {
    ranking.iter().take(n).cloned().collect()
}
