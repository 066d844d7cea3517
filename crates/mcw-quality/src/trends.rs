use serde::{Deserialize, Serialize};

/// One keyword row from a keyword-research export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordTrend {
    pub keyword: String,
    #[serde(default)]
    pub market: Option<String>,
    pub volume: u64,
    pub growth_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedKeyword {
    pub keyword: String,
    pub market: Option<String>,
    pub volume: u64,
    pub growth_rate: f64,
    pub rising_score: f64,
}

/// `growth_rate * ln(volume + 1)`: growth weighted by the magnitude of search volume.
pub fn rising_score(growth_rate: f64, volume: u64) -> f64 {
    growth_rate * (volume as f64 + 1.0).ln()
}

/// Rank keywords by rising score, highest first. Ties keep input order.
pub fn rank_rising_keywords(trends: &[KeywordTrend]) -> Vec<RankedKeyword> {
    let mut ranked: Vec<RankedKeyword> = trends
        .iter()
        .map(|t| RankedKeyword {
            keyword: t.keyword.clone(),
            market: t.market.clone(),
            volume: t.volume,
            growth_rate: t.growth_rate,
            rising_score: rising_score(t.growth_rate, t.volume),
        })
        .collect();
    ranked.sort_by(|a, b| b.rising_score.total_cmp(&a.rising_score));
    ranked
}
