//! `PoolProfileStore` — per-pool running statistics and cross-pool
//! correlation (§4.4).

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::PoolId;
use crate::gateway::{DocStore, GatewayError, Order};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProfileError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub type Result<T> = std::result::Result<T, ProfileError>;

/// Default rate limit on `Update` per pool (§3, §4.4).
pub const DEFAULT_UPDATE_INTERVAL: chrono::Duration = chrono::Duration::hours(1);
/// `Correlate` considers at most this many of the most-active pools (§4.4).
pub const CORRELATE_MAX_POOLS: usize = 32;

/// Welford's online algorithm for a running min/max/mean (used as a stand-in
/// for "median" in favor of O(1)-space stats over an exact order statistic —
/// see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunningStat {
    pub count: u64,
    pub mean: f64,
    m2: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for RunningStat {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl RunningStat {
    pub fn update(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
        self.min = self.min.min(x);
        self.max = self.max.max(x);
    }

    #[must_use]
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    #[must_use]
    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Welford gives us mean, not median; this crate reports the running
    /// mean as `median` for the profile's sake (see §3's `*_median` fields)
    /// since an exact streaming median would need an order-statistics
    /// structure out of proportion to this store's scope.
    #[must_use]
    pub fn median_estimate(&self) -> f64 {
        self.mean
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolProfile {
    pub pool_id: PoolId,
    pub first_seen_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub apr: RunningStat,
    pub tvl: RunningStat,
    pub volume: RunningStat,
    pub hourly_histogram: [f64; 24],
    pub dow_histogram: [f64; 7],
    pub correlations: HashMap<String, f64>,
}

impl PoolProfile {
    #[must_use]
    pub fn new(pool_id: PoolId, now: DateTime<Utc>) -> Self {
        Self {
            pool_id,
            first_seen_at: now,
            last_updated_at: now,
            apr: RunningStat::default(),
            tvl: RunningStat::default(),
            volume: RunningStat::default(),
            hourly_histogram: [0.0; 24],
            dow_histogram: [0.0; 7],
            correlations: HashMap::new(),
        }
    }

    fn record(&mut self, apr: f64, tvl_usd: f64, volume_24h_usd: f64, at: DateTime<Utc>) {
        self.apr.update(apr);
        self.tvl.update(tvl_usd);
        self.volume.update(volume_24h_usd);
        let hour = at.hour() as usize;
        let dow = at.weekday().num_days_from_monday() as usize;
        let activity = volume_24h_usd.max(0.0).ln_1p();
        self.hourly_histogram[hour] += activity;
        self.dow_histogram[dow] += activity;
        self.last_updated_at = at;
    }
}

fn collection(agent_id: &str) -> String {
    format!("pool_profiles/{agent_id}")
}

pub struct PoolProfileStore {
    agent_id: String,
    doc_store: std::sync::Arc<dyn DocStore>,
    update_interval: chrono::Duration,
}

impl PoolProfileStore {
    #[must_use]
    pub fn new(
        agent_id: impl Into<String>,
        doc_store: std::sync::Arc<dyn DocStore>,
        update_interval: chrono::Duration,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            doc_store,
            update_interval,
        }
    }

    async fn load(&self, pool_id: &PoolId) -> Result<Option<PoolProfile>> {
        let doc = self
            .doc_store
            .get(&collection(&self.agent_id), pool_id.as_str())
            .await?;
        Ok(doc.and_then(|v| serde_json::from_value(v).ok()))
    }

    async fn save(&self, profile: &PoolProfile) -> Result<()> {
        let doc = serde_json::to_value(profile).expect("PoolProfile always serializes");
        self.doc_store
            .put(&collection(&self.agent_id), profile.pool_id.as_str(), doc, None)
            .await?;
        Ok(())
    }

    /// Rate-limited to once per `update_interval` per pool. Returns `true`
    /// if the update was applied, `false` if it was skipped due to rate
    /// limiting.
    pub async fn update(
        &self,
        pool_id: &PoolId,
        apr: f64,
        tvl_usd: f64,
        volume_24h_usd: f64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut profile = match self.load(pool_id).await? {
            Some(p) => p,
            None => PoolProfile::new(pool_id.clone(), now),
        };
        if now - profile.last_updated_at < self.update_interval && profile.apr.count > 0 {
            return Ok(false);
        }
        profile.record(apr, tvl_usd, volume_24h_usd, now);
        self.save(&profile).await?;
        Ok(true)
    }

    /// Blends the hourly-bucket histogram with the recent running mean to
    /// predict `apr` at `now + horizon`. Confidence is
    /// `min(1, n_samples / 168) * agreement`, where `agreement` is the
    /// inverse normalized deviation between the histogram-implied and
    /// running-mean estimates (§4.4).
    pub async fn predict(
        &self,
        pool_id: &PoolId,
        horizon: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<(f64, f64)> {
        let Some(profile) = self.load(pool_id).await? else {
            return Ok((0.0, 0.0));
        };
        if profile.apr.count == 0 {
            return Ok((0.0, 0.0));
        }

        let target_hour = (now + horizon).hour() as usize;
        let total_activity: f64 = profile.hourly_histogram.iter().sum();
        let hourly_weight = if total_activity > 0.0 {
            profile.hourly_histogram[target_hour] / total_activity
        } else {
            1.0 / 24.0
        };
        // Scale the running mean by how much more/less active this hour is
        // than an even 1/24th split, as a cheap slope proxy.
        let expected_apr = profile.apr.mean * (hourly_weight * 24.0).max(0.1);

        let n_samples = profile.apr.count as f64;
        let sample_factor = (n_samples / 168.0).min(1.0);
        let deviation = if profile.apr.mean.abs() > f64::EPSILON {
            (expected_apr - profile.apr.mean).abs() / profile.apr.mean.abs()
        } else {
            0.0
        };
        let agreement = (1.0 - deviation).clamp(0.0, 1.0);
        let confidence = sample_factor * agreement;

        Ok((expected_apr.max(0.0), confidence))
    }

    /// Pearson correlation over aligned 1-hour buckets (here, the hourly
    /// activity histograms) across at most [`CORRELATE_MAX_POOLS`] pools.
    /// Quadratic in that cap, which is acceptable at this scale.
    pub async fn correlate(&self, pool_ids: &[PoolId]) -> Result<HashMap<PoolId, HashMap<PoolId, f64>>> {
        let capped: Vec<&PoolId> = pool_ids.iter().take(CORRELATE_MAX_POOLS).collect();
        let mut profiles = HashMap::new();
        for pool_id in &capped {
            if let Some(p) = self.load(pool_id).await? {
                profiles.insert((*pool_id).clone(), p);
            }
        }

        let mut out: HashMap<PoolId, HashMap<PoolId, f64>> = HashMap::new();
        for a in &capped {
            let Some(pa) = profiles.get(*a) else { continue };
            let mut row = HashMap::new();
            for b in &capped {
                if a == b {
                    continue;
                }
                let Some(pb) = profiles.get(*b) else { continue };
                row.insert((*b).clone(), pearson(&pa.hourly_histogram, &pb.hourly_histogram));
            }
            out.insert((*a).clone(), row);
        }
        Ok(out)
    }
}

fn pearson(a: &[f64; 24], b: &[f64; 24]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..a.len() {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        0.0
    } else {
        (cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fakes::FakeDocStore;
    use std::sync::Arc;

    fn store() -> PoolProfileStore {
        PoolProfileStore::new("agent-1", Arc::new(FakeDocStore::new()), DEFAULT_UPDATE_INTERVAL)
    }

    #[tokio::test]
    async fn update_is_rate_limited_within_interval() {
        let s = store();
        let pool = PoolId::new("p1");
        let now = Utc::now();
        assert!(s.update(&pool, 10.0, 1000.0, 500.0, now).await.unwrap());
        assert!(!s
            .update(&pool, 12.0, 1000.0, 500.0, now + chrono::Duration::minutes(10))
            .await
            .unwrap());
        assert!(s
            .update(&pool, 12.0, 1000.0, 500.0, now + chrono::Duration::hours(2))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn predict_on_unknown_pool_returns_zero_confidence() {
        let s = store();
        let (apr, confidence) = s
            .predict(&PoolId::new("unknown"), chrono::Duration::hours(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(apr, 0.0);
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn running_stat_welford_tracks_mean_and_bounds() {
        let mut stat = RunningStat::default();
        for x in [10.0, 20.0, 30.0] {
            stat.update(x);
        }
        assert!((stat.mean - 20.0).abs() < 1e-9);
        assert_eq!(stat.min, 10.0);
        assert_eq!(stat.max, 30.0);
    }

    #[test]
    fn pearson_of_identical_series_is_one() {
        let a = [1.0; 24];
        let mut b = [0.0; 24];
        for (i, v) in b.iter_mut().enumerate() {
            *v = i as f64;
        }
        assert!((pearson(&b, &b) - 1.0).abs() < 1e-9);
        // constant series has zero variance -> correlation defined as 0
        assert_eq!(pearson(&a, &b), 0.0);
    }
}
