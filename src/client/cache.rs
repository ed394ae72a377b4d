use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::models::analysis::{AnalysisResult, AnalysisType};

/// Entries kept per (scan, image index).
pub const MAX_ENTRIES_PER_KEY: usize = 10;
/// Entries kept across all keys; the oldest insertion goes first.
pub const MAX_ENTRIES_TOTAL: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub scan_id: String,
    pub image_index: u32,
}

impl CacheKey {
    pub fn new(scan_id: impl Into<String>, image_index: u32) -> Self {
        Self {
            scan_id: scan_id.into(),
            image_index,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    seq: u64,
    result: AnalysisResult,
    inserted_at: DateTime<Utc>,
}

/// Short-lived store of completed analysis results.
///
/// Best effort and process-local: entries expire one hour after insertion
/// and nothing survives a restart.
#[derive(Debug)]
pub struct ResultCache {
    entries: HashMap<CacheKey, VecDeque<CacheEntry>>,
    insertion_order: VecDeque<(CacheKey, u64)>,
    len: usize,
    next_seq: u64,
    ttl: Duration,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCache {
    pub fn new() -> Self {
        Self::with_ttl(Duration::hours(1))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            len: 0,
            next_seq: 0,
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set(&mut self, result: AnalysisResult) {
        self.set_at(result, Utc::now());
    }

    pub fn set_at(&mut self, result: AnalysisResult, now: DateTime<Utc>) {
        let key = CacheKey::new(result.scan_id.clone(), result.image_index);
        let seq = self.next_seq;
        self.next_seq += 1;

        let bucket = self.entries.entry(key.clone()).or_default();
        bucket.push_back(CacheEntry {
            seq,
            result,
            inserted_at: now,
        });
        self.len += 1;

        if bucket.len() > MAX_ENTRIES_PER_KEY {
            if let Some(dropped) = bucket.pop_front() {
                self.insertion_order
                    .retain(|(k, s)| !(s == &dropped.seq && k == &key));
                self.len -= 1;
            }
        }
        self.insertion_order.push_back((key, seq));

        while self.len > MAX_ENTRIES_TOTAL {
            self.evict_oldest();
        }
    }

    /// Most recent unexpired result for the image.
    pub fn get(&self, scan_id: &str, image_index: u32) -> Option<&AnalysisResult> {
        self.get_at(scan_id, image_index, Utc::now())
    }

    pub fn get_at(&self, scan_id: &str, image_index: u32, now: DateTime<Utc>) -> Option<&AnalysisResult> {
        self.fresh(scan_id, image_index, now).last().map(|e| &e.result)
    }

    /// Most recent unexpired result of one analysis type for the image.
    pub fn get_for(
        &self,
        scan_id: &str,
        image_index: u32,
        analysis_type: AnalysisType,
    ) -> Option<&AnalysisResult> {
        self.get_for_at(scan_id, image_index, analysis_type, Utc::now())
    }

    pub fn get_for_at(
        &self,
        scan_id: &str,
        image_index: u32,
        analysis_type: AnalysisType,
        now: DateTime<Utc>,
    ) -> Option<&AnalysisResult> {
        self.fresh(scan_id, image_index, now)
            .filter(|e| e.result.analysis_type == analysis_type)
            .last()
            .map(|e| &e.result)
    }

    pub fn has(&self, scan_id: &str, image_index: u32) -> bool {
        self.get(scan_id, image_index).is_some()
    }

    /// Whether a result of `analysis_type` for the image was stored within
    /// the TTL.
    pub fn is_cached(&self, scan_id: &str, image_index: u32, analysis_type: AnalysisType) -> bool {
        self.get_for(scan_id, image_index, analysis_type).is_some()
    }

    pub fn is_cached_at(
        &self,
        scan_id: &str,
        image_index: u32,
        analysis_type: AnalysisType,
        now: DateTime<Utc>,
    ) -> bool {
        self.get_for_at(scan_id, image_index, analysis_type, now).is_some()
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let mut removed = 0;
        self.entries.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|e| now - e.inserted_at < ttl);
            removed += before - bucket.len();
            !bucket.is_empty()
        });
        self.len -= removed;
        let entries = &self.entries;
        self.insertion_order.retain(|(key, seq)| {
            entries
                .get(key)
                .is_some_and(|bucket| bucket.iter().any(|e| e.seq == *seq))
        });
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
        self.len = 0;
    }

    fn fresh<'a>(
        &'a self,
        scan_id: &str,
        image_index: u32,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a CacheEntry> + 'a {
        let ttl = self.ttl;
        self.entries
            .get(&CacheKey::new(scan_id, image_index))
            .into_iter()
            .flatten()
            .filter(move |e| now - e.inserted_at < ttl)
    }

    fn evict_oldest(&mut self) {
        // insertion_order tracks exactly the live entries.
        while let Some((key, seq)) = self.insertion_order.pop_front() {
            let Some(bucket) = self.entries.get_mut(&key) else {
                continue;
            };
            let Some(idx) = bucket.iter().position(|e| e.seq == seq) else {
                continue;
            };
            bucket.remove(idx);
            if bucket.is_empty() {
                self.entries.remove(&key);
            }
            self.len -= 1;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::analysis::AnalysisStatus;
    use uuid::Uuid;

    fn result(scan_id: &str, image_index: u32, analysis_type: AnalysisType) -> AnalysisResult {
        AnalysisResult {
            id: Uuid::new_v4(),
            scan_id: scan_id.to_string(),
            image_index,
            analysis_type,
            status: AnalysisStatus::Completed,
            confidence: Some(0.9),
            findings: serde_json::Value::Null,
            processing_time: Some(1500),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn freshness_window_is_one_hour() {
        let mut cache = ResultCache::new();
        let written = Utc::now();
        cache.set_at(result("s1", 0, AnalysisType::BrainTumor), written);

        let fresh = written + Duration::minutes(59);
        let stale = written + Duration::minutes(61);

        assert!(cache.is_cached_at("s1", 0, AnalysisType::BrainTumor, fresh));
        assert!(!cache.is_cached_at("s1", 0, AnalysisType::BrainTumor, stale));
        assert!(!cache.is_cached_at("s1", 0, AnalysisType::BrainTumor, written + Duration::hours(1)));
        // present but stale
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn is_cached_is_scoped_to_image_and_type() {
        let mut cache = ResultCache::new();
        cache.set(result("s1", 0, AnalysisType::MriToCt));

        assert!(cache.is_cached("s1", 0, AnalysisType::MriToCt));
        assert!(!cache.is_cached("s1", 1, AnalysisType::MriToCt));
        assert!(!cache.is_cached("s1", 0, AnalysisType::BrainTumor));
        assert!(cache.has("s1", 0));
    }

    #[test]
    fn get_returns_latest_entry() {
        let mut cache = ResultCache::new();
        let first = result("s1", 0, AnalysisType::BrainTumor);
        let second = result("s1", 0, AnalysisType::BrainTumor);
        cache.set(first);
        cache.set(second.clone());

        assert_eq!(cache.get("s1", 0).unwrap().id, second.id);
    }

    #[test]
    fn per_key_cap_drops_oldest_for_that_key() {
        let mut cache = ResultCache::new();
        let first = result("s1", 0, AnalysisType::BrainTumor);
        let first_id = first.id;
        cache.set(first);
        for _ in 0..MAX_ENTRIES_PER_KEY {
            cache.set(result("s1", 0, AnalysisType::BrainTumor));
        }

        assert_eq!(cache.len(), MAX_ENTRIES_PER_KEY);
        let ids: Vec<_> = cache.fresh("s1", 0, Utc::now()).map(|e| e.result.id).collect();
        assert!(!ids.contains(&first_id));
    }

    #[test]
    fn global_cap_evicts_oldest_insertion() {
        let mut cache = ResultCache::new();
        for scan in 0..MAX_ENTRIES_TOTAL {
            cache.set(result(&format!("scan-{scan}"), 0, AnalysisType::LungNodule));
        }
        assert_eq!(cache.len(), MAX_ENTRIES_TOTAL);

        cache.set(result("newcomer", 0, AnalysisType::LungNodule));

        assert_eq!(cache.len(), MAX_ENTRIES_TOTAL);
        assert!(!cache.has("scan-0", 0));
        assert!(cache.has("scan-1", 0));
        assert!(cache.has("newcomer", 0));
    }

    #[test]
    fn global_eviction_after_per_key_cap() {
        let mut cache = ResultCache::new();
        // 11 writes to one key: the first is dropped by the per-key cap
        for _ in 0..=MAX_ENTRIES_PER_KEY {
            cache.set(result("busy", 0, AnalysisType::BreastCancer));
        }
        for scan in 0..(MAX_ENTRIES_TOTAL - MAX_ENTRIES_PER_KEY + 1) {
            cache.set(result(&format!("scan-{scan}"), 0, AnalysisType::BreastCancer));
        }

        assert_eq!(cache.len(), MAX_ENTRIES_TOTAL);
        assert_eq!(cache.fresh("busy", 0, Utc::now()).count(), MAX_ENTRIES_PER_KEY - 1);
        assert_eq!(cache.insertion_order.len(), MAX_ENTRIES_TOTAL);
    }

    #[test]
    fn purge_removes_only_expired() {
        let mut cache = ResultCache::new();
        let now = Utc::now();
        cache.set_at(result("old", 0, AnalysisType::CtToMri), now - Duration::hours(2));
        cache.set_at(result("new", 0, AnalysisType::CtToMri), now);

        assert_eq!(cache.purge_expired(now), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.insertion_order.len(), 1);
        assert!(cache.get_at("new", 0, now).is_some());
    }

    #[test]
    fn repeated_writes_to_one_image_stay_bounded() {
        let mut cache = ResultCache::new();
        for _ in 0..1_000 {
            cache.set(result("repeat", 2, AnalysisType::BrainTumor));
        }

        assert_eq!(cache.len(), MAX_ENTRIES_PER_KEY);
        assert_eq!(cache.insertion_order.len(), cache.len());
    }
}
