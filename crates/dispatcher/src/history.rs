use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::watch;

use shiftfill_domain::{CandidateCaregiver, CaregiverId, GapId, ResponseIntent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaregiverStats {
    pub offered: u32,
    pub accepted: u32,
    pub declined: u32,
}

/// 跨班次只读共享的外呼统计
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    /// 最近一个开始首波外呼的班次
    pub previous_gap: Option<GapId>,
    pub previous_gap_contacts: HashSet<CaregiverId>,
    pub stats: HashMap<CaregiverId, CaregiverStats>,
}

impl HistorySnapshot {
    pub fn contacted_for_previous_gap(&self, caregiver_id: &CaregiverId) -> bool {
        self.previous_gap_contacts.contains(caregiver_id)
    }

    /// 排班系统的历史接受率与本地统计的加权平均
    ///
    /// `prior_weight` 是历史接受率等效的外呼次数。
    pub fn blended_rate(&self, caregiver: &CandidateCaregiver, prior_weight: f64) -> f64 {
        let prior = caregiver.acceptance_rate.clamp(0.0, 1.0);
        let Some(stats) = self.stats.get(&caregiver.id) else {
            return prior;
        };
        let offered = stats.offered as f64;
        if offered + prior_weight <= 0.0 {
            return prior;
        }
        ((prior * prior_weight + stats.accepted as f64) / (prior_weight + offered)).clamp(0.0, 1.0)
    }
}

/// 外呼历史，写入时整体替换快照，读取方只克隆 `Arc`
pub struct OutreachHistory {
    tx: watch::Sender<Arc<HistorySnapshot>>,
}

impl OutreachHistory {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(HistorySnapshot::default()));
        Self { tx }
    }

    pub fn snapshot(&self) -> Arc<HistorySnapshot> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<HistorySnapshot>> {
        self.tx.subscribe()
    }

    /// 某个班次开始首波外呼
    pub fn record_wave(&self, gap_id: &GapId, contacted: &[CaregiverId]) {
        self.tx.send_modify(|current| {
            let mut next = HistorySnapshot::clone(current);
            next.previous_gap = Some(gap_id.clone());
            next.previous_gap_contacts = contacted.iter().cloned().collect();
            for id in contacted {
                next.stats.entry(id.clone()).or_default().offered += 1;
            }
            *current = Arc::new(next);
        });
    }

    pub fn record_response(&self, caregiver_id: &CaregiverId, intent: ResponseIntent) {
        if !matches!(intent, ResponseIntent::Accept | ResponseIntent::Decline) {
            return;
        }
        self.tx.send_modify(|current| {
            let mut next = HistorySnapshot::clone(current);
            let stats = next.stats.entry(caregiver_id.clone()).or_default();
            match intent {
                ResponseIntent::Accept => stats.accepted += 1,
                _ => stats.declined += 1,
            }
            *current = Arc::new(next);
        });
    }
}

impl Default for OutreachHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caregiver(id: &str, rate: f64) -> CandidateCaregiver {
        CandidateCaregiver {
            id: CaregiverId::new(id),
            name: id.to_string(),
            phone: "+15550000".to_string(),
            preferred_language: "en".to_string(),
            languages: vec![],
            skills: vec![],
            availability: vec![],
            location: None,
            acceptance_rate: rate,
        }
    }

    #[test]
    fn test_blended_rate_moves_toward_local_history() {
        let history = OutreachHistory::new();
        let c = caregiver("c1", 0.8);
        assert_eq!(history.snapshot().blended_rate(&c, 10.0), 0.8);

        let ids = vec![c.id.clone()];
        for i in 0..10 {
            history.record_wave(&GapId::new(format!("g{i}")), &ids);
            history.record_response(&c.id, ResponseIntent::Decline);
        }

        let rate = history.snapshot().blended_rate(&c, 10.0);
        assert!((rate - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_previous_gap_contacts_are_replaced() {
        let history = OutreachHistory::new();
        let before = history.snapshot();

        history.record_wave(&GapId::new("g1"), &[CaregiverId::new("a")]);
        history.record_wave(&GapId::new("g2"), &[CaregiverId::new("b")]);

        let snapshot = history.snapshot();
        assert_eq!(snapshot.previous_gap, Some(GapId::new("g2")));
        assert!(snapshot.contacted_for_previous_gap(&CaregiverId::new("b")));
        assert!(!snapshot.contacted_for_previous_gap(&CaregiverId::new("a")));
        // 旧快照不受影响
        assert!(before.previous_gap.is_none());
    }
}
