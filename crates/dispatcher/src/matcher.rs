use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use shiftfill_core::MatchingConfig;
use shiftfill_domain::{CandidateCaregiver, ShiftGap};

use crate::history::HistorySnapshot;

/// 各项评分（0.0-1.0，未加权）
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub skill: f64,
    pub availability: f64,
    pub proximity: f64,
    pub history: f64,
    pub fairness_penalty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    pub caregiver: CandidateCaregiver,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// 候选人排序
///
/// 纯函数：相同的班次、候选池和历史快照总是得到相同的顺序。
#[derive(Debug, Clone)]
pub struct CandidateMatcher {
    config: MatchingConfig,
}

impl CandidateMatcher {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    pub fn rank(
        &self,
        gap: &ShiftGap,
        pool: &[CandidateCaregiver],
        history: &HistorySnapshot,
    ) -> Vec<RankedCandidate> {
        let mut seen = HashSet::new();
        let mut ranked: Vec<RankedCandidate> = pool
            .iter()
            .filter(|c| seen.insert(c.id.clone()))
            .filter(|c| self.is_eligible(gap, c))
            .map(|c| {
                let breakdown = self.breakdown(gap, c, history);
                RankedCandidate {
                    caregiver: c.clone(),
                    score: self.weighted(&breakdown),
                    breakdown,
                }
            })
            .collect();

        ranked.sort_by(|a, b| match b.score.total_cmp(&a.score) {
            Ordering::Equal => a.caregiver.id.cmp(&b.caregiver.id),
            other => other,
        });

        debug!(
            gap_id = %gap.id,
            pool = pool.len(),
            eligible = ranked.len(),
            "候选人排序完成"
        );
        ranked
    }

    /// 硬性过滤：缺少任一必需技能或语言即排除，请假的原护理员也排除
    fn is_eligible(&self, gap: &ShiftGap, caregiver: &CandidateCaregiver) -> bool {
        if gap.called_out_caregiver() == Some(&caregiver.id) {
            return false;
        }
        gap.required_skills.iter().all(|s| caregiver.has_skill(s))
            && gap.required_languages.iter().all(|l| caregiver.speaks(l))
    }

    fn breakdown(
        &self,
        gap: &ShiftGap,
        caregiver: &CandidateCaregiver,
        history: &HistorySnapshot,
    ) -> ScoreBreakdown {
        let skill = if gap.required_languages.is_empty()
            || gap
                .required_languages
                .iter()
                .any(|l| caregiver.preferred_language.eq_ignore_ascii_case(l))
        {
            1.0
        } else {
            0.8
        };

        let fairness_penalty = if history.contacted_for_previous_gap(&caregiver.id) {
            self.config.fairness_penalty
        } else {
            0.0
        };

        ScoreBreakdown {
            skill,
            availability: availability_score(gap, caregiver),
            proximity: self.proximity_score(gap, caregiver),
            history: history.blended_rate(caregiver, self.config.history_prior_weight),
            fairness_penalty,
        }
    }

    fn proximity_score(&self, gap: &ShiftGap, caregiver: &CandidateCaregiver) -> f64 {
        match (&gap.location, &caregiver.location) {
            (Some(shift), Some(home)) => {
                (1.0 - shift.distance_km(home) / self.config.max_distance_km).clamp(0.0, 1.0)
            }
            _ => self.config.unknown_location_score,
        }
    }

    fn weighted(&self, b: &ScoreBreakdown) -> f64 {
        self.config.skill_weight * b.skill
            + self.config.availability_weight * b.availability
            + self.config.proximity_weight * b.proximity
            + self.config.history_weight * b.history
            - b.fairness_penalty
    }
}

/// 可用时间覆盖班次时长的比例
fn availability_score(gap: &ShiftGap, caregiver: &CandidateCaregiver) -> f64 {
    let total = gap.window.duration_seconds();
    if total == 0 {
        return 0.0;
    }
    let covered: i64 = caregiver
        .availability
        .iter()
        .map(|w| gap.window.overlap_seconds(w))
        .sum();
    (covered as f64 / total as f64).clamp(0.0, 1.0)
}
