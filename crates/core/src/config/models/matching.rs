use serde::{Deserialize, Serialize};

/// 候选人评分权重
///
/// 总分 = 技能/语言 + 时间可用性 + 距离 + 历史接受率 - 近期外呼惩罚
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub skill_weight: f64,
    pub availability_weight: f64,
    pub proximity_weight: f64,
    pub history_weight: f64,
    /// 上一个班次已联系过的护理员扣分
    pub fairness_penalty: f64,
    /// 超过该距离时距离分为0（公里）
    pub max_distance_km: f64,
    /// 缺少位置信息时的距离分
    pub unknown_location_score: f64,
    /// 历史接受率相对本地统计的先验权重（等效外呼次数）
    pub history_prior_weight: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            skill_weight: 0.30,
            availability_weight: 0.25,
            proximity_weight: 0.20,
            history_weight: 0.20,
            fairness_penalty: 0.05,
            max_distance_km: 40.0,
            unknown_location_score: 0.5,
            history_prior_weight: 10.0,
        }
    }
}

impl MatchingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let weights = [
            ("skill_weight", self.skill_weight),
            ("availability_weight", self.availability_weight),
            ("proximity_weight", self.proximity_weight),
            ("history_weight", self.history_weight),
            ("fairness_penalty", self.fairness_penalty),
        ];
        for (name, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(anyhow::anyhow!("评分权重 {} 必须是非负数: {}", name, weight));
            }
        }
        if self.skill_weight + self.availability_weight + self.proximity_weight + self.history_weight
            <= 0.0
        {
            return Err(anyhow::anyhow!("至少需要一个正的评分权重"));
        }
        if self.max_distance_km <= 0.0 {
            return Err(anyhow::anyhow!("最大距离必须大于0"));
        }
        if !(0.0..=1.0).contains(&self.unknown_location_score) {
            return Err(anyhow::anyhow!("缺省距离分必须在0.0-1.0之间"));
        }
        if self.history_prior_weight < 0.0 {
            return Err(anyhow::anyhow!("历史先验权重不能为负数"));
        }
        Ok(())
    }
}
