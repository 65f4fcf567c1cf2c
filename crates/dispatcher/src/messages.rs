use shiftfill_core::MessageTemplates;
use shiftfill_domain::{Channel, ShiftGap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    SmsOffer,
    CallScript,
    Confirmation,
    AlreadyFilled,
    Ineligible,
}

impl MessageKind {
    pub fn offer_for(channel: Channel) -> Self {
        match channel {
            Channel::Sms => MessageKind::SmsOffer,
            Channel::Voice => MessageKind::CallScript,
        }
    }
}

/// 按模板渲染外发文案，时间统一用 UTC 显示
#[derive(Debug, Clone)]
pub struct MessageRenderer {
    templates: MessageTemplates,
}

impl MessageRenderer {
    pub fn new(templates: MessageTemplates) -> Self {
        Self { templates }
    }

    pub fn render(&self, kind: MessageKind, gap: &ShiftGap, caregiver_name: &str) -> String {
        let template = match kind {
            MessageKind::SmsOffer => &self.templates.sms_offer,
            MessageKind::CallScript => &self.templates.call_script,
            MessageKind::Confirmation => &self.templates.confirmation,
            MessageKind::AlreadyFilled => &self.templates.already_filled,
            MessageKind::Ineligible => &self.templates.ineligible,
        };

        template
            .replace("{gap_id}", gap.id.as_str())
            .replace("{date}", &gap.starts_at().format("%Y-%m-%d").to_string())
            .replace("{start}", &gap.starts_at().format("%H:%M").to_string())
            .replace("{end}", &gap.ends_at().format("%H:%M").to_string())
            .replace("{caregiver}", caregiver_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use shiftfill_domain::{GapId, GapSource, GapStatus, TimeWindow};

    #[test]
    fn test_placeholders_are_filled() {
        let start = Utc.with_ymd_and_hms(2026, 7, 1, 14, 30, 0).unwrap();
        let gap = ShiftGap {
            id: GapId::new("gap-42"),
            client_id: "client".to_string(),
            window: TimeWindow::new(start, start + Duration::hours(3)),
            required_skills: vec![],
            required_languages: vec![],
            location: None,
            status: GapStatus::Open,
            created_at: start,
            escalation_deadline: None,
            source: GapSource::Uncovered,
        };
        let renderer = MessageRenderer::new(MessageTemplates {
            sms_offer: "{caregiver}: {gap_id} {date} {start}-{end}".to_string(),
            ..MessageTemplates::default()
        });

        assert_eq!(
            renderer.render(MessageKind::SmsOffer, &gap, "Ana"),
            "Ana: gap-42 2026-07-01 14:30-17:30"
        );
        assert!(renderer
            .render(MessageKind::AlreadyFilled, &gap, "Ana")
            .contains("already been filled"));
    }
}
