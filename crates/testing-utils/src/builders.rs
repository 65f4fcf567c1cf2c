//! Test data builders for creating test entities
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use chrono::{DateTime, Duration, Utc};
use shiftfill_domain::{
    CallOutcome, CandidateCaregiver, CaregiverId, GapId, GapSource, GapStatus, GeoPoint,
    ReplyBody, ReplyEvent, ShiftGap, TimeWindow,
};

/// Builder for creating test ShiftGap entities
pub struct ShiftGapBuilder {
    gap: ShiftGap,
}

impl ShiftGapBuilder {
    /// A four hour visit starting eight hours from now
    pub fn new(id: &str) -> Self {
        let start = Utc::now() + Duration::hours(8);
        Self {
            gap: ShiftGap {
                id: GapId::from(id),
                client_id: "client-1".to_string(),
                window: TimeWindow::new(start, start + Duration::hours(4)),
                required_skills: vec![],
                required_languages: vec![],
                location: None,
                status: GapStatus::Open,
                created_at: Utc::now(),
                escalation_deadline: None,
                source: GapSource::Uncovered,
            },
        }
    }

    pub fn with_client(mut self, client_id: &str) -> Self {
        self.gap.client_id = client_id.to_string();
        self
    }

    pub fn starting_in(mut self, offset: Duration) -> Self {
        let length = self.gap.window.end - self.gap.window.start;
        let start = Utc::now() + offset;
        self.gap.window = TimeWindow::new(start, start + length);
        self
    }

    pub fn with_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.gap.window = TimeWindow::new(start, end);
        self
    }

    pub fn with_skills(mut self, skills: &[&str]) -> Self {
        self.gap.required_skills = skills.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_languages(mut self, languages: &[&str]) -> Self {
        self.gap.required_languages = languages.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_location(mut self, lat: f64, lon: f64) -> Self {
        self.gap.location = Some(GeoPoint::new(lat, lon));
        self
    }

    pub fn called_out_by(mut self, caregiver_id: &str) -> Self {
        self.gap.source = GapSource::CallOut {
            caregiver_id: CaregiverId::from(caregiver_id),
        };
        self
    }

    pub fn with_escalation_deadline(mut self, offset: Duration) -> Self {
        self.gap.escalation_deadline = Some(Utc::now() + offset);
        self
    }

    pub fn with_status(mut self, status: GapStatus) -> Self {
        self.gap.status = status;
        self
    }

    pub fn build(self) -> ShiftGap {
        self.gap
    }
}

/// Builder for creating test CandidateCaregiver entities
pub struct CaregiverBuilder {
    caregiver: CandidateCaregiver,
}

impl CaregiverBuilder {
    /// Phone number is derived from the digits in the id, e.g. `cg-7` -> `+15550007`
    pub fn new(id: &str) -> Self {
        Self {
            caregiver: CandidateCaregiver {
                id: CaregiverId::from(id),
                name: format!("Caregiver {}", id),
                phone: phone_for(id),
                preferred_language: "en".to_string(),
                languages: vec![],
                skills: vec![],
                availability: vec![],
                location: None,
                acceptance_rate: 0.5,
            },
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.caregiver.name = name.to_string();
        self
    }

    pub fn with_phone(mut self, phone: &str) -> Self {
        self.caregiver.phone = phone.to_string();
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.caregiver.preferred_language = language.to_string();
        self
    }

    pub fn with_languages(mut self, languages: &[&str]) -> Self {
        self.caregiver.languages = languages.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_skills(mut self, skills: &[&str]) -> Self {
        self.caregiver.skills = skills.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Available for the whole gap window
    pub fn available_for(mut self, gap: &ShiftGap) -> Self {
        self.caregiver.availability.push(gap.window);
        self
    }

    pub fn with_availability(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.caregiver.availability.push(TimeWindow::new(start, end));
        self
    }

    pub fn with_location(mut self, lat: f64, lon: f64) -> Self {
        self.caregiver.location = Some(GeoPoint::new(lat, lon));
        self
    }

    pub fn with_acceptance_rate(mut self, rate: f64) -> Self {
        self.caregiver.acceptance_rate = rate;
        self
    }

    pub fn build(self) -> CandidateCaregiver {
        self.caregiver
    }
}

pub fn phone_for(id: &str) -> String {
    let digits: String = id.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("+1555{:0>4}", digits)
}

/// Inbound SMS reply
pub fn text_reply(id: &str, contact: &str, text: &str) -> ReplyEvent {
    ReplyEvent {
        id: id.to_string(),
        contact: contact.to_string(),
        body: ReplyBody::Text {
            text: text.to_string(),
        },
        received_at: Utc::now(),
    }
}

/// Inbound call keypress result
pub fn call_reply(id: &str, contact: &str, outcome: CallOutcome) -> ReplyEvent {
    ReplyEvent {
        id: id.to_string(),
        contact: contact.to_string(),
        body: ReplyBody::CallOutcome { outcome },
        received_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caregiver_phone_derived_from_id() {
        let caregiver = CaregiverBuilder::new("cg-7").build();
        assert_eq!(caregiver.phone, "+15550007");
        assert_eq!(phone_for("cg-12"), "+15550012");
    }

    #[test]
    fn test_gap_builder_keeps_length_when_moved() {
        let gap = ShiftGapBuilder::new("gap-1")
            .starting_in(Duration::minutes(30))
            .build();
        assert_eq!(gap.window.duration_seconds(), 4 * 3600);
        assert!(gap.starts_at() > Utc::now());
    }
}
