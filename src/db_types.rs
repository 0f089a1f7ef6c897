use crate::intake::{CollectedData, ConversationPhase, Intent};

use sqlx::types::time::OffsetDateTime;

/// One row of `call_sessions`; the whole of a call's persisted state.
#[allow(dead_code)]
#[derive(sqlx::FromRow, Debug)]
pub struct CallSessionRow {
    pub call_sid: String,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub status: String,
    pub intent: Option<String>,
    pub caller_name: Option<String>,
    pub service: Option<String>,
    pub vehicle_or_item: Option<String>,
    pub location: Option<String>,
    pub preferred_time: Option<String>,
    pub notes: Option<String>,
    pub phase: String,
    pub transcript: String,
    pub sms_sent: bool,
    pub sms_sid: Option<String>,
    pub notify_error: Option<String>,
    pub call_duration_secs: Option<i32>,
    pub started_at: OffsetDateTime,
    pub ended_at: Option<OffsetDateTime>,
}

impl CallSessionRow {
    pub fn collected_data(&self) -> CollectedData {
        CollectedData {
            intent: self.intent.as_deref().and_then(Intent::from_str),
            caller_name: self.caller_name.clone(),
            service: self.service.clone(),
            vehicle_or_item: self.vehicle_or_item.clone(),
            location: self.location.clone(),
            preferred_time: self.preferred_time.clone(),
            notes: self.notes.clone(),
        }
    }

    pub fn phase(&self) -> ConversationPhase {
        ConversationPhase::from_str(&self.phase)
    }
}
