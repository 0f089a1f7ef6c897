use serde::{Deserialize, Serialize};

/// Classified purpose of a call.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Booking,
    ServiceRequest,
    Pricing,
    Hours,
    Other,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Booking => "booking",
            Intent::ServiceRequest => "service_request",
            Intent::Pricing => "pricing",
            Intent::Hours => "hours",
            Intent::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "booking" => Some(Intent::Booking),
            "service_request" => Some(Intent::ServiceRequest),
            "pricing" => Some(Intent::Pricing),
            "hours" => Some(Intent::Hours),
            "other" => Some(Intent::Other),
            _ => None,
        }
    }

    /// Intents that need the full service/location/time triple before we
    /// read a summary back to the caller.
    fn needs_full_intake(&self) -> bool {
        matches!(self, Intent::Booking | Intent::ServiceRequest)
    }
}

/// Where we are in the conversation with a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationPhase {
    Collect,
    Confirm,
    Done,
}

impl ConversationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationPhase::Collect => "collect",
            ConversationPhase::Confirm => "confirm",
            ConversationPhase::Done => "done",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "confirm" => ConversationPhase::Confirm,
            "done" => ConversationPhase::Done,
            _ => ConversationPhase::Collect,
        }
    }
}

/// What one speech turn managed to extract.  Every field is nullable; an
/// absent field means the caller did not state it this turn.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ExtractedFields {
    #[serde(default)]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub caller_name: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub vehicle_or_item: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub preferred_time: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ExtractedFields {
    /// True if the turn yielded anything at all.
    pub fn any_field(&self) -> bool {
        self.intent.is_some()
            || non_empty(self.caller_name.as_deref()).is_some()
            || non_empty(self.service.as_deref()).is_some()
            || non_empty(self.vehicle_or_item.as_deref()).is_some()
            || non_empty(self.location.as_deref()).is_some()
            || non_empty(self.preferred_time.as_deref()).is_some()
            || non_empty(self.notes.as_deref()).is_some()
    }
}

/// Intake data accumulated across the turns of one call.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedData {
    pub intent: Option<Intent>,
    pub caller_name: Option<String>,
    pub service: Option<String>,
    pub vehicle_or_item: Option<String>,
    pub location: Option<String>,
    pub preferred_time: Option<String>,
    pub notes: Option<String>,
}

/// The next intake field to ask for, in fixed priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    Service,
    Location,
    PreferredTime,
    VehicleOrItem,
    CallerName,
}

impl MissingField {
    pub fn question(&self) -> &'static str {
        match self {
            MissingField::Service => "What service can we help you with?",
            MissingField::Location => "Where are you located?",
            MissingField::PreferredTime => "When would work best for you?",
            MissingField::VehicleOrItem => "What vehicle or item is this for?",
            MissingField::CallerName => "And can I get your name?",
        }
    }
}

impl CollectedData {
    /// Fold one turn's extraction into the accumulated record.  A later turn
    /// can add or overwrite a field with a non-empty value, never erase one.
    /// Notes accumulate rather than replace.  Applying the same extraction
    /// twice leaves the record unchanged after the first application.
    pub fn merge(&mut self, update: &ExtractedFields) {
        if let Some(intent) = update.intent {
            self.intent = Some(intent);
        }
        merge_field(&mut self.caller_name, update.caller_name.as_deref());
        merge_field(&mut self.service, update.service.as_deref());
        merge_field(&mut self.vehicle_or_item, update.vehicle_or_item.as_deref());
        merge_field(&mut self.location, update.location.as_deref());
        merge_field(&mut self.preferred_time, update.preferred_time.as_deref());
        if let Some(new_notes) = non_empty(update.notes.as_deref()) {
            match &mut self.notes {
                Some(notes) if notes.contains(new_notes) => {}
                Some(notes) => {
                    notes.push_str("; ");
                    notes.push_str(new_notes);
                }
                None => self.notes = Some(new_notes.to_string()),
            }
        }
    }

    /// Whether we have enough to read a summary back for confirmation.
    /// Booking-like (or not-yet-classified) calls need the full triple;
    /// other intents confirm as soon as a turn extracted anything.
    pub fn ready_to_confirm(&self, extracted_any: bool) -> bool {
        let has_triple =
            self.service.is_some() && self.location.is_some() && self.preferred_time.is_some();
        match self.intent {
            Some(intent) if !intent.needs_full_intake() => extracted_any,
            _ => has_triple,
        }
    }

    pub fn next_missing(&self) -> Option<MissingField> {
        if self.service.is_none() {
            Some(MissingField::Service)
        } else if self.location.is_none() {
            Some(MissingField::Location)
        } else if self.preferred_time.is_none() {
            Some(MissingField::PreferredTime)
        } else if self.vehicle_or_item.is_none() {
            Some(MissingField::VehicleOrItem)
        } else if self.caller_name.is_none() {
            Some(MissingField::CallerName)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == CollectedData::default()
    }

    /// Labeled segments for summaries and the recap message, in spoken order.
    pub fn summary_parts(&self) -> Vec<String> {
        let mut parts = Vec::new();
        if let Some(service) = &self.service {
            parts.push(format!("service: {service}"));
        }
        if let Some(vehicle_or_item) = &self.vehicle_or_item {
            parts.push(format!("for: {vehicle_or_item}"));
        }
        if let Some(location) = &self.location {
            parts.push(format!("location: {location}"));
        }
        if let Some(preferred_time) = &self.preferred_time {
            parts.push(format!("time: {preferred_time}"));
        }
        if let Some(caller_name) = &self.caller_name {
            parts.push(format!("name: {caller_name}"));
        }
        parts
    }
}

fn merge_field(prior: &mut Option<String>, update: Option<&str>) {
    if let Some(value) = non_empty(update) {
        *prior = Some(value.to_string());
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    match value {
        Some(v) if !v.trim().is_empty() => Some(v.trim()),
        _ => None,
    }
}

const AFFIRMATIONS: &[&str] = &["yes", "yeah", "yep", "correct", "right"];
const NEGATIONS: &[&str] = &["no", "nope", "nah", "incorrect"];

fn normalize(utterance: &str) -> String {
    utterance
        .trim()
        .trim_end_matches(&['.', ',', '!', '?'][..])
        .to_lowercase()
}

pub fn is_affirmative(utterance: &str) -> bool {
    let u = normalize(utterance);
    AFFIRMATIONS.contains(&u.as_str()) || u.starts_with("yes ")
}

pub fn is_negative(utterance: &str) -> bool {
    let u = normalize(utterance);
    NEGATIONS.contains(&u.as_str()) || u.starts_with("no ")
}
