use crate::consts::{APP_GREETING, CHANGE_PROMPT, CLOSING_REMARK, CONFIRM_NUDGE};
use crate::extract::{rule_extract, TurnExtractor};
use crate::intake::{is_affirmative, is_negative, CollectedData, ConversationPhase};

use tracing::{debug, warn};

/// What one inbound speech turn resolved to: the line to speak, whether the
/// call ends, the updated record, and whether the recap should be
/// dispatched.  Pure apart from the extractor call; persistence and the
/// recap send happen in the webhook handler.
#[derive(Debug)]
pub struct TurnPlan {
    pub say: String,
    pub hangup: bool,
    pub phase: ConversationPhase,
    pub data: CollectedData,
    pub send_recap: bool,
}

/// Advance the conversation by one turn.
///
/// Empty speech re-issues the current phase's prompt without a transition.
/// In collect we extract, merge, and either ask for the next missing field
/// or read a summary back.  In confirm we classify yes/no; anything else
/// re-prompts.  Done is terminal and replays are answered identically so a
/// redelivered webhook stays a no-op (the notifier's guard absorbs the
/// repeated recap flag).
pub async fn take_turn(
    extractor: &dyn TurnExtractor,
    phase: ConversationPhase,
    prior: CollectedData,
    speech: Option<&str>,
) -> TurnPlan {
    let speech = speech.map(str::trim).filter(|s| !s.is_empty());
    let Some(speech) = speech else {
        return reissue_prompt(phase, prior);
    };

    match phase {
        ConversationPhase::Collect => collect_turn(extractor, prior, speech).await,
        ConversationPhase::Confirm => confirm_turn(prior, speech),
        ConversationPhase::Done => TurnPlan {
            say: CLOSING_REMARK.to_string(),
            hangup: true,
            phase: ConversationPhase::Done,
            data: prior,
            send_recap: true,
        },
    }
}

fn reissue_prompt(phase: ConversationPhase, data: CollectedData) -> TurnPlan {
    let say = match phase {
        ConversationPhase::Collect if data.is_empty() => APP_GREETING.to_string(),
        ConversationPhase::Collect => collect_prompt(&data),
        ConversationPhase::Confirm => confirm_prompt(&data),
        ConversationPhase::Done => CLOSING_REMARK.to_string(),
    };
    TurnPlan {
        say,
        hangup: phase == ConversationPhase::Done,
        phase,
        data,
        send_recap: false,
    }
}

async fn collect_turn(
    extractor: &dyn TurnExtractor,
    prior: CollectedData,
    speech: &str,
) -> TurnPlan {
    let extracted = match extractor.extract(&prior, speech).await {
        Ok(extracted) => extracted,
        Err(e) => {
            warn!(error=%e, "extraction failed; using rule fallback");
            rule_extract(&prior, speech)
        }
    };
    debug!(extracted=?extracted, "turn extraction");
    let extracted_any = extracted.any_field();
    let mut data = prior;
    data.merge(&extracted);

    if data.ready_to_confirm(extracted_any) {
        let say = confirm_prompt(&data);
        TurnPlan {
            say,
            hangup: false,
            phase: ConversationPhase::Confirm,
            data,
            send_recap: true,
        }
    } else {
        let say = collect_prompt(&data);
        TurnPlan {
            say,
            hangup: false,
            phase: ConversationPhase::Collect,
            data,
            send_recap: false,
        }
    }
}

fn confirm_turn(data: CollectedData, speech: &str) -> TurnPlan {
    if is_affirmative(speech) {
        TurnPlan {
            say: CLOSING_REMARK.to_string(),
            hangup: true,
            phase: ConversationPhase::Done,
            data,
            send_recap: true,
        }
    } else if is_negative(speech) {
        TurnPlan {
            say: CHANGE_PROMPT.to_string(),
            hangup: false,
            phase: ConversationPhase::Collect,
            data,
            send_recap: false,
        }
    } else {
        TurnPlan {
            say: CONFIRM_NUDGE.to_string(),
            hangup: false,
            phase: ConversationPhase::Confirm,
            data,
            send_recap: false,
        }
    }
}

fn collect_prompt(data: &CollectedData) -> String {
    match data.next_missing() {
        Some(field) => field.question().to_string(),
        None => "Anything else I should note?".to_string(),
    }
}

fn confirm_prompt(data: &CollectedData) -> String {
    let parts = data.summary_parts();
    if parts.is_empty() {
        "Just to confirm your request.  Is that correct?".to_string()
    } else {
        format!("Just to confirm: {}.  Is that correct?", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::extract::RuleExtractor;
    use crate::intake::{ExtractedFields, Intent};
    use async_trait::async_trait;

    /// Extractor that answers with a fixed extraction, standing in for the
    /// AI strategy in state-machine tests.
    struct FixedExtractor(ExtractedFields);

    #[async_trait]
    impl TurnExtractor for FixedExtractor {
        async fn extract(
            &self,
            _prior: &CollectedData,
            _speech: &str,
        ) -> Result<ExtractedFields, AppError> {
            Ok(self.0.clone())
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl TurnExtractor for FailingExtractor {
        async fn extract(
            &self,
            _prior: &CollectedData,
            _speech: &str,
        ) -> Result<ExtractedFields, AppError> {
            Err(AppError("upstream unavailable"))
        }
    }

    fn full_booking_extraction() -> ExtractedFields {
        ExtractedFields {
            intent: Some(Intent::ServiceRequest),
            service: Some("oil change".to_string()),
            location: Some("123 Main Street".to_string()),
            preferred_time: Some("tomorrow at 3pm".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn first_turn_without_speech_greets() {
        let plan = take_turn(
            &RuleExtractor,
            ConversationPhase::Collect,
            CollectedData::default(),
            None,
        )
        .await;
        assert_eq!(plan.say, APP_GREETING);
        assert_eq!(plan.phase, ConversationPhase::Collect);
        assert!(!plan.hangup);
        assert!(!plan.send_recap);
    }

    #[tokio::test]
    async fn booking_completes_in_one_turn() {
        let extractor = FixedExtractor(full_booking_extraction());
        let plan = take_turn(
            &extractor,
            ConversationPhase::Collect,
            CollectedData::default(),
            Some("I need an oil change at 123 Main Street tomorrow at 3pm"),
        )
        .await;
        assert_eq!(plan.phase, ConversationPhase::Confirm);
        assert_eq!(plan.data.intent, Some(Intent::ServiceRequest));
        assert_eq!(plan.data.service.as_deref(), Some("oil change"));
        assert_eq!(plan.data.location.as_deref(), Some("123 Main Street"));
        assert_eq!(plan.data.preferred_time.as_deref(), Some("tomorrow at 3pm"));
        assert!(plan.say.contains("Is that correct?"));
        assert!(plan.send_recap);
        assert!(!plan.hangup);
    }

    #[tokio::test]
    async fn progressive_collection_asks_for_next_field() {
        let turn1 = FixedExtractor(ExtractedFields {
            intent: Some(Intent::Booking),
            service: Some("haircut".to_string()),
            ..Default::default()
        });
        let plan = take_turn(
            &turn1,
            ConversationPhase::Collect,
            CollectedData::default(),
            Some("I need a haircut"),
        )
        .await;
        assert_eq!(plan.phase, ConversationPhase::Collect);
        assert_eq!(plan.say, "Where are you located?");

        let turn2 = FixedExtractor(ExtractedFields {
            location: Some("downtown salon on 5th".to_string()),
            ..Default::default()
        });
        let plan = take_turn(
            &turn2,
            ConversationPhase::Collect,
            plan.data,
            Some("downtown salon on 5th"),
        )
        .await;
        assert_eq!(plan.phase, ConversationPhase::Collect);
        assert_eq!(plan.data.service.as_deref(), Some("haircut"));
        assert_eq!(plan.data.location.as_deref(), Some("downtown salon on 5th"));
        assert_eq!(plan.say, "When would work best for you?");
    }

    #[tokio::test]
    async fn affirmation_ends_the_call() {
        let mut data = CollectedData::default();
        data.merge(&full_booking_extraction());
        let plan = take_turn(
            &RuleExtractor,
            ConversationPhase::Confirm,
            data.clone(),
            Some("yes that's right"),
        )
        .await;
        assert_eq!(plan.phase, ConversationPhase::Done);
        assert!(plan.hangup);
        assert!(plan.send_recap);
        assert_eq!(plan.data, data);
    }

    #[tokio::test]
    async fn rejection_returns_to_collect_without_clearing_fields() {
        let mut data = CollectedData::default();
        data.merge(&full_booking_extraction());
        let plan = take_turn(
            &RuleExtractor,
            ConversationPhase::Confirm,
            data.clone(),
            Some("no that's wrong"),
        )
        .await;
        assert_eq!(plan.phase, ConversationPhase::Collect);
        assert_eq!(plan.say, CHANGE_PROMPT);
        assert_eq!(plan.data, data);
        assert!(!plan.send_recap);
    }

    #[tokio::test]
    async fn ambiguous_confirmation_reprompts() {
        let mut data = CollectedData::default();
        data.merge(&full_booking_extraction());
        let plan = take_turn(
            &RuleExtractor,
            ConversationPhase::Confirm,
            data,
            Some("well my cousin said maybe"),
        )
        .await;
        assert_eq!(plan.phase, ConversationPhase::Confirm);
        assert_eq!(plan.say, CONFIRM_NUDGE);
        assert!(!plan.say.contains("service:"));
    }

    #[tokio::test]
    async fn done_is_terminal_for_redelivered_turns() {
        let plan = take_turn(
            &RuleExtractor,
            ConversationPhase::Done,
            CollectedData::default(),
            Some("yes"),
        )
        .await;
        assert_eq!(plan.phase, ConversationPhase::Done);
        assert!(plan.hangup);
    }

    #[tokio::test]
    async fn extraction_failure_falls_back_to_rules() {
        let plan = take_turn(
            &FailingExtractor,
            ConversationPhase::Collect,
            CollectedData::default(),
            Some("my van needs a detail"),
        )
        .await;
        assert_eq!(plan.phase, ConversationPhase::Collect);
        assert_eq!(plan.data.notes.as_deref(), Some("my van needs a detail"));
        assert_eq!(plan.say, "What service can we help you with?");
    }

    #[tokio::test]
    async fn rule_fallback_confirms_once_triple_is_known() {
        let mut data = CollectedData::default();
        data.merge(&full_booking_extraction());
        let plan = take_turn(
            &FailingExtractor,
            ConversationPhase::Collect,
            data,
            Some("also please use synthetic oil"),
        )
        .await;
        assert_eq!(plan.phase, ConversationPhase::Confirm);
        assert!(plan
            .data
            .notes
            .as_deref()
            .unwrap()
            .contains("synthetic oil"));
    }

    #[tokio::test]
    async fn empty_speech_in_confirm_rereads_summary() {
        let mut data = CollectedData::default();
        data.merge(&full_booking_extraction());
        let plan = take_turn(&RuleExtractor, ConversationPhase::Confirm, data, Some("  ")).await;
        assert_eq!(plan.phase, ConversationPhase::Confirm);
        assert!(plan.say.contains("oil change"));
        assert!(plan.say.contains("Is that correct?"));
    }
}
