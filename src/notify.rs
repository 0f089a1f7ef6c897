use crate::error::AppError;
use crate::intake::CollectedData;
use crate::session;
use crate::twilio_types::TwilioMessageResponse;
use crate::types::AppState;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

const RECAP_FALLBACK: &str =
    "Thanks for calling!  We captured your request; some details may still be missing.";

/// Human-readable recap of whatever intake fields we have.
pub fn build_recap(data: &CollectedData) -> String {
    let parts = data.summary_parts();
    if parts.is_empty() {
        RECAP_FALLBACK.to_string()
    } else {
        format!("Thanks for calling!  Here's what we have: {}.", parts.join("; "))
    }
}

/// Send the one-shot recap message for a call.
///
/// The guard is claimed with a conditional update before the send, so only
/// one delivery of a replayed transition can reach the provider.  A failed
/// send releases the claim and records the error on the session; nothing
/// here ever propagates into the webhook response.
pub async fn send_recap(
    app_state: &Arc<AppState>,
    call_sid: &str,
    to_number: &str,
    from_number: &str,
    data: &CollectedData,
) {
    if !app_state.sms_enabled {
        debug!(call_sid=%call_sid, "outbound messaging disabled; skipping recap");
        return;
    }
    if to_number.is_empty() || from_number.is_empty() {
        debug!(call_sid=%call_sid, "missing phone number; skipping recap");
        return;
    }
    let claimed = match session::claim_recap(&app_state.db_pool, call_sid).await {
        Ok(claimed) => claimed,
        Err(e) => {
            error!(error=%e, call_sid=%call_sid, "failed to check recap guard");
            return;
        }
    };
    if !claimed {
        debug!(call_sid=%call_sid, "recap already sent; skipping");
        return;
    }

    match send_sms(app_state, to_number, from_number, &build_recap(data)).await {
        Ok(sms_sid) => {
            info!(call_sid=%call_sid, sms_sid=%sms_sid, "sent recap sms");
            if let Err(e) = session::record_recap_sid(&app_state.db_pool, call_sid, &sms_sid).await
            {
                error!(error=%e, call_sid=%call_sid, "failed to record recap sid");
            }
        }
        Err(e) => {
            error!(error=%e, call_sid=%call_sid, "failed to send recap sms");
            session::record_notify_error(&app_state.db_pool, call_sid, e.0).await;
            if let Err(e) = session::release_recap(&app_state.db_pool, call_sid).await {
                error!(error=%e, call_sid=%call_sid, "failed to release recap guard");
            }
        }
    }
}

async fn send_sms(
    app_state: &Arc<AppState>,
    to: &str,
    from: &str,
    body: &str,
) -> Result<String, AppError> {
    let account_sid = &app_state.twilio_account_sid;
    let url = format!("https://api.twilio.com/2010-04-01/Accounts/{account_sid}/Messages.json");
    let mut form = HashMap::new();
    form.insert("From", from);
    form.insert("To", to);
    form.insert("Body", body);
    let resp = app_state
        .http_client
        .post(url)
        .basic_auth(account_sid, Some(&app_state.twilio_auth_token))
        .form(&form)
        .send()
        .await
        .map_err(|e| {
            error!(error=%e, "failed to send sms request to twilio");
            AppError("twilio sms api")
        })?;
    if !resp.status().is_success() {
        error!(status=%resp.status(), "twilio sms api rejected the message");
        return Err(AppError("twilio sms api rejected the message"));
    }
    let message = resp.json::<TwilioMessageResponse>().await.map_err(|e| {
        error!(error=%e, "failed to deserialize twilio sms response");
        AppError("twilio sms response")
    })?;
    Ok(message.sid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::RuleExtractor;
    use crate::intake::ExtractedFields;
    use crate::signature::SignatureVerifier;
    use sqlx::postgres::PgPoolOptions;

    fn app_state(sms_enabled: bool) -> Arc<AppState> {
        // Lazy pool: valid to construct, never connected by these tests.
        let db_pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        Arc::new(AppState {
            twilio_account_sid: "AC00000000".to_string(),
            twilio_auth_token: "token".to_string(),
            sms_enabled,
            http_client: reqwest::Client::new(),
            db_pool,
            verifier: SignatureVerifier::new(
                "token".to_string(),
                "https://frontdesk.example.com".to_string(),
            ),
            extractor: Arc::new(RuleExtractor),
        })
    }

    #[tokio::test]
    async fn disabled_messaging_skips_before_the_guard() {
        let state = app_state(false);
        send_recap(
            &state,
            "CA123",
            "+15551234567",
            "+15557654321",
            &CollectedData::default(),
        )
        .await;
    }

    #[tokio::test]
    async fn missing_destination_skips_before_the_guard() {
        let state = app_state(true);
        send_recap(&state, "CA123", "", "+15557654321", &CollectedData::default()).await;
    }

    #[test]
    fn recap_joins_present_fields() {
        let mut data = CollectedData::default();
        data.merge(&ExtractedFields {
            service: Some("oil change".to_string()),
            location: Some("123 Main Street".to_string()),
            preferred_time: Some("tomorrow at 3pm".to_string()),
            caller_name: Some("Sam".to_string()),
            ..Default::default()
        });
        let recap = build_recap(&data);
        assert!(recap.contains("service: oil change"));
        assert!(recap.contains("location: 123 Main Street"));
        assert!(recap.contains("time: tomorrow at 3pm"));
        assert!(recap.contains("name: Sam"));
        assert!(recap.contains("; "));
    }

    #[test]
    fn recap_falls_back_when_nothing_captured() {
        assert_eq!(build_recap(&CollectedData::default()), RECAP_FALLBACK);
    }
}
