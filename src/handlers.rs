use crate::consts::{APOLOGY, FALLBACK_GOODBYE, STATUS_WEBHOOK_PATH, VOICE_WEBHOOK_PATH};
use crate::conversation::{take_turn, TurnPlan};
use crate::intake::{CollectedData, ConversationPhase};
use crate::notify;
use crate::session;
use crate::twilio_types::{
    wrap_twiml, GatherAction, HangupAction, Response, ResponseAction, SayAction,
    TwilioStatusPayload, TwilioVoicePayload,
};
use crate::types::AppState;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

fn signature_header(headers: &HeaderMap) -> &str {
    headers
        .get("X-Twilio-Signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn xml_response(twiml: String) -> (StatusCode, HeaderMap, String) {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, "application/xml".parse().unwrap());
    (StatusCode::OK, headers, twiml)
}

fn say(text: &str) -> ResponseAction {
    ResponseAction::Say(SayAction {
        text: text.to_string(),
        ..Default::default()
    })
}

/// Speak-and-hang-up document, used for terminal turns and for unverified
/// requests.
fn hangup_twiml(text: &str) -> String {
    let response = Response {
        actions: vec![say(text), ResponseAction::Hangup(HangupAction {})],
    };
    wrap_twiml(xmlserde::xml_serialize(response))
}

/// Speak a prompt inside a speech Gather.  If the caller stays silent the
/// gather times out and the document falls through to a goodbye and a
/// hangup, which is how a silent caller ends the call without another
/// round trip.
fn gather_twiml(prompt: &str) -> String {
    let gather = GatherAction {
        input: Some("speech".to_string()),
        action: Some(VOICE_WEBHOOK_PATH.to_string()),
        method: Some("POST".to_string()),
        speech_timeout: Some("auto".to_string()),
        say: Some(SayAction {
            text: prompt.to_string(),
            ..Default::default()
        }),
    };
    let response = Response {
        actions: vec![
            ResponseAction::Gather(gather),
            say(FALLBACK_GOODBYE),
            ResponseAction::Hangup(HangupAction {}),
        ],
    };
    wrap_twiml(xmlserde::xml_serialize(response))
}

/// The speech-turn webhook.  Every delivery is handled statelessly: load
/// the session, advance the conversation, persist, answer TwiML.  Internal
/// failures degrade to a spoken response rather than stranding the caller.
pub async fn voice_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    trace!(body=%body, "voice webhook body");
    if !app_state
        .verifier
        .verify(VOICE_WEBHOOK_PATH, &body, signature_header(&headers))
    {
        warn!("rejecting voice webhook with bad signature");
        return xml_response(hangup_twiml(APOLOGY));
    }
    let payload = match serde_urlencoded::from_str::<TwilioVoicePayload>(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error=%e, "failed to deserialize voice payload");
            return (
                StatusCode::BAD_REQUEST,
                HeaderMap::new(),
                "Bad request".to_string(),
            );
        }
    };

    // A failed load still gets a spoken turn; the session just starts from
    // scratch and the next successful write catches up.
    let session_row = session::fetch_or_create(
        &app_state.db_pool,
        &payload.call_sid,
        payload.from.as_deref(),
        payload.to.as_deref(),
    )
    .await;
    let (prior, phase, transcript, sms_to, sms_from) = match &session_row {
        Ok(row) => (
            row.collected_data(),
            row.phase(),
            row.transcript.clone(),
            row.from_number.clone(),
            row.to_number.clone(),
        ),
        Err(e) => {
            error!(error=%e, call_sid=%payload.call_sid, "proceeding without session row");
            (
                CollectedData::default(),
                ConversationPhase::Collect,
                String::new(),
                payload.from.clone(),
                payload.to.clone(),
            )
        }
    };

    let speech = payload.speech_result.as_deref();
    let plan = take_turn(app_state.extractor.as_ref(), phase, prior, speech).await;
    debug!(call_sid=%payload.call_sid, phase=%plan.phase.as_str(), say=%plan.say, "turn plan");

    let transcript = match speech.map(str::trim).filter(|s| !s.is_empty()) {
        Some(line) => session::append_transcript(&transcript, line),
        None => transcript,
    };
    if session_row.is_ok() {
        if let Err(e) = session::persist_turn(
            &app_state.db_pool,
            &payload.call_sid,
            &plan.data,
            plan.phase,
            &transcript,
        )
        .await
        {
            error!(error=%e, call_sid=%payload.call_sid, "turn not persisted; answering anyway");
        }
    }

    if plan.send_recap {
        notify::send_recap(
            &app_state,
            &payload.call_sid,
            sms_to.as_deref().unwrap_or(""),
            sms_from.as_deref().unwrap_or(""),
            &plan.data,
        )
        .await;
    }

    let twiml = render_plan(&plan);
    trace!(twiml=%twiml, "voice twiml");
    xml_response(twiml)
}

fn render_plan(plan: &TurnPlan) -> String {
    if plan.hangup {
        hangup_twiml(&plan.say)
    } else {
        gather_twiml(&plan.say)
    }
}

/// Call lifecycle callback.  Only touches status, duration, and ended_at;
/// a concurrent voice turn keeps ownership of the intake fields.
pub async fn status_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    trace!(body=%body, "status webhook body");
    if !app_state
        .verifier
        .verify(STATUS_WEBHOOK_PATH, &body, signature_header(&headers))
    {
        warn!("rejecting status webhook with bad signature");
        return StatusCode::FORBIDDEN;
    }
    let payload = match serde_urlencoded::from_str::<TwilioStatusPayload>(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error=%e, "failed to deserialize status payload");
            return StatusCode::BAD_REQUEST;
        }
    };
    let duration_secs = payload.call_duration.as_deref().and_then(|d| d.parse().ok());
    if let Err(e) = session::record_status(
        &app_state.db_pool,
        &payload.call_sid,
        payload.call_status,
        duration_secs,
    )
    .await
    {
        error!(error=%e, call_sid=%payload.call_sid, "status not recorded");
    }
    StatusCode::OK
}
