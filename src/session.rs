use crate::db_types::CallSessionRow;
use crate::error::AppError;
use crate::intake::{CollectedData, ConversationPhase};
use crate::twilio_types::CallStatus;

use sqlx::{Pool, Postgres};
use tracing::error;

/// Session status vocabulary stored in `call_sessions.status`.  `handled`
/// means the conversation reached its terminal phase; the rest mirror the
/// telephony provider's lifecycle statuses.
pub fn status_for(call_status: CallStatus) -> &'static str {
    match call_status {
        CallStatus::Completed => "completed",
        CallStatus::Busy => "busy",
        CallStatus::Failed => "failed",
        CallStatus::NoAnswer => "no-answer",
        CallStatus::Queued | CallStatus::Ringing | CallStatus::InProgress => "in-progress",
    }
}

/// Upsert-by-call-sid on the first (or any retried) delivery for a call.
/// Conflicting upserts only fill numbers that are still unknown; they never
/// clobber what an earlier delivery recorded.
pub async fn fetch_or_create(
    pool: &Pool<Postgres>,
    call_sid: &str,
    from_number: Option<&str>,
    to_number: Option<&str>,
) -> Result<CallSessionRow, AppError> {
    sqlx::query_as::<_, CallSessionRow>(
        "
        insert into call_sessions (call_sid, from_number, to_number)
        values ($1, $2, $3)
        on conflict (call_sid) do update set
          from_number = coalesce(call_sessions.from_number, excluded.from_number),
          to_number = coalesce(call_sessions.to_number, excluded.to_number)
        returning *
        ",
    )
    .bind(call_sid)
    .bind(from_number)
    .bind(to_number)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        error!(error=%e, call_sid=%call_sid, "failed to upsert call session");
        AppError("db error")
    })
}

/// Write one turn's outcome.  Intake fields merge via coalesce so an
/// interleaved write can only add information; phase and transcript are
/// whole-value.  A status already made terminal by the status callback is
/// left alone.
pub async fn persist_turn(
    pool: &Pool<Postgres>,
    call_sid: &str,
    data: &CollectedData,
    phase: ConversationPhase,
    transcript: &str,
) -> Result<(), AppError> {
    let status = match phase {
        ConversationPhase::Done => "handled",
        _ => "in-progress",
    };
    sqlx::query(
        "
        update call_sessions set
          intent = coalesce($2, intent),
          caller_name = coalesce($3, caller_name),
          service = coalesce($4, service),
          vehicle_or_item = coalesce($5, vehicle_or_item),
          location = coalesce($6, location),
          preferred_time = coalesce($7, preferred_time),
          notes = coalesce($8, notes),
          phase = $9,
          transcript = $10,
          status = case when ended_at is null then $11 else status end
        where call_sid = $1
        ",
    )
    .bind(call_sid)
    .bind(data.intent.map(|i| i.as_str()))
    .bind(data.caller_name.as_deref())
    .bind(data.service.as_deref())
    .bind(data.vehicle_or_item.as_deref())
    .bind(data.location.as_deref())
    .bind(data.preferred_time.as_deref())
    .bind(data.notes.as_deref())
    .bind(phase.as_str())
    .bind(transcript)
    .bind(status)
    .execute(pool)
    .await
    .map_err(|e| {
        error!(error=%e, call_sid=%call_sid, "failed to persist turn");
        AppError("db error")
    })?;
    Ok(())
}

/// Status-callback upsert.  Touches only status, duration, and ended_at;
/// the voice-turn handler owns everything else on the row.
pub async fn record_status(
    pool: &Pool<Postgres>,
    call_sid: &str,
    call_status: CallStatus,
    duration_secs: Option<i32>,
) -> Result<(), AppError> {
    sqlx::query(
        "
        insert into call_sessions (call_sid, status, call_duration_secs, ended_at)
        values ($1, $2, $3, case when $4 then now() else null end)
        on conflict (call_sid) do update set
          status = excluded.status,
          call_duration_secs = coalesce(excluded.call_duration_secs, call_sessions.call_duration_secs),
          ended_at = coalesce(call_sessions.ended_at, excluded.ended_at)
        ",
    )
    .bind(call_sid)
    .bind(status_for(call_status))
    .bind(duration_secs)
    .bind(call_status.is_terminal())
    .execute(pool)
    .await
    .map_err(|e| {
        error!(error=%e, call_sid=%call_sid, "failed to record call status");
        AppError("db error")
    })?;
    Ok(())
}

/// Atomically claim the one-shot recap send.  Returns true for exactly one
/// caller per session; a redelivered transition sees false and skips.
pub async fn claim_recap(pool: &Pool<Postgres>, call_sid: &str) -> Result<bool, AppError> {
    let result = sqlx::query(
        "update call_sessions set sms_sent = true where call_sid = $1 and sms_sent = false",
    )
    .bind(call_sid)
    .execute(pool)
    .await
    .map_err(|e| {
        error!(error=%e, call_sid=%call_sid, "failed to claim recap guard");
        AppError("db error")
    })?;
    Ok(result.rows_affected() == 1)
}

/// Give the claim back after a failed send so a later delivery can retry.
pub async fn release_recap(pool: &Pool<Postgres>, call_sid: &str) -> Result<(), AppError> {
    sqlx::query("update call_sessions set sms_sent = false where call_sid = $1")
        .bind(call_sid)
        .execute(pool)
        .await
        .map_err(|e| {
            error!(error=%e, call_sid=%call_sid, "failed to release recap guard");
            AppError("db error")
        })?;
    Ok(())
}

pub async fn record_recap_sid(
    pool: &Pool<Postgres>,
    call_sid: &str,
    sms_sid: &str,
) -> Result<(), AppError> {
    sqlx::query("update call_sessions set sms_sid = $2 where call_sid = $1")
        .bind(call_sid)
        .bind(sms_sid)
        .execute(pool)
        .await
        .map_err(|e| {
            error!(error=%e, call_sid=%call_sid, "failed to record recap sid");
            AppError("db error")
        })?;
    Ok(())
}

pub async fn record_notify_error(pool: &Pool<Postgres>, call_sid: &str, message: &str) {
    let res = sqlx::query("update call_sessions set notify_error = $2 where call_sid = $1")
        .bind(call_sid)
        .bind(message)
        .execute(pool)
        .await;
    if let Err(e) = res {
        error!(error=%e, call_sid=%call_sid, "failed to record notify error");
    }
}

/// Append one speech line to the running transcript.  A line identical to
/// the previous one is dropped, so a redelivered webhook cannot double-append
/// the same turn.
pub fn append_transcript(transcript: &str, line: &str) -> String {
    if transcript.lines().last() == Some(line) {
        return transcript.to_string();
    }
    if transcript.is_empty() {
        line.to_string()
    } else {
        format!("{transcript}\n{line}")
    }
}
