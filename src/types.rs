use crate::extract::TurnExtractor;
use crate::signature::SignatureVerifier;

use sqlx::{Pool, Postgres};
use std::sync::Arc;

pub struct AppState {
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    /// Global kill switch for outbound messaging; when false the recap
    /// notifier no-ops without touching the idempotency guard.
    pub sms_enabled: bool,
    pub http_client: reqwest::Client,
    pub db_pool: Pool<Postgres>,
    pub verifier: SignatureVerifier,
    /// Active extraction strategy, chosen at boot from configuration.
    pub extractor: Arc<dyn TurnExtractor>,
}
