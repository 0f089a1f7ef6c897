mod conversation;
mod db_types;
mod error;
mod extract;
mod handlers;
mod intake;
mod notify;
mod openai_types;
mod session;
mod signature;
mod twilio_types;
mod types;

use crate::extract::{OpenAiExtractor, RuleExtractor, TurnExtractor};
use crate::signature::SignatureVerifier;
use crate::types::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;

pub mod consts {
    pub const APP_GREETING: &str = "Hi.  How may I help you?";
    pub const CONFIRM_NUDGE: &str = "Just say yes or no.  Is that correct?";
    pub const CHANGE_PROMPT: &str = "Okay, what should I change?";
    pub const CLOSING_REMARK: &str =
        "You're all set.  We'll text you a recap in a moment.  Goodbye.";
    pub const FALLBACK_GOODBYE: &str = "Sorry, I didn't catch anything.  Goodbye.";
    pub const APOLOGY: &str = "Sorry, something went wrong on our end.  Please call back later.";
    pub const VOICE_WEBHOOK_PATH: &str = "/twilio/voice";
    pub const STATUS_WEBHOOK_PATH: &str = "/twilio/status";
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(tracing_subscriber::filter::Targets::new().with_targets([
            ("hyper", tracing_subscriber::filter::LevelFilter::OFF),
            ("frontdesk_rs", tracing_subscriber::filter::LevelFilter::DEBUG),
        ]));
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let twilio_account_sid = env::var("TWILIO_ACCOUNT_SID").expect("TWILIO_ACCOUNT_SID not set!");
    let twilio_auth_token = env::var("TWILIO_AUTH_TOKEN").expect("TWILIO_AUTH_TOKEN not set!");
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL not set!");
    let public_base_url = env::var("PUBLIC_BASE_URL").expect("PUBLIC_BASE_URL not set!");
    let openai_api_key = env::var("OPENAI_API_KEY").ok();
    let sms_enabled = env::var("SMS_ENABLED")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true);

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("failed to connect to database");
    sqlx::migrate!()
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let http_client = reqwest::Client::new();
    let extractor: Arc<dyn TurnExtractor> = match openai_api_key {
        Some(api_key) => {
            info!("using AI-assisted turn extraction");
            Arc::new(OpenAiExtractor::new(api_key, http_client.clone()))
        }
        None => {
            info!("no OPENAI_API_KEY; using rule-based turn extraction");
            Arc::new(RuleExtractor)
        }
    };
    let verifier = SignatureVerifier::new(twilio_auth_token.clone(), public_base_url);

    let app_state = Arc::new(AppState {
        twilio_account_sid,
        twilio_auth_token,
        sms_enabled,
        http_client,
        db_pool,
        verifier,
        extractor,
    });

    let app = Router::new()
        .route(consts::VOICE_WEBHOOK_PATH, post(handlers::voice_handler))
        .route(consts::STATUS_WEBHOOK_PATH, post(handlers::status_handler))
        .route("/", get(|| async { "OK" }))
        .with_state(app_state);

    axum::Server::bind(&"0.0.0.0:3000".parse().unwrap())
        .serve(app.into_make_service())
        .await
        .unwrap();
}
