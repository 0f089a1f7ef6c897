use base64::{engine, Engine};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tracing::error;

type HmacSha1 = Hmac<Sha1>;

/// Verifies `X-Twilio-Signature` on inbound webhooks.  Twilio signs the
/// public URL it POSTed to plus the form parameters sorted by key, with the
/// account auth token as the HMAC-SHA1 key.  The public origin is
/// configuration rather than reconstructed per request, so the check holds
/// behind proxies.
pub struct SignatureVerifier {
    auth_token: String,
    base_url: String,
}

impl SignatureVerifier {
    pub fn new(auth_token: String, base_url: String) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            auth_token,
            base_url,
        }
    }

    /// Check a form-encoded webhook body against the signature header value.
    pub fn verify(&self, path: &str, body: &str, signature: &str) -> bool {
        match self.compute(path, body) {
            Ok(expected) => constant_time_eq(expected.as_bytes(), signature.as_bytes()),
            Err(e) => {
                error!(error=%e, "failed to compute webhook signature");
                false
            }
        }
    }

    fn compute(&self, path: &str, body: &str) -> Result<String, crate::error::AppError> {
        let mut params: Vec<(String, String)> =
            serde_urlencoded::from_str(body).map_err(|e| {
                error!(error=%e, "failed to parse webhook body for signing");
                crate::error::AppError("bad webhook body")
            })?;
        params.sort();
        let mut payload = format!("{}{}", self.base_url, path);
        for (key, value) in &params {
            payload.push_str(key);
            payload.push_str(value);
        }
        let mut mac = HmacSha1::new_from_slice(self.auth_token.as_bytes()).map_err(|e| {
            error!(error=%e, "failed to build hmac from auth token");
            crate::error::AppError("hmac key error")
        })?;
        mac.update(payload.as_bytes());
        let digest = mac.finalize().into_bytes();
        Ok(engine::general_purpose::STANDARD.encode(digest))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(
            "12345abcdef".to_string(),
            "https://frontdesk.example.com/".to_string(),
        )
    }

    #[test]
    fn accepts_its_own_signature() {
        let v = verifier();
        let body = "CallSid=CA123&From=%2B15551234567&SpeechResult=hello";
        let sig = v.compute("/twilio/voice", body).unwrap();
        assert!(v.verify("/twilio/voice", body, &sig));
    }

    #[test]
    fn signing_is_order_insensitive() {
        let v = verifier();
        let sig = v
            .compute("/twilio/voice", "From=%2B15551234567&CallSid=CA123")
            .unwrap();
        assert!(v.verify("/twilio/voice", "CallSid=CA123&From=%2B15551234567", &sig));
    }

    #[test]
    fn rejects_tampered_body() {
        let v = verifier();
        let sig = v.compute("/twilio/voice", "CallSid=CA123").unwrap();
        assert!(!v.verify("/twilio/voice", "CallSid=CA999", &sig));
    }

    #[test]
    fn rejects_wrong_path() {
        let v = verifier();
        let sig = v.compute("/twilio/voice", "CallSid=CA123").unwrap();
        assert!(!v.verify("/twilio/status", "CallSid=CA123", &sig));
    }

    #[test]
    fn rejects_garbage_signature() {
        let v = verifier();
        assert!(!v.verify("/twilio/voice", "CallSid=CA123", "not-a-signature"));
    }
}
