use {
    crate::{config::WebhookAuthConfig, domain::error::PipelineError},
    axum::http::HeaderMap,
    hmac::{Hmac, Mac},
    sha2::Sha256,
    subtle::ConstantTimeEq,
};

type HmacSha256 = Hmac<Sha256>;

/// Authenticates a delivery before anything looks at its contents.
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    config: WebhookAuthConfig,
}

fn reject(reason: &str) -> PipelineError {
    tracing::warn!(target: "security", reason, "webhook integrity check failed");
    PipelineError::IntegrityFailure(reason.to_string())
}

impl WebhookVerifier {
    pub fn new(config: WebhookAuthConfig) -> Self {
        Self { config }
    }

    pub fn verify(&self, body: &[u8], headers: &HeaderMap) -> Result<(), PipelineError> {
        let provided = headers
            .get(self.config.header.as_str())
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| reject("missing secret header"))?;
        let provided = provided.strip_prefix("Bearer ").unwrap_or(provided).trim();

        let secret_ok: bool = provided
            .as_bytes()
            .ct_eq(self.config.secret.as_bytes())
            .into();
        if !secret_ok {
            return Err(reject("secret mismatch"));
        }

        if let Some(key) = &self.config.hmac_secret {
            let header = headers
                .get(self.config.signature_header.as_str())
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| reject("missing signature header"))?;
            let hex_part = header.trim().strip_prefix("sha256=").unwrap_or(header.trim());
            let provided = hex::decode(hex_part).map_err(|_| reject("signature is not valid hex"))?;

            let mut mac = HmacSha256::new_from_slice(key.as_bytes())
                .map_err(|_| reject("invalid hmac key"))?;
            mac.update(body);
            let expected = mac.finalize().into_bytes();

            let signature_ok: bool = expected.as_slice().ct_eq(provided.as_slice()).into();
            if !signature_ok {
                return Err(reject("signature mismatch"));
            }
        }

        Ok(())
    }
}
