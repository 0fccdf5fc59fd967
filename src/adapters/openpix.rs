pub mod verifier;

use {
    crate::{
        AppState,
        adapters::api_errors::ApiError,
        domain::notification::Notification,
        services::reconciler::{ProcessResult, process_notification},
    },
    axum::{
        Json,
        body::Bytes,
        extract::State,
        http::{HeaderMap, header::CONTENT_TYPE},
    },
};

const ACTOR: &str = "webhook:pix_openpix";

/// Success acknowledgement. Every outcome here stops provider retries,
/// including the no-ops.
pub fn acknowledge(result: &ProcessResult) -> Json<serde_json::Value> {
    let body = match result {
        ProcessResult::Confirmed {
            payment_id,
            order_paid,
        } => serde_json::json!({
            "status": result.as_str(),
            "payment_id": payment_id,
            "order_paid": order_paid,
        }),
        ProcessResult::Refunded {
            payment_id,
            applied,
            fully_refunded,
        } => serde_json::json!({
            "status": result.as_str(),
            "payment_id": payment_id,
            "applied": applied,
            "fully_refunded": fully_refunded,
        }),
        ProcessResult::Duplicate(id)
        | ProcessResult::Stale(id)
        | ProcessResult::AmountMismatch(id)
        | ProcessResult::RefundsSkipped(id) => serde_json::json!({
            "status": result.as_str(),
            "payment_id": id,
        }),
        ProcessResult::NotFound | ProcessResult::Ignored => {
            serde_json::json!({ "status": result.as_str() })
        }
    };
    Json(body)
}

#[tracing::instrument(
    name = "webhook",
    skip_all,
    fields(correlation_id = tracing::field::Empty, event = tracing::field::Empty)
)]
pub async fn openpix_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.verifier.verify(&body, &headers)?;

    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let notification = Notification::parse(&body, content_type).inspect_err(|e| {
        tracing::warn!(error = %e, "rejecting malformed webhook body");
    })?;

    tracing::Span::current()
        .record("correlation_id", tracing::field::display(notification.correlation_id()))
        .record("event", tracing::field::display(notification.event()));

    let result = process_notification(
        state.repo.as_ref(),
        &notification,
        state.repo_timeout,
        ACTOR,
    )
    .await?;

    Ok(acknowledge(&result))
}
