use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use tracing::{error, info, warn};

use crate::responses::JsonResponse;
use crate::services::paypal::WebhookTransmission;
use crate::services::subscription_events::{dispatch, DispatchOutcome};
use crate::AppState;

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook/paypal", post(handle_paypal_webhook))
}

fn transmission_from_headers(headers: &HeaderMap) -> Option<WebhookTransmission> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    Some(WebhookTransmission {
        transmission_id: get("paypal-transmission-id")?,
        transmission_time: get("paypal-transmission-time")?,
        cert_url: get("paypal-cert-url")?,
        auth_algo: get("paypal-auth-algo")?,
        transmission_sig: get("paypal-transmission-sig")?,
    })
}

/// PayPal webhook listener. The raw body is verified against PayPal's
/// signature endpoint before any of it is trusted; verification failures,
/// transport errors included, are rejected so a delivery is never applied
/// unverified.
pub async fn handle_paypal_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let event: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "webhook body was not valid json");
            return JsonResponse::bad_request("Invalid payload").into_response();
        }
    };

    let event_type = match event.get("event_type").and_then(|v| v.as_str()) {
        Some(event_type) if !event_type.is_empty() => event_type.to_string(),
        _ => {
            warn!("webhook body carried no event_type");
            return JsonResponse::bad_request("Invalid payload").into_response();
        }
    };
    let resource = match event.get("resource") {
        Some(resource) if resource.is_object() => resource.clone(),
        _ => {
            warn!(event_type, "webhook body carried no resource object");
            return JsonResponse::bad_request("Invalid payload").into_response();
        }
    };

    let transmission = match transmission_from_headers(&headers) {
        Some(transmission) => transmission,
        None => {
            warn!(event_type, "webhook delivery missing transmission headers");
            return JsonResponse::bad_request("Missing transmission headers").into_response();
        }
    };

    let webhook_id = state.config.paypal.webhook_id.trim();
    if webhook_id.is_empty() {
        error!("webhook id not configured; rejecting delivery");
        return JsonResponse::bad_request("Webhook verification unavailable").into_response();
    }

    match state
        .paypal
        .verify_webhook_signature(webhook_id, &transmission, &event)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            warn!(
                event_type,
                transmission_id = %transmission.transmission_id,
                "webhook signature verification refused"
            );
            return JsonResponse::bad_request("Signature verification failed").into_response();
        }
        Err(err) => {
            warn!(
                event_type,
                error = %err,
                "webhook signature verification errored"
            );
            return JsonResponse::bad_request("Signature verification failed").into_response();
        }
    }

    let external_event_id = event.get("id").and_then(|v| v.as_str());
    match dispatch(
        state.subscriptions.as_ref(),
        external_event_id,
        &event_type,
        &resource,
        &event,
    )
    .await
    {
        Ok(outcome) => {
            if let DispatchOutcome::Applied(status) = outcome {
                info!(event_type, status = status.as_str(), "webhook event applied");
            }
            JsonResponse::success("Event processed").into_response()
        }
        Err(err) => {
            error!(event_type, error = %err, "webhook event processing failed");
            JsonResponse::server_error("Event processing failed").into_response()
        }
    }
}
