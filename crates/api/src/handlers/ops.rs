use axum::{body::Bytes, extract::State, Json};
use tracing::{debug, info};

use relay_core::IdempotencyGuard;
use relay_domain::{CompleteOutcome, CompletionOutcome, IntentKind};
use relay_errors::RelayError;

use crate::error::ApiResult;
use crate::handlers::parse_body;
use crate::protocol::{
    CompleteRequest, CompleteResponse, LeasedIntentView, NextRequest, NextResponse,
};
use crate::routes::AppState;

/// `POST /ops/next`：租用最旧的待处理意图
pub async fn next_intent(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<NextResponse>> {
    let request: NextRequest = parse_body(&body)?;
    let kind = match request.kind.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<IntentKind>()?),
    };

    let response = match state.queue.lease(kind).await? {
        Some(lease) => NextResponse {
            ok: true,
            key: Some(lease.lease_key.clone()),
            intent: Some(LeasedIntentView::from(&lease)),
        },
        None => {
            debug!("没有可租用的意图 (kind={:?})", kind);
            NextResponse {
                ok: true,
                key: None,
                intent: None,
            }
        }
    };
    Ok(Json(response))
}

fn completion_outcome(request: &CompleteRequest) -> Result<CompletionOutcome, RelayError> {
    match (&request.result, &request.error) {
        (Some(_), Some(_)) => Err(RelayError::validation(
            "exactly one of result or error must be provided, got both",
        )),
        (None, None) => Err(RelayError::validation(
            "exactly one of result or error must be provided",
        )),
        (Some(result), None) => Ok(CompletionOutcome::Success(result.clone())),
        (None, Some(error)) => Ok(CompletionOutcome::Failure(error.clone())),
    }
}

/// `POST /ops/complete`：结束租约
pub async fn complete_intent(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<CompleteResponse>> {
    let request: CompleteRequest = parse_body(&body)?;
    if request.key.trim().is_empty() {
        return Err(RelayError::validation("key must not be empty").into());
    }
    let outcome = completion_outcome(&request)?;
    let token = request.idempotency_key.as_deref();
    if let Some(token) = token {
        IdempotencyGuard::validate_token(token)?;
    }

    let response = match state.queue.complete(&request.key, outcome, token).await? {
        CompleteOutcome::Completed { done_key } => {
            info!("完成租约 {} -> {}", request.key, done_key);
            CompleteResponse {
                ok: true,
                done_key: Some(done_key),
                idempotent: false,
            }
        }
        CompleteOutcome::Idempotent => CompleteResponse {
            ok: true,
            done_key: None,
            idempotent: true,
        },
    };
    Ok(Json(response))
}
