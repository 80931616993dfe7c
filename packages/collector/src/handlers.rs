use crate::error::{AppError, AppResult};
use crate::models::{
    CaptureResponse, CreateEndpointResponse, EndpointDetailResponse, FetchPayloadsQuery,
    HealthResponse,
};
use crate::service::InboundCapture;
use crate::sse::SseStream;
use crate::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use tracing::{info, instrument};
use uuid::Uuid;

/// Extract real client IP address from request headers
fn extract_ip_address(req: &HttpRequest) -> String {
    // Priority: X-Real-IP > X-Forwarded-For (first IP) > peer address
    if let Some(real_ip) = req.headers().get("X-Real-IP") {
        if let Ok(ip) = real_ip.to_str() {
            return ip.to_string();
        }
    }

    if let Some(forwarded) = req.headers().get("X-Forwarded-For") {
        if let Ok(ips) = forwarded.to_str() {
            if let Some(first_ip) = ips.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }

    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Extract User-Agent header
fn get_user_agent(req: &HttpRequest) -> String {
    req.headers()
        .get("User-Agent")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Validate endpoint identifier format
fn parse_endpoint_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::InvalidEndpointId(raw.to_string()))
}

/// Health check endpoint
#[instrument(skip(state))]
pub async fn health_check_handler(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        endpoints: state.registry.len(),
        sse_channels: state.hub.channel_count(),
    };

    Ok(HttpResponse::Ok().json(response))
}

/// Create a new capture endpoint
#[instrument(skip(state, req))]
pub async fn create_endpoint_handler(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let client_key = extract_ip_address(&req);
    let endpoint = state.service.create_endpoint(&client_key)?;

    info!(endpoint_id = %endpoint.id, "Created new endpoint");

    Ok(HttpResponse::Created().json(CreateEndpointResponse {
        id: endpoint.id,
        path: endpoint.path.clone(),
    }))
}

/// List all live endpoints
#[instrument(skip(state))]
pub async fn list_endpoints_handler(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let summaries = state.registry.list().await;
    Ok(HttpResponse::Ok().json(summaries))
}

/// Fetch one endpoint with its payload history
#[instrument(skip(state))]
pub async fn get_endpoint_handler(
    path: web::Path<String>,
    query: web::Query<FetchPayloadsQuery>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let endpoint_id = parse_endpoint_id(&path.into_inner())?;

    let endpoint = state
        .registry
        .lookup(&endpoint_id)
        .ok_or(AppError::EndpointNotFound)?;

    let limit = query.validated_limit();
    let offset = query.offset;

    let payloads = endpoint
        .history
        .read()
        .await
        .page(limit, offset)
        .iter()
        .map(|payload| payload.as_ref().clone())
        .collect();

    Ok(HttpResponse::Ok().json(EndpointDetailResponse {
        id: endpoint.id,
        path: endpoint.path.clone(),
        payloads,
    }))
}

/// Capture an inbound request (base path without tail)
#[instrument(skip(state, req, body), fields(method = %req.method(), path = %req.path()))]
pub async fn capture_handler_base(
    path: web::Path<String>,
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let endpoint_id = path.into_inner();
    capture_impl(endpoint_id, req, body, state).await
}

/// Capture an inbound request (with tail path)
#[instrument(skip(state, req, body), fields(method = %req.method(), path = %req.path()))]
pub async fn capture_handler(
    path: web::Path<(String, String)>,
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let (endpoint_id, _tail) = path.into_inner();
    capture_impl(endpoint_id, req, body, state).await
}

/// Internal implementation for request capture
async fn capture_impl(
    endpoint_id: String,
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let endpoint_id = parse_endpoint_id(&endpoint_id)?;

    let max_size = state.settings.server.max_body_size;
    if body.len() > max_size {
        return Err(AppError::PayloadTooLarge {
            size: body.len(),
            limit: max_size,
        });
    }

    let headers = req
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).to_string(),
            )
        })
        .collect();

    let content_type = req
        .headers()
        .get("Content-Type")
        .and_then(|h| h.to_str().ok())
        .map(|ct| ct.to_string());

    let client_key = extract_ip_address(&req);
    let inbound = InboundCapture {
        method: req.method().to_string(),
        path: req.path().to_string(),
        query_string: req.query_string().to_string(),
        content_type,
        headers,
        body: body.to_vec(),
        user_agent: get_user_agent(&req),
        ip_address: client_key.clone(),
    };

    state
        .service
        .capture(&client_key, endpoint_id, inbound)
        .await?;

    Ok(HttpResponse::Ok().json(CaptureResponse {
        status: "success".to_string(),
    }))
}

/// Stream captured payloads via SSE
#[instrument(skip(state, req))]
pub async fn stream_payloads_handler(
    path: web::Path<String>,
    req: HttpRequest,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let endpoint_id = parse_endpoint_id(&path.into_inner())?;

    let subscription = state.service.subscribe(endpoint_id)?;

    info!(
        endpoint_id = %endpoint_id,
        subscribers = state.hub.subscriber_count(&endpoint_id),
        "Client attached to SSE stream"
    );

    let sse_stream = SseStream::new(subscription);

    // Get origin from request for CORS
    let origin = req
        .headers()
        .get("origin")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("*");

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache, no-transform"))
        .insert_header(("Connection", "keep-alive"))
        .insert_header(("X-Accel-Buffering", "no")) // Disable nginx buffering
        .insert_header(("Access-Control-Allow-Origin", origin))
        .insert_header(("Access-Control-Allow-Credentials", "true"))
        .insert_header(("Access-Control-Allow-Headers", "Cache-Control"))
        .insert_header(("Access-Control-Expose-Headers", "Content-Type"))
        .streaming(sse_stream))
}
