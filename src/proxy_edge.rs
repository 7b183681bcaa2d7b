//! Forward-proxy "thin edge" that drives the flow controller's hooks over
//! real HTTP traffic.
//!
//! Actual TLS interception (certificate generation, the MITM engine itself)
//! is out of scope; a `CONNECT` tunnel is relayed blind, byte for byte.
//! Plain absolute-URI HTTP requests — the shape a client sees once its
//! `HTTP_PROXY`/`HTTPS_PROXY` points here — are captured and relayed through
//! `reqwest`, mirroring the request/responseheaders/stream/response hook
//! sequence the capture pipeline expects.

use crate::flow::FlowController;
use crate::model::Headers;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::net::TcpStream;

#[derive(Clone)]
struct EdgeState {
    controller: Arc<FlowController>,
    client: reqwest::Client,
}

pub fn router(controller: Arc<FlowController>, client: reqwest::Client) -> Router {
    Router::new().fallback(handle).with_state(EdgeState { controller, client })
}

async fn handle(State(state): State<EdgeState>, req: Request<Body>) -> Response {
    if req.method() == Method::CONNECT {
        return handle_connect(req).await;
    }
    handle_forward(state, req).await
}

async fn handle_connect(req: Request<Body>) -> Response {
    let Some(authority) = req.uri().authority().map(|a| a.to_string()) else {
        return (StatusCode::BAD_REQUEST, "CONNECT requires an authority").into_response();
    };
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(err) = tunnel(upgraded, &authority).await {
                    tracing::debug!(error = %err, %authority, "CONNECT tunnel closed");
                }
            }
            Err(err) => tracing::debug!(error = %err, "CONNECT upgrade failed"),
        }
    });
    Response::new(Body::empty())
}

async fn tunnel(upgraded: hyper::upgrade::Upgraded, authority: &str) -> std::io::Result<()> {
    let mut server = TcpStream::connect(authority).await?;
    let mut client = TokioIo::new(upgraded);
    tokio::io::copy_bidirectional(&mut client, &mut server).await?;
    Ok(())
}

async fn handle_forward(state: EdgeState, req: Request<Body>) -> Response {
    let method = req.method().clone();
    let url = req.uri().to_string();
    let host = req.uri().host().unwrap_or_default().to_string();
    let path = req.uri().path().to_string();

    let mut headers = Headers::new();
    for (name, value) in req.headers() {
        if let Ok(v) = value.to_str() {
            headers.insert(name.to_string(), v.to_string());
        }
    }

    let body_bytes = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(b) => b,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    let body_text = String::from_utf8_lossy(&body_bytes).into_owned();

    let flow_id = state.controller.on_request(method.as_str(), &url, &host, &path, headers.clone(), &body_text).await;

    let upstream_method = reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET);
    let mut upstream = state.client.request(upstream_method, &url);
    for (name, value) in &headers {
        if is_hop_by_hop(name) {
            continue;
        }
        upstream = upstream.header(name, value);
    }
    if !body_bytes.is_empty() {
        upstream = upstream.body(body_bytes.to_vec());
    }

    let upstream_resp = match upstream.send().await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::error!(error = %err, %url, "upstream request failed");
            return (StatusCode::BAD_GATEWAY, err.to_string()).into_response();
        }
    };

    let status = upstream_resp.status();
    let mut response_headers = Headers::new();
    for (name, value) in upstream_resp.headers() {
        if let Ok(v) = value.to_str() {
            response_headers.insert(name.to_string(), v.to_string());
        }
    }
    let content_type = response_headers.get("content-type").cloned().unwrap_or_default();
    state.controller.on_response_headers(flow_id, &content_type);

    let mut builder = Response::builder().status(status.as_u16());
    for (name, value) in &response_headers {
        if is_hop_by_hop(name) {
            continue;
        }
        builder = builder.header(name, value);
    }

    if crate::sse::is_sse_content_type(&content_type) {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(32);
        let controller = state.controller.clone();
        let mut upstream_stream = upstream_resp.bytes_stream();
        tokio::spawn(async move {
            loop {
                match upstream_stream.next().await {
                    Some(Ok(chunk)) => {
                        controller.on_stream_chunk(flow_id, &chunk);
                        if tx.send(Ok(chunk)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        let _ = tx.send(Err(std::io::Error::new(std::io::ErrorKind::Other, err))).await;
                        break;
                    }
                    None => break,
                }
            }
            controller.on_response(flow_id, status.as_u16(), response_headers, "").await;
        });
        let body_stream = tokio_stream::wrappers::ReceiverStream::new(rx);
        return builder
            .body(Body::from_stream(body_stream))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    let bytes = match upstream_resp.bytes().await {
        Ok(b) => b,
        Err(err) => return (StatusCode::BAD_GATEWAY, err.to_string()).into_response(),
    };
    let body_text = String::from_utf8_lossy(&bytes).into_owned();
    state.controller.on_response(flow_id, status.as_u16(), response_headers, &body_text).await;
    builder.body(Body::from(bytes)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
    )
}
