//! HTTP routes over [`ApiView`]
//!
//! Every resource is reachable under
//! `/{version}/{namespace}/{resource}/<operation>`:
//!
//! - `GET  .../get/{pk}` - one row by primary key
//! - `GET  .../filter?top=&bottom=&<filters>` - one page of rows
//! - `POST .../create` - JSON body as form data
//! - `POST .../update?<filters>` - JSON body as form data
//! - `POST .../delete?<filters>` - soft delete
//! - `GET  .../form-info?<filters>` - form metadata

use crate::core::auth::{AuthProvider, RequestContext};
use crate::core::error::SileoError;
use crate::core::method::MethodCall;
use crate::core::response::Envelope;
use crate::server::view::{ApiCall, ApiView, ListQuery, filter_args_from_query};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// State shared by the API handlers
#[derive(Clone)]
pub struct ApiState {
    pub view: Arc<ApiView>,
    pub auth: Arc<dyn AuthProvider>,
}

type QueryPairs = Vec<(String, String)>;

/// Build the resource routes
pub fn build_api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/{version}/{namespace}/{resource}/get/{pk}", get(get_pk))
        .route("/{version}/{namespace}/{resource}/filter", get(filter))
        .route("/{version}/{namespace}/{resource}/create", post(create))
        .route("/{version}/{namespace}/{resource}/update", post(update))
        .route("/{version}/{namespace}/{resource}/delete", post(delete))
        .route("/{version}/{namespace}/{resource}/form-info", get(form_info))
        .with_state(state)
}

/// Build health check routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "sileo"
    }))
}

async fn run(
    state: &ApiState,
    headers: &HeaderMap,
    (version, namespace, resource): (String, String, String),
    call: MethodCall,
    data: Map<String, Value>,
) -> Result<Envelope, SileoError> {
    let auth = state.auth.extract_context(headers).await;
    let context = RequestContext::new(auth).with_data(data);
    let api_call = ApiCall::new(namespace, resource, call).with_version(version);
    state.view.handle(api_call, context).await
}

async fn get_pk(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((version, namespace, resource, pk)): Path<(String, String, String, i64)>,
) -> Result<Envelope, SileoError> {
    let call = MethodCall::GetPk { pk };
    run(&state, &headers, (version, namespace, resource), call, Map::new()).await
}

async fn filter(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(address): Path<(String, String, String)>,
    Query(pairs): Query<QueryPairs>,
) -> Result<Envelope, SileoError> {
    let call = ListQuery::from_query(pairs).into_call();
    run(&state, &headers, address, call, Map::new()).await
}

async fn create(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(address): Path<(String, String, String)>,
    Json(data): Json<Map<String, Value>>,
) -> Result<Envelope, SileoError> {
    run(&state, &headers, address, MethodCall::Create, data).await
}

async fn update(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(address): Path<(String, String, String)>,
    Query(pairs): Query<QueryPairs>,
    Json(data): Json<Map<String, Value>>,
) -> Result<Envelope, SileoError> {
    let call = MethodCall::Update {
        filter_args: filter_args_from_query(pairs),
    };
    run(&state, &headers, address, call, data).await
}

async fn delete(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(address): Path<(String, String, String)>,
    Query(pairs): Query<QueryPairs>,
) -> Result<Envelope, SileoError> {
    let call = MethodCall::Delete {
        filter_args: filter_args_from_query(pairs),
    };
    run(&state, &headers, address, call, Map::new()).await
}

async fn form_info(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(address): Path<(String, String, String)>,
    Query(pairs): Query<QueryPairs>,
) -> Result<Envelope, SileoError> {
    let call = MethodCall::FormDict {
        filter_args: filter_args_from_query(pairs),
    };
    run(&state, &headers, address, call, Map::new()).await
}
