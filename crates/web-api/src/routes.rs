use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use application::{ApplicationError, HistoryQuery};
use domain::{Attachment, ConversationId, Message, MessageId, NewMessage, UserId};

use crate::{
    auth::bearer_token,
    error::ApiError,
    extract::{JsonBody, PathParam, QueryParams},
    state::AppState,
    ws_connection::WebSocketConnection,
};

#[derive(Debug, Deserialize)]
struct CreateMessagePayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    attachments: Option<Vec<Attachment>>,
}

#[derive(Debug, Deserialize)]
struct ReactionPayload {
    reaction: String,
}

#[derive(Debug, Deserialize)]
struct EditPayload {
    content: String,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/conversations/{conversation_id}/messages",
            get(get_history).post(create_message),
        )
        .route("/conversations/{conversation_id}/ws", get(websocket_upgrade))
        .route("/messages/{message_id}/read", post(mark_read))
        .route("/messages/{message_id}/reaction", put(set_reaction))
        .route(
            "/messages/{message_id}",
            axum::routing::patch(edit_message).delete(delete_message),
        )
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// 用 Bearer token 校验请求方身份
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserId, ApiError> {
    let token = bearer_token(headers).ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
    Ok(state.identity.verify(token).await?)
}

async fn get_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    PathParam(conversation_id): PathParam<Uuid>,
    QueryParams(query): QueryParams<HistoryQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    authenticate(&state, &headers).await?;
    let messages = state
        .history
        .history(ConversationId::from(conversation_id), query)
        .await?;

    Ok(Json(messages))
}

/// 通过 HTTP 发送的消息与实时通道走同一条 持久化+扇出 路径
async fn create_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    PathParam(conversation_id): PathParam<Uuid>,
    JsonBody(payload): JsonBody<CreateMessagePayload>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let sender_id = authenticate(&state, &headers).await?;
    let draft = NewMessage::new(
        ConversationId::from(conversation_id),
        sender_id,
        payload.content.unwrap_or_default(),
        payload.attachments.unwrap_or_default(),
    )
    .map_err(ApplicationError::from)?;

    let report = state.dispatcher.create(draft).await?;
    Ok((StatusCode::CREATED, Json(report.message)))
}

async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    PathParam(message_id): PathParam<Uuid>,
) -> Result<Json<Message>, ApiError> {
    let reader = authenticate(&state, &headers).await?;
    let message = state
        .messages
        .mark_read(MessageId::from(message_id), reader)
        .await?;

    Ok(Json(message))
}

async fn set_reaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    PathParam(message_id): PathParam<Uuid>,
    JsonBody(payload): JsonBody<ReactionPayload>,
) -> Result<Json<Message>, ApiError> {
    let user_id = authenticate(&state, &headers).await?;
    let message = state
        .messages
        .react(MessageId::from(message_id), user_id, payload.reaction)
        .await?;

    Ok(Json(message))
}

async fn edit_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    PathParam(message_id): PathParam<Uuid>,
    JsonBody(payload): JsonBody<EditPayload>,
) -> Result<Json<Message>, ApiError> {
    let editor = authenticate(&state, &headers).await?;
    let message = state
        .messages
        .edit(MessageId::from(message_id), editor, payload.content)
        .await?;

    Ok(Json(message))
}

async fn delete_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    PathParam(message_id): PathParam<Uuid>,
) -> Result<Json<Message>, ApiError> {
    let actor = authenticate(&state, &headers).await?;
    let message = state
        .messages
        .delete(MessageId::from(message_id), actor)
        .await?;

    Ok(Json(message))
}

/// 升级前完成身份校验，失败返回 401，连接不会进入注册表
async fn websocket_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    PathParam(conversation_id): PathParam<Uuid>,
    QueryParams(query): QueryParams<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .as_deref()
        .or_else(|| bearer_token(&headers))
        .ok_or_else(|| ApiError::unauthorized("missing token"))?;

    let user_id = state.identity.verify(token).await.map_err(|err| {
        tracing::warn!(%conversation_id, "WebSocket upgrade rejected: invalid token");
        ApiError::from(err)
    })?;

    let connection = WebSocketConnection::new(state, ConversationId::from(conversation_id), user_id);
    Ok(ws.on_upgrade(move |socket| connection.run(socket)))
}
