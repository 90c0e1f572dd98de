use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    content::{GeneratedContent, SeedInput},
    history::{HistoryRecord, PersistOutcome, SubstrateError},
    library::{self, SavedPost},
    state::AppContext,
};

#[derive(Clone)]
pub struct ServerState {
    ctx: AppContext,
}

impl ServerState {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    fn ctx(&self) -> &AppContext {
        &self.ctx
    }
}

pub async fn serve(state: ServerState) -> anyhow::Result<()> {
    let addr: SocketAddr = state.ctx().config().server.addr().parse()?;
    let listener = TcpListener::bind(addr).await?;
    serve_with_listener(listener, state).await
}

pub async fn serve_with_listener(listener: TcpListener, state: ServerState) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let identity = state.ctx().generator().identity();
    info!(%addr, provider = identity.provider, "server listening");

    let app = router(state.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.ctx().clone()))
        .await?;

    Ok(())
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/generate", post(generate))
        .route("/api/generate/image", post(regenerate_image))
        .route("/api/history", get(list_history))
        .route(
            "/api/history/:id",
            get(history_entry).delete(delete_history_entry),
        )
        .route("/api/saved", get(list_saved_posts).post(save_post))
        .route("/api/saved/:id", axum::routing::delete(delete_saved_post))
        .route("/api/draft", get(load_draft).put(save_draft))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal(ctx: AppContext) {
    ctx.shutdown_notifier().notified().await;
}

async fn health() -> &'static str {
    "ok"
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn storage_error_status(err: &anyhow::Error) -> StatusCode {
    let capacity = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<SubstrateError>())
        .is_some_and(SubstrateError::is_capacity);
    if capacity {
        StatusCode::INSUFFICIENT_STORAGE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GenerateResponse {
    record: HistoryRecord,
    storage: Option<PersistOutcome>,
}

async fn generate(State(state): State<ServerState>, Json(input): Json<SeedInput>) -> Response {
    let missing = input.missing_fields();
    if !missing.is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "missing required fields", "fields": missing })),
        )
            .into_response();
    }

    let generator = state.ctx().generator();
    let output = match generator.generate_post(&input).await {
        Ok(output) => output,
        Err(err) => {
            let identity = generator.identity();
            warn!(
                error = ?err,
                provider = identity.provider,
                model = identity.model.as_deref().unwrap_or("-"),
                "content generation failed"
            );
            return error_response(
                StatusCode::BAD_GATEWAY,
                "content generation failed; check the API key or try again later",
            );
        }
    };

    let history = state.ctx().history();
    let (record, storage) = {
        let mut store = history.lock();
        let record = store.append(input, output);
        (record, store.last_persist())
    };

    Json(GenerateResponse { record, storage }).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegenerateImageRequest {
    image_prompt: String,
}

async fn regenerate_image(
    State(state): State<ServerState>,
    Json(payload): Json<RegenerateImageRequest>,
) -> Response {
    if payload.image_prompt.trim().is_empty() {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, "imagePrompt is required");
    }

    match state
        .ctx()
        .generator()
        .regenerate_image(&payload.image_prompt)
        .await
    {
        Ok(Some(image)) => Json(json!({ "imageBase64": image })).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            warn!(error = ?err, "image regeneration failed");
            error_response(StatusCode::BAD_GATEWAY, "image generation failed")
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryResponse {
    entries: Vec<HistoryRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    storage: Option<PersistOutcome>,
}

async fn list_history(State(state): State<ServerState>) -> Json<HistoryResponse> {
    let history = state.ctx().history();
    let entries = history.lock().records().to_vec();
    Json(HistoryResponse {
        entries,
        storage: None,
    })
}

async fn history_entry(State(state): State<ServerState>, Path(id): Path<String>) -> Response {
    let history = state.ctx().history();
    let entry = history.lock().get(&id).cloned();
    match entry {
        Some(record) => Json(record).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn delete_history_entry(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Json<HistoryResponse> {
    let history = state.ctx().history();
    let mut store = history.lock();
    let entries = store.remove(&id).to_vec();
    Json(HistoryResponse {
        entries,
        storage: store.last_persist(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedPostsResponse {
    posts: Vec<SavedPost>,
}

async fn list_saved_posts(State(state): State<ServerState>) -> Json<SavedPostsResponse> {
    let saved = state.ctx().saved_posts();
    let posts = saved.lock().list().to_vec();
    Json(SavedPostsResponse { posts })
}

async fn save_post(
    State(state): State<ServerState>,
    Json(content): Json<GeneratedContent>,
) -> Response {
    let saved = state.ctx().saved_posts();
    let result = saved.lock().save(content);
    match result {
        Ok(post) => (StatusCode::CREATED, Json(post)).into_response(),
        Err(err) => {
            warn!(error = ?err, "failed to save post");
            let status = storage_error_status(&err);
            error_response(status, "could not save post; storage may be full")
        }
    }
}

async fn delete_saved_post(State(state): State<ServerState>, Path(id): Path<String>) -> Response {
    let saved = state.ctx().saved_posts();
    let result = saved.lock().remove(&id);
    match result {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            warn!(error = ?err, id = %id, "failed to delete saved post");
            error_response(storage_error_status(&err), "could not delete saved post")
        }
    }
}

async fn load_draft(State(state): State<ServerState>) -> Response {
    let config = state.ctx().config();
    let substrate = state.ctx().substrate();
    match library::load_draft(substrate.as_ref(), &config.history.draft_key) {
        Some(draft) => Json(draft).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn save_draft(State(state): State<ServerState>, Json(draft): Json<SeedInput>) -> Response {
    let config = state.ctx().config();
    let substrate = state.ctx().substrate();
    match library::save_draft(substrate.as_ref(), &config.history.draft_key, &draft) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            warn!(error = ?err, "failed to autosave draft");
            error_response(storage_error_status(&err), "could not save draft")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{AppConfig, GeneratorProviderConfig, HistoryConfig, ServerConfig},
        generator::{ContentGenerator, GeneratorIdentity, LocalStubGenerator, STUB_IMAGE_BASE64},
        history::{KvSubstrate, MAX_RECORDS, MemorySubstrate, PersistFailure},
    };
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use std::{path::PathBuf, sync::Arc};
    use tower::ServiceExt;

    struct FailingGenerator;

    #[async_trait]
    impl ContentGenerator for FailingGenerator {
        async fn generate_post(&self, _input: &SeedInput) -> anyhow::Result<GeneratedContent> {
            anyhow::bail!("upstream unavailable")
        }

        async fn regenerate_image(&self, _image_prompt: &str) -> anyhow::Result<Option<String>> {
            anyhow::bail!("upstream unavailable")
        }

        fn identity(&self) -> GeneratorIdentity {
            GeneratorIdentity::new("failing", None)
        }
    }

    fn test_config() -> AppConfig {
        AppConfig {
            data_dir: PathBuf::from("data"),
            config_dir: PathBuf::from("config"),
            history: HistoryConfig::default(),
            server: ServerConfig {
                bind_addr: "127.0.0.1:0".to_string(),
            },
            generator: GeneratorProviderConfig::LocalStub,
        }
    }

    fn app_with(generator: Arc<dyn ContentGenerator>, substrate: MemorySubstrate) -> Router {
        let ctx = AppContext::new(test_config(), generator, Arc::new(substrate));
        router(ServerState::new(ctx))
    }

    fn seed_body(name: &str) -> Body {
        Body::from(
            serde_json::to_vec(&json!({
                "seedName": name,
                "price": "25k",
                "strongPoints": "Sweet",
                "harvestTime": "60 days",
                "suitableSpace": "Balcony",
                "purchaseLink": "https://shop.example",
            }))
            .unwrap(),
        )
    }

    fn json_request(method: &str, uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap()
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn generate_appends_history_and_reports_storage() {
        let substrate = MemorySubstrate::new();
        let app = app_with(Arc::new(LocalStubGenerator), substrate.clone());

        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/generate", seed_body("Basil")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: GenerateResponse = read_json(response).await;
        assert_eq!(body.record.input.seed_name, "Basil");
        assert_eq!(
            body.record.output.image_base64.as_deref(),
            Some(STUB_IMAGE_BASE64)
        );
        assert_eq!(body.storage, Some(PersistOutcome::persisted()));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/history")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let history: HistoryResponse = read_json(response).await;
        assert_eq!(history.entries.len(), 1);
        assert_eq!(history.entries[0].id, body.record.id);

        let persisted = substrate.get("agri_content_history").unwrap().unwrap();
        assert!(persisted.contains(&body.record.id));
    }

    #[tokio::test]
    async fn generate_rejects_missing_fields() {
        let app = app_with(Arc::new(LocalStubGenerator), MemorySubstrate::new());
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/generate",
                Body::from(r#"{"seedName":"Basil"}"#),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: serde_json::Value = read_json(response).await;
        assert!(
            body["fields"]
                .as_array()
                .unwrap()
                .iter()
                .any(|field| field == "purchaseLink")
        );
    }

    #[tokio::test]
    async fn generator_failure_leaves_history_untouched() {
        let substrate = MemorySubstrate::new();
        let app = app_with(Arc::new(FailingGenerator), substrate.clone());

        let response = app
            .oneshot(json_request("POST", "/api/generate", seed_body("Basil")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(substrate.get("agri_content_history").unwrap().is_none());
    }

    #[tokio::test]
    async fn generate_reports_degraded_storage_when_quota_is_tight() {
        let substrate = MemorySubstrate::with_quota(600);
        let app = app_with(Arc::new(LocalStubGenerator), substrate.clone());

        let mut input = json!({
            "seedName": "Basil",
            "price": "25k",
            "strongPoints": "Sweet",
            "harvestTime": "60 days",
            "suitableSpace": "Balcony",
            "purchaseLink": "https://shop.example",
        });
        input["customImagePrompt"] = json!("x".repeat(400));

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/generate",
                Body::from(serde_json::to_vec(&input).unwrap()),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: GenerateResponse = read_json(response).await;
        assert_eq!(
            body.storage,
            Some(PersistOutcome::failed(true, PersistFailure::CapacityExceeded))
        );
        assert!(body.record.output.image_base64.is_some());
        assert!(substrate.get("agri_content_history").unwrap().is_none());
    }

    #[tokio::test]
    async fn history_keeps_only_newest_records() {
        let app = app_with(Arc::new(LocalStubGenerator), MemorySubstrate::new());

        for idx in 0..MAX_RECORDS + 2 {
            let response = app
                .clone()
                .oneshot(json_request(
                    "POST",
                    "/api/generate",
                    seed_body(&format!("seed-{idx}")),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/history")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let history: HistoryResponse = read_json(response).await;
        assert_eq!(history.entries.len(), MAX_RECORDS);
        assert_eq!(
            history.entries[0].input.seed_name,
            format!("seed-{}", MAX_RECORDS + 1)
        );
        assert_eq!(history.entries[MAX_RECORDS - 1].input.seed_name, "seed-2");
    }

    #[tokio::test]
    async fn history_entry_can_be_fetched_and_deleted() {
        let app = app_with(Arc::new(LocalStubGenerator), MemorySubstrate::new());
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/generate", seed_body("Mint")))
            .await
            .unwrap();
        let created: GenerateResponse = read_json(response).await;
        let uri = format!("/api/history/{}", created.record.id);

        let response = app
            .clone()
            .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let fetched: HistoryRecord = read_json(response).await;
        assert_eq!(fetched, created.record);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("DELETE")
                        .uri(&uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body: HistoryResponse = read_json(response).await;
            assert!(body.entries.is_empty());
            assert_eq!(body.storage, Some(PersistOutcome::persisted()));
        }

        let response = app
            .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn regenerate_image_does_not_touch_history() {
        let substrate = MemorySubstrate::new();
        let app = app_with(Arc::new(LocalStubGenerator), substrate.clone());

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/generate/image",
                Body::from(r#"{"imagePrompt":"Basil on a balcony"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = read_json(response).await;
        assert_eq!(body["imageBase64"], STUB_IMAGE_BASE64);
        assert!(substrate.get("agri_content_history").unwrap().is_none());

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/generate/image",
                Body::from(r#"{"imagePrompt":"  "}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn saved_posts_report_full_storage() {
        let app = app_with(Arc::new(LocalStubGenerator), MemorySubstrate::with_quota(300));

        let small = json!({"postContent": "Short", "imagePrompt": "Prompt"});
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/saved",
                Body::from(serde_json::to_vec(&small).unwrap()),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let saved: SavedPost = read_json(response).await;

        let large = json!({"postContent": "x".repeat(400), "imagePrompt": "Prompt"});
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/saved",
                Body::from(serde_json::to_vec(&large).unwrap()),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INSUFFICIENT_STORAGE);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/saved")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let listed: SavedPostsResponse = read_json(response).await;
        assert_eq!(listed.posts, vec![saved.clone()]);

        let delete = |id: String| {
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/saved/{id}"))
                .body(Body::empty())
                .unwrap()
        };
        let response = app.clone().oneshot(delete(saved.id.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = app.oneshot(delete(saved.id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn draft_roundtrips_through_api() {
        let app = app_with(Arc::new(LocalStubGenerator), MemorySubstrate::new());

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/draft").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/draft",
                Body::from(r#"{"seedName":"Chili","seoKeywords":"ot"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(Request::builder().uri("/api/draft").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let draft: SeedInput = read_json(response).await;
        assert_eq!(draft.seed_name, "Chili");
        assert_eq!(draft.seo_keywords.as_deref(), Some("ot"));
        assert!(draft.price.is_empty());
    }
}
