use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::Response;
use axum::Json;
use chrono::Local;
use futures::StreamExt;
use serde::Serialize;

use crate::camera::still::save_still;
use crate::error::ToolError;
use crate::models::{SessionState, ToolKind};
use crate::stream::{multipart_part, BOUNDARY};
use crate::supervisor::{SlotSnapshot, StartOutcome, StopOutcome};
use crate::AppState;

use super::error::ApiError;

#[derive(Debug, Serialize)]
pub struct ToolReply {
    pub status: &'static str,
    pub message: String,
}

impl ToolReply {
    pub fn new(status: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StateReply {
    pub kind: ToolKind,
    pub state: SessionState,
    pub running: bool,
    /// Tool-specific live value: the zoom factor for zoom-control.
    pub value: Option<f32>,
}

fn parse_kind(raw: &str) -> Result<ToolKind, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::UnknownTool(raw.to_string()))
}

pub async fn start_tool(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<ToolReply>, ApiError> {
    let kind = parse_kind(&kind)?;
    let reply = match state.start_tool(kind).await {
        Ok(StartOutcome::Started) => ToolReply::new("started", format!("{kind} started")),
        Ok(StartOutcome::AlreadyRunning) => {
            ToolReply::new("already_running", format!("{kind} is already running"))
        }
        // Busy camera is not an error for the caller.
        Err(err @ ToolError::ResourceBusy { .. }) => {
            ToolReply::new("already_running", err.to_string())
        }
        Err(err) => return Err(err.into()),
    };
    Ok(Json(reply))
}

pub async fn stop_tool(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<ToolReply>, ApiError> {
    let kind = parse_kind(&kind)?;
    let reply = match state.stop_tool(kind).await {
        StopOutcome::Stopped => ToolReply::new("stopped", format!("{kind} stopped")),
        StopOutcome::ForceKilled => ToolReply::new(
            "stopped",
            format!("{kind} worker ignored the stop signal and was killed"),
        ),
        StopOutcome::NotRunning => {
            ToolReply::new("not_running", format!("{kind} is not running"))
        }
    };
    Ok(Json(reply))
}

/// `multipart/x-mixed-replace` stream of the running session's frames. The
/// body ends when the session stops.
pub async fn stream_tool(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Response, ApiError> {
    let kind = parse_kind(&kind)?;
    if state.is_external(kind) {
        return Err(ApiError::External(kind));
    }
    let Some(frames) = state.registry.frames(kind).await else {
        return Err(ApiError::NotRunning(kind));
    };

    let parts = frames
        .frames()
        .map(|frame| Ok::<_, Infallible>(multipart_part(&frame)));

    Response::builder()
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        )
        .header(header::CACHE_CONTROL, "no-cache, no-store")
        .body(Body::from_stream(parts))
        .map_err(|err| ApiError::Internal(err.into()))
}

pub async fn tool_state(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<StateReply>, ApiError> {
    let kind = parse_kind(&kind)?;
    let value = (kind == ToolKind::ZoomControl).then(|| state.zoom_scale.get());
    Ok(Json(StateReply {
        kind,
        state: state.registry.state(kind).await,
        running: state.is_running(kind).await,
        value,
    }))
}

/// Saves the newest streamed frame of a running in-process session.
pub async fn capture_frame(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<ToolReply>, ApiError> {
    let kind = parse_kind(&kind)?;
    if state.is_external(kind) {
        return Err(ApiError::External(kind));
    }
    let frame = state
        .registry
        .frames(kind)
        .await
        .and_then(|frames| frames.latest())
        .ok_or(ApiError::NotRunning(kind))?;

    let dir = state.settings.capture_dir.clone();
    let path = tokio::task::spawn_blocking(move || save_still(&dir, &frame.jpeg, Local::now()))
        .await
        .map_err(|err| ApiError::Internal(err.into()))??;
    Ok(Json(ToolReply::new("saved", path.display().to_string())))
}

pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Vec<SlotSnapshot>> {
    Json(state.snapshot().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{LaunchMode, Settings};
    use crate::supervisor::PlatformController;
    use crate::testing::{RecordingEffects, ScriptedBackend, ScriptedVision};
    use crate::Collaborators;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::time::Duration;

    fn app(configure: impl FnOnce(&mut Settings)) -> Arc<AppState> {
        let mut settings = Settings::default();
        settings.camera.width = 32;
        settings.camera.height = 24;
        settings.camera.open_retry_delay_ms = 5;
        settings.stop_timeout_ms = 1000;
        for kind in ToolKind::ALL {
            settings.tools.insert(kind, LaunchMode::InProcess);
        }
        configure(&mut settings);

        let recorder = RecordingEffects::default();
        AppState::new(
            settings,
            Collaborators {
                backend: Arc::new(ScriptedBackend::default()),
                vision: Arc::new(ScriptedVision::none()),
                effects: recorder.effects(),
                controller: Arc::new(PlatformController),
            },
        )
    }

    async fn start(state: &Arc<AppState>, kind: &str) -> ToolReply {
        let Json(reply) = start_tool(State(Arc::clone(state)), Path(kind.into()))
            .await
            .unwrap();
        reply
    }

    async fn stop(state: &Arc<AppState>, kind: &str) -> ToolReply {
        let Json(reply) = stop_tool(State(Arc::clone(state)), Path(kind.into()))
            .await
            .unwrap();
        reply
    }

    async fn first_frame(state: &Arc<AppState>, kind: ToolKind) {
        for _ in 0..200 {
            let latest = state.registry.frames(kind).await.and_then(|f| f.latest());
            if latest.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{kind} never published a frame");
    }

    #[tokio::test]
    async fn start_and_stop_report_status() {
        let state = app(|_| {});

        assert_eq!(start(&state, "face-overlay").await.status, "started");
        assert_eq!(start(&state, "face-overlay").await.status, "already_running");
        assert_eq!(stop(&state, "face-overlay").await.status, "stopped");
        assert_eq!(stop(&state, "face-overlay").await.status, "not_running");
    }

    #[tokio::test]
    async fn busy_camera_names_the_holder() {
        let state = app(|_| {});
        assert_eq!(start(&state, "face-overlay").await.status, "started");

        let reply = start(&state, "volume-control").await;
        assert_eq!(reply.status, "already_running");
        assert!(reply.message.contains("face-overlay"), "{}", reply.message);

        stop(&state, "face-overlay").await;
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let state = app(|_| {});
        let err = start_tool(State(state), Path("laser-pointer".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UnknownTool(_)));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stream_serves_multipart_until_stopped() {
        let state = app(|_| {});
        start(&state, "face-overlay").await;
        first_frame(&state, ToolKind::FaceOverlay).await;

        let response = stream_tool(State(Arc::clone(&state)), Path("face-overlay".into()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );

        let mut body = response.into_body().into_data_stream();
        let part = body.next().await.unwrap().unwrap();
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n"));

        stop(&state, "face-overlay").await;
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(chunk) = body.next().await {
                chunk.unwrap();
            }
        })
        .await;
        assert!(drained.is_ok(), "stream kept going after stop");
    }

    #[tokio::test]
    async fn stream_of_idle_tool_is_not_running() {
        let state = app(|_| {});
        let err = stream_tool(State(state), Path("face-overlay".into()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stream_of_external_tool_conflicts() {
        let state = app(|settings| {
            settings.tools.insert(
                ToolKind::GestureNav,
                LaunchMode::External {
                    program: Some("true".into()),
                    args: Vec::new(),
                },
            );
        });
        let err = stream_tool(State(state), Path("gesture-nav".into()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn state_reports_zoom_value_only_for_zoom() {
        let state = app(|_| {});

        let Json(zoom) = tool_state(State(Arc::clone(&state)), Path("zoom-control".into()))
            .await
            .unwrap();
        assert_eq!(zoom.state, SessionState::Idle);
        assert!(!zoom.running);
        assert_eq!(zoom.value, Some(1.0));

        let Json(face) = tool_state(State(state), Path("face-overlay".into()))
            .await
            .unwrap();
        assert_eq!(face.value, None);
    }

    #[tokio::test]
    async fn capture_saves_latest_frame() {
        let dir = tempfile::tempdir().unwrap();
        let capture_dir = dir.path().to_path_buf();
        let state = app(move |settings| settings.capture_dir = capture_dir);

        let err = capture_frame(State(Arc::clone(&state)), Path("face-overlay".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotRunning(ToolKind::FaceOverlay)));

        start(&state, "face-overlay").await;
        first_frame(&state, ToolKind::FaceOverlay).await;
        let Json(reply) = capture_frame(State(Arc::clone(&state)), Path("face-overlay".into()))
            .await
            .unwrap();
        assert_eq!(reply.status, "saved");
        assert!(std::path::Path::new(&reply.message).exists());

        stop(&state, "face-overlay").await;
    }

    #[tokio::test]
    async fn list_covers_every_tool() {
        let state = app(|_| {});
        let Json(slots) = list_tools(State(state)).await;
        assert_eq!(slots.len(), ToolKind::ALL.len());
    }
}
