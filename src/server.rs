//! HTTP front end: `/health`, `/process`, `/predict` and `/classify`.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::io::Write;
use std::{net::SocketAddr, path::Path, sync::Arc, time::Instant};

use crate::config::ServerConfig;
use crate::error::GenreError;
use crate::model::PredictionService;
use crate::pipeline::{AudioProcessor, PredictionRequest, PredictionResponse, ProcessResponse};

const SERVICE_NAME: &str = "stemgenre";

/// Form field carrying the track in multipart uploads.
const UPLOAD_FIELD: &str = "audio";

/// Accepted upload types and the file extension used to hint the decoder.
const ALLOWED_TYPES: [(&str, &str); 5] = [
    ("audio/wav", "wav"),
    ("audio/wave", "wav"),
    ("audio/x-wav", "wav"),
    ("audio/mpeg", "mp3"),
    ("audio/mp3", "mp3"),
];

/// Request body ceiling. `/predict` bodies carry four full tensors as JSON and are far
/// larger than an audio upload; uploads are bounded separately by `AudioUpload`.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    processor: Arc<AudioProcessor>,
    service: Arc<PredictionService>,
    max_upload_bytes: usize,
}

pub fn router(
    processor: Arc<AudioProcessor>,
    service: Arc<PredictionService>,
    max_upload_bytes: usize,
) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/process", post(process))
        .route("/predict", post(predict))
        .route("/classify", post(classify))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES.max(max_upload_bytes)))
        .with_state(AppState {
            processor,
            service,
            max_upload_bytes,
        })
}

pub async fn run_server(
    cfg: &ServerConfig,
    processor: Arc<AudioProcessor>,
    service: Arc<PredictionService>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    let app = router(processor, service, cfg.max_upload_bytes);

    log::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

struct ApiError(StatusCode, String);

impl From<GenreError> for ApiError {
    fn from(err: GenreError) -> Self {
        let status = match &err {
            GenreError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            GenreError::InvalidInput { .. }
            | GenreError::InvalidShape { .. }
            | GenreError::StemMissing { .. }
            | GenreError::Decode { .. }
            | GenreError::FeatureExtraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log::warn!("Request failed ({}): {}", self.0, self.1);
        (self.0, Json(json!({ "detail": self.1 }))).into_response()
    }
}

async fn health(State(st): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "model_loaded": st.service.is_loaded(),
        "normalization_loaded": st.service.has_statistics(),
    }))
}

async fn process(
    State(st): State<AppState>,
    AudioUpload(upload): AudioUpload,
) -> Result<Json<ProcessResponse>, ApiError> {
    let processor = st.processor.clone();
    let features = blocking(move || processor.process(upload.path())).await?;
    Ok(Json(ProcessResponse::from_features(&features)))
}

async fn predict(
    State(st): State<AppState>,
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError(e.status(), e.body_text()))?;
    if !st.service.is_loaded() {
        return Err(GenreError::ModelUnavailable.into());
    }
    let service = st.service.clone();
    let result = blocking(move || service.predict(request.into_tensors()?)).await?;
    Ok(Json(PredictionResponse::new(&result)))
}

async fn classify(
    State(st): State<AppState>,
    AudioUpload(upload): AudioUpload,
) -> Result<Json<PredictionResponse>, ApiError> {
    let started = Instant::now();
    if !st.service.is_loaded() {
        return Err(GenreError::ModelUnavailable.into());
    }
    let processor = st.processor.clone();
    let service = st.service.clone();
    let result = blocking(move || processor.classify(upload.path(), &service)).await?;

    let elapsed = started.elapsed().as_millis() as u64;
    log::info!("Classified upload in {}ms", elapsed);
    Ok(Json(PredictionResponse::new(&result).with_processing_time(elapsed)))
}

/// Runs CPU-bound pipeline work off the async executor.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, GenreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(ApiError::from)
}

/// An uploaded track, stored in a temp file that is deleted on drop.
///
/// Accepts a `multipart/form-data` body with an `audio` file part, or the raw file as the
/// request body. Type and size checks apply to the file itself, not the envelope.
struct AudioUpload(tempfile::NamedTempFile);

#[axum::async_trait]
impl FromRequest<AppState> for AudioUpload {
    type Rejection = ApiError;

    async fn from_request(req: Request, st: &AppState) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(mime_essence);
        let limit = st.max_upload_bytes;

        if content_type.as_deref() != Some("multipart/form-data") {
            let body = Bytes::from_request(req, st)
                .await
                .map_err(|e| ApiError(e.status(), e.body_text()))?;
            return store_upload(content_type.as_deref(), None, &body, limit).map(AudioUpload);
        }

        let mut multipart = Multipart::from_request(req, st)
            .await
            .map_err(|e| ApiError(e.status(), e.body_text()))?;
        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError(e.status(), e.body_text()))?
        {
            if field.name() != Some(UPLOAD_FIELD) {
                continue;
            }
            let part_type = field.content_type().map(mime_essence);
            let file_name = field.file_name().map(str::to_owned);

            let mut data = Vec::new();
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| ApiError(e.status(), e.body_text()))?
            {
                if data.len() + chunk.len() > limit {
                    return Err(too_large(data.len() + chunk.len(), limit));
                }
                data.extend_from_slice(&chunk);
            }
            return store_upload(part_type.as_deref(), file_name.as_deref(), &data, limit)
                .map(AudioUpload);
        }
        Err(ApiError(StatusCode::BAD_REQUEST, "No audio file provided".into()))
    }
}

fn mime_essence(value: &str) -> String {
    value.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

fn too_large(size: usize, limit: usize) -> ApiError {
    ApiError(
        StatusCode::PAYLOAD_TOO_LARGE,
        format!("Upload of {} bytes exceeds the {} byte limit", size, limit),
    )
}

/// Decoder hint for an accepted upload. Generic part types fall back to the file name.
fn upload_extension(content_type: Option<&str>, file_name: Option<&str>) -> Option<&'static str> {
    let by_type = content_type.and_then(|ct| {
        ALLOWED_TYPES
            .iter()
            .find(|(mime, _)| *mime == ct)
            .map(|(_, ext)| *ext)
    });
    if by_type.is_some() {
        return by_type;
    }
    if !matches!(content_type, None | Some("application/octet-stream")) {
        return None;
    }
    let ext = Path::new(file_name?).extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_TYPES
        .iter()
        .map(|(_, known)| *known)
        .find(|known| *known == ext)
}

/// Validates an upload and writes it to a temp file that is deleted on drop.
fn store_upload(
    content_type: Option<&str>,
    file_name: Option<&str>,
    body: &[u8],
    limit: usize,
) -> Result<tempfile::NamedTempFile, ApiError> {
    if body.is_empty() {
        return Err(ApiError(StatusCode::BAD_REQUEST, "No audio file provided".into()));
    }
    if body.len() > limit {
        return Err(too_large(body.len(), limit));
    }

    let extension = upload_extension(content_type, file_name).ok_or_else(|| {
        ApiError(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Invalid file type. Only WAV and MP3 files are allowed.".into(),
        )
    })?;

    let io_err = |e: std::io::Error| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    let mut file = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&format!(".{}", extension))
        .tempfile()
        .map_err(io_err)?;
    file.write_all(body).map_err(io_err)?;
    file.flush().map_err(io_err)?;
    Ok(file)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::features::{FeatureAssembler, Stem};
    use crate::audio::spectrogram::SpectrogramParams;
    use crate::separate::DirectorySeparator;
    use axum::body::{to_bytes, Body};
    use axum::http;

    const BOUNDARY: &str = "XyZ";

    /// State whose separator serves short tones from `stems`, whatever was uploaded.
    fn state(stems: &Path, max_upload_bytes: usize) -> AppState {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        for (n, stem) in Stem::ALL.iter().enumerate() {
            let mut writer = hound::WavWriter::create(stems.join(format!("{}.wav", stem)), spec).unwrap();
            for i in 0..4096 {
                let v = (i as f32 * 0.02 * (n + 1) as f32).sin();
                writer.write_sample((v * 8000.0) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        let params = SpectrogramParams {
            n_mels: 16,
            target_frames: 24,
            ..SpectrogramParams::default()
        };
        let shape = params.feature_shape();
        AppState {
            processor: Arc::new(AudioProcessor::new(
                Box::new(DirectorySeparator::new(stems)),
                FeatureAssembler::new(params).unwrap(),
            )),
            service: Arc::new(PredictionService::new(None, None, shape)),
            max_upload_bytes,
        }
    }

    fn multipart_request(field: &str, file_name: &str, part_type: Option<&str>, data: &[u8]) -> Request {
        let mut body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"{f}\"; filename=\"{n}\"\r\n",
            b = BOUNDARY,
            f = field,
            n = file_name
        )
        .into_bytes();
        if let Some(part_type) = part_type {
            body.extend_from_slice(format!("Content-Type: {}\r\n", part_type).as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        http::Request::builder()
            .method("POST")
            .uri("/process")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn raw_request(content_type: &str, data: &'static [u8]) -> Request {
        http::Request::builder()
            .method("POST")
            .uri("/process")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(data))
            .unwrap()
    }

    async fn upload(req: Request, st: &AppState) -> Result<AudioUpload, ApiError> {
        AudioUpload::from_request(req, st).await
    }

    async fn detail(response: Response) -> (StatusCode, serde_json::Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn process_accepts_multipart_audio_field() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path(), 1024);
        let req = multipart_request("audio", "song.wav", Some("audio/wav"), b"RIFF....WAVE");

        let Ok(file) = upload(req, &st).await else {
            panic!("multipart upload rejected");
        };
        assert_eq!(file.0.path().extension().unwrap(), "wav");

        let Ok(Json(response)) = process(State(st), file).await else {
            panic!("process failed");
        };
        assert_eq!(response.preprocessed_data.len(), 4);
        assert_eq!(response.preprocessed_data[0].len(), 16);
        assert_eq!(response.preprocessed_data[0][0].len(), 24);
    }

    #[tokio::test]
    async fn multipart_part_type_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path(), 1024);
        let req = multipart_request("audio", "clip.mp4", Some("video/mp4"), b"data");
        let Err(err) = upload(req, &st).await else {
            panic!("video part accepted");
        };
        assert_eq!(err.0, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn multipart_generic_type_falls_back_to_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path(), 1024);
        let req = multipart_request("audio", "Track.MP3", Some("application/octet-stream"), b"ID3");
        let Ok(file) = upload(req, &st).await else {
            panic!("mp3 by file name rejected");
        };
        assert_eq!(file.0.path().extension().unwrap(), "mp3");
    }

    #[tokio::test]
    async fn multipart_size_limit_applies_to_the_part() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path(), 16);
        let req = multipart_request("audio", "song.wav", Some("audio/wav"), &[7u8; 64]);
        let Err(err) = upload(req, &st).await else {
            panic!("oversized part accepted");
        };
        assert_eq!(err.0, StatusCode::PAYLOAD_TOO_LARGE);

        // The envelope adds headers and boundaries; a part just under the limit still passes.
        let req = multipart_request("audio", "song.wav", Some("audio/wav"), &[7u8; 16]);
        assert!(upload(req, &st).await.is_ok());
    }

    #[tokio::test]
    async fn multipart_without_audio_field_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path(), 1024);
        let req = multipart_request("file", "song.wav", Some("audio/wav"), b"RIFF");
        let Err(err) = upload(req, &st).await else {
            panic!("missing field accepted");
        };
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn raw_body_upload_still_works() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path(), 1024);
        let Ok(file) = upload(raw_request("audio/x-wav; charset=binary", b"RIFF"), &st).await else {
            panic!("raw wav rejected");
        };
        let path = file.0.path().to_path_buf();
        assert!(path.exists());
        drop(file);
        assert!(!path.exists());

        let Err(err) = upload(raw_request("video/mp4", b"data"), &st).await else {
            panic!("raw video accepted");
        };
        assert_eq!(err.0, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn malformed_prediction_body_uses_detail_shape() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path(), 1024);
        let req = http::Request::builder()
            .method("POST")
            .uri("/predict")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"data\": [[[0.0]]"))
            .unwrap();
        let payload = <Result<Json<PredictionRequest>, JsonRejection>>::from_request(req, &st)
            .await
            .unwrap();

        let response = predict(State(st), payload).await.into_response();
        let (status, body) = detail(response).await;
        assert!(status.is_client_error());
        assert!(body["detail"].as_str().is_some_and(|d| !d.is_empty()));
    }

    #[test]
    fn upload_rejects_empty_body() {
        let err = store_upload(Some("audio/wav"), None, b"", 1024).err().unwrap();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn error_status_mapping() {
        assert_eq!(ApiError::from(GenreError::ModelUnavailable).0, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ApiError::from(GenreError::InvalidInput { expected: 4, actual: 3 }).0,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(GenreError::Separation("x".into())).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
