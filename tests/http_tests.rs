// End-to-end tests of the HTTP service, driven through the router without a socket.

use std::io::Read;
use std::path::Path;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use mixsort_lib::config::Config;
use mixsort_lib::server::{build_router, AppState};

const BOUNDARY: &str = "mixsort-test-boundary";

fn test_app(work: &Path) -> Router {
    let mut config = Config::default();
    config.storage.scratch_root = work.join("scratch");
    config.storage.export_dir = work.join("exports");
    std::fs::create_dir_all(&config.storage.scratch_root).unwrap();
    build_router(AppState::in_memory(config))
}

/// Mono 16-bit WAV with a decaying tone burst every `60 / bpm` seconds.
fn pulse_wav(freq: f32, bpm: f32, seconds: f32) -> Vec<u8> {
    let rate = 22050u32;
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let period = (rate as f32 * 60.0 / bpm) as usize;
        let n = (rate as f32 * seconds) as usize;
        for i in 0..n {
            let t = i as f32 / rate as f32;
            let since_beat = (i % period) as f32 / rate as f32;
            let env = (-since_beat * 12.0).exp();
            let s = (2.0 * std::f32::consts::PI * freq * t).sin() * env * 0.8;
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn multipart_body(files: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, name, data) in files {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, name
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, request).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn upload(uri: &str, files: &[(&str, &str, &[u8])]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(files)))
        .unwrap()
}

async fn new_session(app: &Router) -> String {
    let (status, json) = send_json(app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    json["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_full_session_flow() {
    let work = TempDir::new().unwrap();
    let app = test_app(work.path());
    let id = new_session(&app).await;

    let slow = pulse_wav(220.0, 100.0, 4.0);
    let fast = pulse_wav(330.0, 128.0, 4.0);
    let (status, json) = send_json(
        &app,
        upload(
            &format!("/upload/{}", id),
            &[
                ("folder", "Set/Slow Groove.wav", slow.as_slice()),
                ("folder", "Set/notes.txt", &b"not audio"[..]),
                ("folder", "Set/._Slow Groove.wav", &b"resource fork"[..]),
                ("folder", "Set/Fast [Edit].wav", fast.as_slice()),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert_eq!(json["message"], "Uploaded 2 valid audio files");
    assert_eq!(
        json["tracks"],
        serde_json::json!(["Slow Groove.wav", "Fast [Edit].wav"])
    );

    // Export before analysis is refused
    let (status, json) = send_json(&app, post(&format!("/export/{}", id))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Analyze tracks first");

    let (status, json) = send_json(&app, get(&format!("/analyze/{}", id))).await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["file"], "Slow Groove.wav");
    assert_eq!(results[1]["file"], "Fast [Edit].wav");
    for result in results {
        assert_eq!(result["status"], "success", "{}", result);
        assert!(result["bpm"].as_f64().unwrap() >= 0.0);
        assert!(result["energy"].as_f64().unwrap() > 0.0);
        assert!(result["key"].is_string());
    }

    let (status, json) = send_json(&app, post(&format!("/export/{}", id))).await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert_eq!(json["message"], "Playlist exported as ZIP");
    let zip_file = json["zip_file"].as_str().unwrap().to_string();
    assert!(zip_file.starts_with("SortedPlaylist_"));

    let response = app
        .clone()
        .oneshot(get(&format!("/download/{}", zip_file)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/zip"
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
    let mut names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec!["01.Slow_Groove.wav", "02.Fast_Edit.wav", "playlist_explanation.txt"]
    );
    let mut text = String::new();
    archive
        .by_name("playlist_explanation.txt")
        .unwrap()
        .read_to_string(&mut text)
        .unwrap();
    assert!(text.starts_with("Playlist starts with track: Slow Groove.wav\n"));
    assert!(text.contains("Fast [Edit].wav selected after Slow Groove.wav (BPM diff: "));

    // Bundles are one-shot
    let (status, json) = send_json(&app, get(&format!("/download/{}", zip_file))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "ZIP file not found");

    let (status, json) = send_json(&app, post(&format!("/cleanup/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Session cleaned up");

    let (status, json) = send_json(&app, get(&format!("/analyze/{}", id))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Invalid session");
}

/// Upload, analyze and export one two-track session; returns the bundle name.
async fn export_session(app: &Router, low: f32, high: f32) -> String {
    let id = new_session(app).await;
    let a = pulse_wav(low, 110.0, 2.0);
    let b = pulse_wav(high, 120.0, 2.0);
    let (status, json) = send_json(
        app,
        upload(
            &format!("/upload/{}", id),
            &[("folder", "a.wav", a.as_slice()), ("folder", "b.wav", b.as_slice())],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    let (status, json) = send_json(app, get(&format!("/analyze/{}", id))).await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    let (status, json) = send_json(app, post(&format!("/export/{}", id))).await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    json["zip_file"].as_str().unwrap().to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sessions_export_concurrently() {
    let work = TempDir::new().unwrap();
    let app = test_app(work.path());

    let (first, second) = tokio::join!(
        export_session(&app, 220.0, 330.0),
        export_session(&app, 262.0, 392.0)
    );
    assert_ne!(first, second);
    for bundle in [first, second] {
        let (status, bytes) = send(&app, get(&format!("/download/{}", bundle))).await;
        assert_eq!(status, StatusCode::OK);
        let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 3);
    }
}

#[tokio::test]
async fn test_unknown_session_is_rejected() {
    let work = TempDir::new().unwrap();
    let app = test_app(work.path());

    let (status, json) = send_json(&app, get("/analyze/does-not-exist")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Invalid session");

    let (status, json) = send_json(&app, post("/export/does-not-exist")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Invalid session");
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let work = TempDir::new().unwrap();
    let app = test_app(work.path());
    let id = new_session(&app).await;

    for _ in 0..2 {
        let (status, json) = send_json(&app, post(&format!("/cleanup/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Session cleaned up");
    }
}

#[tokio::test]
async fn test_upload_without_supported_files() {
    let work = TempDir::new().unwrap();
    let app = test_app(work.path());
    let id = new_session(&app).await;

    let (status, json) = send_json(
        &app,
        upload(
            &format!("/upload/{}", id),
            &[("folder", "cover.jpg", &b"jpeg"[..]), ("folder", "._a.mp3", &b"fork"[..])],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        json["error"],
        "No supported audio files (.mp3, .wav, .flac, .aiff) found"
    );

    let (status, json) = send_json(
        &app,
        upload(&format!("/upload/{}", id), &[("other", "a.mp3", &b"x"[..])]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "No folder uploaded");

    let (status, json) = send_json(&app, get(&format!("/analyze/{}", id))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "No tracks uploaded");
}

#[tokio::test]
async fn test_reupload_replaces_batch() {
    let work = TempDir::new().unwrap();
    let app = test_app(work.path());
    let id = new_session(&app).await;

    let (status, _) = send_json(
        &app,
        upload(&format!("/upload/{}", id), &[("folder", "a.mp3", &b"one"[..])]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send_json(
        &app,
        upload(&format!("/upload/{}", id), &[("folder", "b.flac", &b"two"[..])]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["tracks"], serde_json::json!(["b.flac"]));

    // Undecodable content is reported per track, not as a request failure
    let (status, json) = send_json(&app, get(&format!("/analyze/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["results"][0]["file"], "b.flac");
    assert_eq!(json["results"][0]["status"], "error");
    assert!(json["results"][0]["message"]
        .as_str()
        .unwrap()
        .starts_with("Failed to process b.flac"));
}

#[tokio::test]
async fn test_download_rejects_unsafe_names() {
    let work = TempDir::new().unwrap();
    let app = test_app(work.path());

    let (status, _) = send(&app, get("/download/secret.zip")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, get("/download/..%2FSortedPlaylist_x.zip")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
