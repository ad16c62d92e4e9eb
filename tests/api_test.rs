//! API integration tests.
//!
//! Tests HTTP API endpoints against a [`TestHarness`] server running on a
//! random port with a fake engine.

mod common;

use cf_core::config::Config;
use common::{file_part, FakeBehavior, TestHarness};
use reqwest::multipart::Form;

// ---------------------------------------------------------------------------
// Health and tools
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_200() {
    let (_harness, addr) = TestHarness::with_server().await;

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key("x-request-id"));
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn request_id_is_propagated() {
    let (_harness, addr) = TestHarness::with_server().await;

    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/health"))
        .header("x-request-id", "trace-me")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "trace-me");
}

#[tokio::test]
async fn tools_lists_known_tools() {
    let (_harness, addr) = TestHarness::with_server().await;

    let resp = reqwest::get(format!("http://{addr}/api/tools")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    let names: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["ffmpeg", "ffprobe"]);
}

// ---------------------------------------------------------------------------
// Processing routes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_text_then_download() {
    let (harness, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let form = Form::new()
        .part("video", file_part("clip.mov", b"raw"))
        .text("text", "it's: ok")
        .text("position", "center");
    let resp = client
        .post(format!("http://{addr}/api/video/add-text"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let json: serde_json::Value = resp.json().await.unwrap();
    let filename = json["filename"].as_str().unwrap().to_string();
    assert!(filename.starts_with("text_"));
    assert_eq!(json["fileSize"], 10);
    assert_eq!(json["message"], "Text added to video successfully");
    assert_eq!(harness.runner.calls(), vec!["text"]);
    assert_eq!(harness.scratch_files(), vec![filename.clone()]);

    let download = client
        .get(format!("http://{addr}{}", json["downloadUrl"].as_str().unwrap()))
        .send()
        .await
        .unwrap();
    assert_eq!(download.status(), 200);
    assert_eq!(download.headers()["content-type"], "video/mp4");
    assert_eq!(download.bytes().await.unwrap().as_ref(), b"fake video");
}

#[tokio::test]
async fn add_image_uses_both_files() {
    let (harness, addr) = TestHarness::with_server().await;

    let form = Form::new()
        .part("video", file_part("clip.mp4", b"raw"))
        .part("image", file_part("logo.png", b"png"))
        .text("position", "bottom-right");
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/video/add-image"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(harness.runner.calls(), vec!["overlay"]);
    assert_eq!(harness.scratch_files().len(), 1);
}

#[tokio::test]
async fn merge_runs_normalizations_then_concat() {
    let (harness, addr) = TestHarness::with_server().await;

    let form = Form::new()
        .part("videos", file_part("a.mp4", b"a"))
        .part("videos", file_part("b.mp4", b"b"));
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/video/merge"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let json: serde_json::Value = resp.json().await.unwrap();
    assert!(json["filename"].as_str().unwrap().starts_with("merged_"));
    assert_eq!(
        harness.runner.calls(),
        vec!["normalize[0]", "normalize[1]", "concat"]
    );
    assert_eq!(harness.scratch_files().len(), 1);
}

#[tokio::test]
async fn merge_with_one_clip_is_rejected() {
    let (harness, addr) = TestHarness::with_server().await;

    let form = Form::new().part("videos", file_part("a.mp4", b"a"));
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/video/merge"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "validation_error");
    assert!(json["request_id"].is_string());
    assert!(harness.runner.calls().is_empty());
    assert!(harness.scratch_files().is_empty());
}

#[tokio::test]
async fn speed_out_of_range_is_rejected() {
    let (harness, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    for speed in ["0", "4.5", "-1", "fast"] {
        let form = Form::new()
            .part("video", file_part("clip.mp4", b"raw"))
            .text("speed", speed);
        let resp = client
            .post(format!("http://{addr}/api/video/change-speed"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "speed {speed}");
    }
    assert!(harness.runner.calls().is_empty());
    assert!(harness.scratch_files().is_empty());
}

#[tokio::test]
async fn missing_video_field_is_rejected() {
    let (_harness, addr) = TestHarness::with_server().await;

    let form = Form::new().text("speed", "2");
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/video/change-speed"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn stage_failure_is_502_without_paths() {
    let (harness, addr) =
        TestHarness::with_server_config(Config::default(), FakeBehavior::Fail).await;

    let form = Form::new()
        .part("video", file_part("clip.mp4", b"raw"))
        .text("speed", "2");
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/video/change-speed"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);

    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "stage_failed");
    let message = json["error"].as_str().unwrap();
    let root = harness.ctx.pipeline.scratch().root().to_string_lossy().to_string();
    assert!(!message.contains(&root), "{message}");
    assert!(message.contains("<scratch>"));
    assert!(harness.scratch_files().is_empty());
}

#[tokio::test]
async fn stage_timeout_is_504() {
    let (harness, addr) =
        TestHarness::with_server_config(Config::default(), FakeBehavior::TimeOut).await;

    let form = Form::new()
        .part("videos", file_part("a.mp4", b"a"))
        .part("videos", file_part("b.mp4", b"b"));
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/video/merge"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 504);
    assert_eq!(harness.runner.calls(), vec!["normalize[0]"]);
    assert!(harness.scratch_files().is_empty());
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

#[tokio::test]
async fn download_rejects_traversal() {
    let (_harness, addr) = TestHarness::with_server().await;

    let resp = reqwest::get(format!("http://{addr}/api/video/download/..%2Fsecret.mp4"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn download_unknown_is_404() {
    let (_harness, addr) = TestHarness::with_server().await;

    let resp = reqwest::get(format!("http://{addr}/api/video/download/merged_nope.mp4"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "not_found");
}

// ---------------------------------------------------------------------------
// Admission control
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limit_rejects_after_burst() {
    let mut config = Config::default();
    config.rate_limit.capacity = 2;
    config.rate_limit.refill_tokens = 1;
    config.rate_limit.refill_interval_secs = 3600;
    let (harness, addr) = TestHarness::with_server_config(config, FakeBehavior::Succeed).await;
    let client = reqwest::Client::new();

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let form = Form::new()
            .part("video", file_part("clip.mp4", b"raw"))
            .text("speed", "2");
        let resp = client
            .post(format!("http://{addr}/api/video/change-speed"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        statuses.push(resp.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 429]);
    assert_eq!(harness.runner.calls().len(), 2);

    // A client-chosen header does not buy a fresh bucket.
    for i in 0..3 {
        let form = Form::new()
            .part("video", file_part("clip.mp4", b"raw"))
            .text("speed", "2");
        let resp = client
            .post(format!("http://{addr}/api/video/change-speed"))
            .header("x-api-key", format!("client-{i}"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 429);
    }
    assert_eq!(harness.runner.calls().len(), 2);

    // Non-processing routes are never gated.
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn rate_limit_disabled_admits_everything() {
    let mut config = Config::default();
    config.rate_limit.enabled = false;
    config.rate_limit.capacity = 1;
    let (_harness, addr) = TestHarness::with_server_config(config, FakeBehavior::Succeed).await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let form = Form::new()
            .part("video", file_part("clip.mp4", b"raw"))
            .text("speed", "2");
        let resp = client
            .post(format!("http://{addr}/api/video/change-speed"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }
}
