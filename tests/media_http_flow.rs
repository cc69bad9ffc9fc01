//! End-to-end media job against a mocked lookup API and CDN.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use httpmock::prelude::*;
use oxide_courier::media::{
    media_http_client, DeliveryArtifact, HttpFetcher, HttpResolver, MediaCache, MediaError,
    MediaFormat, MediaPipeline, MediaRequest, MediaSource, OutputChannel, ProgressEvent,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
struct Recorder {
    statuses: Mutex<Vec<String>>,
    files: Mutex<Vec<DeliveryArtifact>>,
}

#[async_trait]
impl OutputChannel for Recorder {
    async fn edit_status(&self, text: &str) -> anyhow::Result<()> {
        if let Ok(mut s) = self.statuses.lock() {
            s.push(text.to_string());
        }
        Ok(())
    }

    async fn delete_status(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_file(
        &self,
        artifact: &DeliveryArtifact,
        _progress: mpsc::Sender<ProgressEvent>,
    ) -> anyhow::Result<()> {
        if let Ok(mut f) = self.files.lock() {
            f.push(artifact.clone());
        }
        Ok(())
    }
}

fn pipeline(server: &MockServer, cache_dir: &std::path::Path, limit: u64) -> Result<MediaPipeline, MediaError> {
    let client = media_http_client()?;
    Ok(MediaPipeline::new(
        MediaCache::new(cache_dir),
        Arc::new(HttpResolver::new(client.clone(), server.url("/download"))),
        Arc::new(HttpFetcher::new(client)),
        limit,
    )
    .with_timings(Duration::from_millis(10), Duration::ZERO))
}

fn request(url: &str) -> MediaRequest {
    MediaRequest {
        requester: 42,
        url: url.to_string(),
        source: MediaSource::Youtube,
        format: MediaFormat::Mp4,
    }
}

#[tokio::test]
async fn test_download_then_cache_hit() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start_async().await;
    let payload = vec![7u8; 3000];
    let lookup = server
        .mock_async(|when, then| {
            when.method(GET).path("/download/youtube/videofhd");
            then.status(200).json_body(json!({
                "success": true,
                "result": {
                    "title": "Clip",
                    "quality": "720p",
                    "download_url": server.url("/files/clip.mp4")
                }
            }));
        })
        .await;
    let file = server
        .mock_async(|when, then| {
            when.method(GET).path("/files/clip.mp4");
            then.status(200).body(payload.clone());
        })
        .await;

    let dir = tempfile::tempdir()?;
    let pipeline = pipeline(&server, dir.path(), 10_000)?;

    let first = Recorder::default();
    let job = pipeline.run(&request("https://youtu.be/x"), &first).await?;
    assert!(!job.from_cache);
    assert_eq!(tokio::fs::read(&job.path).await?, payload);

    let second = Recorder::default();
    let again = pipeline.run(&request("https://youtu.be/x"), &second).await?;
    assert!(again.from_cache);
    assert_eq!(again.path, job.path);

    lookup.assert_hits_async(2).await;
    file.assert_hits_async(1).await;

    let files = second.files.lock().map(|f| f.clone()).unwrap_or_default();
    assert_eq!(files.len(), 1);
    assert!(files[0].caption.contains("720p"));
    assert!(!pipeline.admission().is_active(42));
    Ok(())
}

#[tokio::test]
async fn test_lookup_failure_reports_and_releases() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/download/youtube/videofhd");
            then.status(502);
        })
        .await;

    let dir = tempfile::tempdir()?;
    let pipeline = pipeline(&server, dir.path(), 10_000)?;
    let output = Recorder::default();

    let result = pipeline.run(&request("https://youtu.be/y"), &output).await;
    assert!(matches!(result, Err(MediaError::Resolution(_))));
    let statuses = output.statuses.lock().map(|s| s.clone()).unwrap_or_default();
    assert!(statuses.last().is_some_and(|s| s.starts_with("🚫")));
    assert!(!pipeline.admission().is_active(42));
    Ok(())
}
