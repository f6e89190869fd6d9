//! Web API integration tests
//!
//! Drives the full router (middleware included) with in-process requests and
//! shell scripts standing in for the converter.

use axum::{
    body::{to_bytes, Body, Bytes},
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tower::ServiceExt;
use xml2xlsx_server::{ConverterConfig, Layout, ServerConfig, WebServer};

const BOUNDARY: &str = "xml2xlsx-test-boundary";

enum Part<'a> {
    File {
        name: &'a str,
        filename: &'a str,
        data: &'a [u8],
    },
    Text {
        name: &'a str,
        value: &'a str,
    },
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File {
                name,
                filename,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/xml\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}",
                        name, value
                    )
                    .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let body = multipart_body(parts);
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

fn upload(filename: &str, data: &[u8], custom_name: &str) -> Request<Body> {
    upload_request(
        "/upload/",
        &[
            Part::File {
                name: "file",
                filename,
                data,
            },
            Part::Text {
                name: "custom_name",
                value: custom_name,
            },
        ],
    )
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body)
}

fn as_json(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap()
}

fn shell(script: &str) -> ConverterConfig {
    ConverterConfig::new("sh", ["-c", script]).with_timeout(Duration::from_secs(10))
}

fn router_with(work_dir: &Path, converter: ConverterConfig, layout: Layout) -> Router {
    let config = ServerConfig::default()
        .with_work_dir(work_dir)
        .with_layout(layout)
        .with_converter(converter);
    WebServer::with_config(config).unwrap().router()
}

/// Copies the upload to the expected output
const COPY_CONVERTER: &str = r#"cat "$CONVERT_INPUT" > "$CONVERT_OUTPUT""#;

#[tokio::test]
async fn test_missing_file_returns_404() {
    let dir = tempfile::tempdir().unwrap();
    let router = router_with(dir.path(), ConverterConfig::default(), Layout::Shared);

    let (status, _, body) = send(&router, get("/files/missing.xlsx")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(as_json(&body), json!({"error": "File not found"}));
}

#[tokio::test]
async fn test_existing_file_is_served_as_attachment() {
    let dir = tempfile::tempdir().unwrap();
    let router = router_with(dir.path(), ConverterConfig::default(), Layout::Shared);
    let content = b"PK\x03\x04 not really a zip \x00\xff";
    std::fs::write(dir.path().join("existing.xlsx"), content).unwrap();

    let (status, headers, body) = send(&router, get("/files/existing.xlsx")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), content);
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.contains("attachment"));
    assert!(disposition.contains("existing.xlsx"));
    assert_eq!(
        headers[header::CONTENT_TYPE],
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
    );
}

#[tokio::test]
async fn test_directory_is_not_served() {
    let dir = tempfile::tempdir().unwrap();
    let router = router_with(dir.path(), ConverterConfig::default(), Layout::Shared);
    std::fs::create_dir(dir.path().join("subdir")).unwrap();

    let (status, _, _) = send(&router, get("/files/subdir")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_index_page() {
    let dir = tempfile::tempdir().unwrap();
    let router = router_with(dir.path(), ConverterConfig::default(), Layout::Shared);

    let (status, headers, body) = send(&router, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    assert!(String::from_utf8_lossy(&body).contains("custom_name"));

    let (status, _, body) = send(&router, get("/static/js/main.js")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&body).contains("uploadFile"));

    let (status, _, _) = send(&router, get("/static/js/nope.js")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let router = router_with(
        dir.path(),
        ConverterConfig::new("xml2xlsx-definitely-not-installed", ["{input}"]),
        Layout::Isolated,
    );

    let (status, _, body) = send(&router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let json = as_json(&body);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["layout"], "isolated");
    assert_eq!(json["converter"]["found"], false);
    assert_eq!(
        json["converter"]["program"],
        "xml2xlsx-definitely-not-installed"
    );
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let dir = tempfile::tempdir().unwrap();
    let router = router_with(dir.path(), ConverterConfig::default(), Layout::Shared);

    let (status, _, body) = send(&router, get("/nowhere")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(as_json(&body)["error"].is_string());
}

#[tokio::test]
async fn test_upload_missing_custom_name() {
    let dir = tempfile::tempdir().unwrap();
    let router = router_with(dir.path(), ConverterConfig::default(), Layout::Shared);

    let request = upload_request(
        "/upload/",
        &[Part::File {
            name: "file",
            filename: "orders.xml",
            data: b"<CAEXFile/>",
        }],
    );
    let (status, _, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(as_json(&body)["error"]
        .as_str()
        .unwrap()
        .contains("custom_name"));
}

#[tokio::test]
async fn test_upload_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let router = router_with(dir.path(), ConverterConfig::default(), Layout::Shared);

    let request = upload_request(
        "/upload/",
        &[Part::Text {
            name: "custom_name",
            value: "report",
        }],
    );
    let (status, _, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(as_json(&body), json!({"error": "No file uploaded"}));
}

#[tokio::test]
async fn test_upload_over_limit_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig::default()
        .with_work_dir(dir.path())
        .with_upload_limit(1024);
    let router = WebServer::with_config(config).unwrap().router();

    let data = vec![b'x'; 4096];
    let (status, _, _) = send(&router, upload("big.xml", &data, "big")).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(!dir.path().join("big.xml").exists());
}

#[tokio::test]
async fn test_cors_preflight_through_full_stack() {
    let dir = tempfile::tempdir().unwrap();
    let router = router_with(dir.path(), ConverterConfig::default(), Layout::Shared);

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/upload/")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(&router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[cfg(unix)]
mod with_converter {
    use super::*;

    #[tokio::test]
    async fn test_upload_success_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with(dir.path(), shell(COPY_CONVERTER), Layout::Shared);
        let xml = b"<CAEXFile><InstanceHierarchy Name=\"Plant\"/></CAEXFile>";

        let (status, _, body) = send(&router, upload("orders.xml", xml, "report")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            as_json(&body),
            json!({
                "message": "File processed successfully",
                "output_file": "/files/report.xlsx"
            })
        );

        // Upload stored verbatim under its client filename
        assert_eq!(std::fs::read(dir.path().join("orders.xml")).unwrap(), xml);

        let (status, headers, body) = send(&router, get("/files/report.xlsx")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_ref(), xml);
        assert!(headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("report.xlsx"));
    }

    #[tokio::test]
    async fn test_upload_without_trailing_slash() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with(dir.path(), shell(COPY_CONVERTER), Layout::Shared);

        let request = upload_request(
            "/upload",
            &[
                Part::File {
                    name: "file",
                    filename: "orders.xml",
                    data: b"<x/>",
                },
                Part::Text {
                    name: "custom_name",
                    value: "report",
                },
            ],
        );
        let (status, _, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upload_converter_failure_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with(
            dir.path(),
            shell("printf 'parse error: line 4' >&2; exit 1"),
            Layout::Shared,
        );

        let (status, _, body) = send(&router, upload("orders.xml", b"<bad", "report")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            as_json(&body),
            json!({"error": "Error running Go backend: parse error: line 4"})
        );
        // The input is kept even though conversion failed
        assert!(dir.path().join("orders.xml").is_file());
    }

    #[tokio::test]
    async fn test_upload_converter_failure_without_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with(dir.path(), shell("exit 7"), Layout::Shared);

        let (status, _, body) = send(&router, upload("orders.xml", b"<x/>", "report")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let error = as_json(&body)["error"].as_str().unwrap().to_string();
        assert_eq!(error, "Error running Go backend: converter exited with status 7");
    }

    #[tokio::test]
    async fn test_upload_converter_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with(
            dir.path(),
            ConverterConfig::new("xml2xlsx-definitely-not-installed", ["{input}", "{output}"]),
            Layout::Shared,
        );

        let (status, _, body) = send(&router, upload("orders.xml", b"<x/>", "report")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let error = as_json(&body)["error"].as_str().unwrap().to_string();
        assert!(error.starts_with("Error running Go backend: "));
        assert!(error.contains("xml2xlsx-definitely-not-installed"));
    }

    #[tokio::test]
    async fn test_upload_converter_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with(
            dir.path(),
            ConverterConfig::new("sh", ["-c", "sleep 30"]).with_timeout(Duration::from_secs(1)),
            Layout::Shared,
        );

        let (status, _, body) = tokio::time::timeout(
            Duration::from_secs(15),
            send(&router, upload("orders.xml", b"<x/>", "report")),
        )
        .await
        .expect("request must not hang past the converter timeout");
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(as_json(&body)["error"]
            .as_str()
            .unwrap()
            .contains("timed out"));
    }

    /// Whether `pid` is still a live (non-zombie) process
    #[cfg(target_os = "linux")]
    fn process_alive(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            Ok(status) => !status
                .lines()
                .any(|line| line.starts_with("State:") && line.contains('Z')),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_dropped_request_kills_converter() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("converter.pid");
        let script = format!("echo $$ > '{}'; exec sleep 30", pid_file.display());
        let router = router_with(
            dir.path(),
            ConverterConfig::new("sh", ["-c", script.as_str()])
                .with_timeout(Duration::from_secs(60)),
            Layout::Shared,
        );

        let mut pending = Box::pin(
            router
                .clone()
                .oneshot(upload("orders.xml", b"<x/>", "report")),
        );

        let mut pid = String::new();
        for _ in 0..100 {
            tokio::select! {
                _ = &mut pending => panic!("request finished while converter was sleeping"),
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
            if let Ok(contents) = std::fs::read_to_string(&pid_file) {
                if !contents.trim().is_empty() {
                    pid = contents.trim().to_string();
                    break;
                }
            }
        }
        assert!(!pid.is_empty(), "converter never started");
        assert!(process_alive(&pid));

        // Client disconnect
        drop(pending);

        let mut alive = true;
        for _ in 0..100 {
            alive = process_alive(&pid);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive, "converter {} survived the dropped request", pid);
    }

    #[tokio::test]
    async fn test_upload_exit_zero_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with(dir.path(), shell("exit 0"), Layout::Shared);

        let (status, _, body) = send(&router, upload("orders.xml", b"<x/>", "report")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            as_json(&body),
            json!({"error": "Converter produced no output: report.xlsx"})
        );
    }

    #[tokio::test]
    async fn test_upload_exit_zero_trusted_without_verification() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with(
            dir.path(),
            shell("exit 0").with_verify_output(false),
            Layout::Shared,
        );

        let (status, _, body) = send(&router, upload("orders.xml", b"<x/>", "report")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(as_json(&body)["output_file"], "/files/report.xlsx");

        // Nothing was produced, so the link is dead
        let (status, _, _) = send(&router, get("/files/report.xlsx")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_conventional_names_without_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        // Converter knows its file names by convention, not by argument
        let router = router_with(
            dir.path(),
            shell("cp orders.xml report.xlsx"),
            Layout::Shared,
        );

        let (status, _, _) = send(&router, upload("orders.xml", b"<CAEXFile/>", "report")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            std::fs::read(dir.path().join("report.xlsx")).unwrap(),
            b"<CAEXFile/>"
        );
    }

    #[tokio::test]
    async fn test_repeated_upload_overwrites_output() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with(dir.path(), shell(COPY_CONVERTER), Layout::Shared);

        let (status_a, _, body_a) = send(&router, upload("orders.xml", b"<first/>", "report")).await;
        let (status_b, _, body_b) =
            send(&router, upload("orders.xml", b"<second/>", "report")).await;

        assert_eq!(status_a, StatusCode::OK);
        assert_eq!(status_b, StatusCode::OK);
        assert_eq!(as_json(&body_a), as_json(&body_b));

        let (_, _, body) = send(&router, get("/files/report.xlsx")).await;
        assert_eq!(body.as_ref(), b"<second/>");
    }

    #[tokio::test]
    async fn test_concurrent_uploads_same_name_serialized() {
        let dir = tempfile::tempdir().unwrap();
        // Each run checks that nobody else touched the input while it worked
        let router = router_with(
            dir.path(),
            shell(
                r#"before=$(cat "$CONVERT_INPUT"); sleep 0.2; after=$(cat "$CONVERT_INPUT");
                   [ "$before" = "$after" ] || { echo "input changed" >&2; exit 1; }
                   printf '%s' "$after" > "$CONVERT_OUTPUT""#,
            ),
            Layout::Shared,
        );

        let mut handles = Vec::new();
        for i in 0..4 {
            let router = router.clone();
            handles.push(tokio::spawn(async move {
                let data = format!("<run id=\"{}\"/>", i);
                send(&router, upload("orders.xml", data.as_bytes(), "report"))
                    .await
                    .0
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_isolated_layout() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with(dir.path(), shell(COPY_CONVERTER), Layout::Isolated);

        let (status, _, body) = send(&router, upload("orders.xml", b"<one/>", "report")).await;
        assert_eq!(status, StatusCode::OK);
        let output_file = as_json(&body)["output_file"].as_str().unwrap().to_string();

        let parts: Vec<&str> = output_file.split('/').collect();
        assert_eq!(parts.len(), 4, "unexpected link {}", output_file);
        assert_eq!(parts[1], "files");
        assert!(uuid::Uuid::parse_str(parts[2]).is_ok());
        assert_eq!(parts[3], "report.xlsx");

        // Nothing lands in the root
        assert!(!dir.path().join("report.xlsx").exists());

        let (status, headers, body) = send(&router, get(&output_file)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_ref(), b"<one/>");
        assert!(headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("report.xlsx"));

        let (status, _, body) = send(&router, get("/files/not-a-uuid/report.xlsx")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(as_json(&body), json!({"error": "File not found"}));
    }

    #[tokio::test]
    async fn test_isolated_layout_concurrent_same_name() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with(dir.path(), shell(COPY_CONVERTER), Layout::Isolated);

        let mut handles = Vec::new();
        for i in 0..5 {
            let router = router.clone();
            handles.push(tokio::spawn(async move {
                let data = format!("<run id=\"{}\"/>", i);
                let (status, _, body) =
                    send(&router, upload("orders.xml", data.as_bytes(), "report")).await;
                assert_eq!(status, StatusCode::OK);
                (data, as_json(&body)["output_file"].as_str().unwrap().to_string())
            }));
        }

        for handle in handles {
            let (data, link) = handle.await.unwrap();
            let (status, _, body) = send(&router, get(&link)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body.as_ref(), data.as_bytes());
        }
    }
}
