use base64::Engine;
use httpmock::prelude::*;
use ocr_relay::config::{AppState, Config};
use ocr_relay::server;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;

const COOKIE: &str = "lang=zh-CN; token=t0k; ssxmod=abc";

fn relay_config(upstream: &MockServer, static_dir: &Path) -> Config {
    let mut cfg = Config::load_from("tests/no-such-config").unwrap();
    cfg.upstream.base_url = upstream.base_url();
    cfg.http.static_dir = static_dir.to_str().unwrap().to_string();
    cfg.logging.access_log = false;
    cfg
}

/// A relay bound to an ephemeral port, talking to `upstream`
struct Relay {
    addr: SocketAddr,
    client: reqwest::Client,
    _shutdown: oneshot::Sender<()>,
    _static_dir: TempDir,
}

impl Relay {
    async fn start(upstream: &MockServer) -> Self {
        Self::start_with(upstream, |_| {}).await
    }

    async fn start_with(upstream: &MockServer, tweak: impl FnOnce(&mut Config)) -> Self {
        let static_dir = tempfile::tempdir().unwrap();
        std::fs::write(static_dir.path().join("index.html"), "<h1>OCR Relay</h1>").unwrap();

        let mut cfg = relay_config(upstream, static_dir.path());
        tweak(&mut cfg);

        let listener = server::create_reusable_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(AppState::new(&cfg).unwrap());
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(server::serve(
            listener,
            state,
            Arc::new(AtomicUsize::new(0)),
            async {
                let _ = rx.await;
            },
        ));

        Self {
            addr,
            client: reqwest::Client::new(),
            _shutdown: tx,
            _static_dir: static_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn post_json(&self, path: &str, cookie: Option<&str>, body: Value) -> (u16, Value) {
        let mut req = self.client.post(self.url(path)).json(&body);
        if let Some(cookie) = cookie {
            req = req.header("x-custom-cookie", cookie);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

fn chat_answer(content: &str) -> Value {
    json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
}

#[tokio::test]
async fn test_missing_fields_are_rejected() {
    let upstream = MockServer::start_async().await;
    let relay = Relay::start(&upstream).await;

    let (status, body) = relay.post_json("/recognize", Some(COOKIE), json!({})).await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({ "error": "Missing cookie or imageId" }));

    let (status, body) = relay
        .post_json("/recognize", None, json!({ "imageId": "f-1" }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({ "error": "Missing cookie or imageId" }));

    let (status, body) = relay
        .post_json("/api/recognize/url", Some(COOKIE), json!({}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({ "error": "Missing cookie or imageUrl" }));

    let (status, body) = relay
        .post_json("/api/recognize/base64", None, json!({ "base64Image": "AAAA" }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({ "error": "Missing cookie or base64Image" }));
}

#[tokio::test]
async fn test_cookie_without_token_is_rejected() {
    let upstream = MockServer::start_async().await;
    let relay = Relay::start(&upstream).await;

    let (status, body) = relay
        .post_json("/recognize", Some("session=1"), json!({ "imageId": "f-1" }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({ "error": "Invalid cookie format: missing token" }));
}

#[tokio::test]
async fn test_short_answer_becomes_captcha() {
    let upstream = MockServer::start_async().await;
    let chat = upstream
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/chat/completions")
                .header("authorization", "Bearer t0k")
                .header("cookie", COOKIE)
                .json_body_partial(r#"{"stream": false, "model": "qwen-max-latest"}"#)
                .body_contains("\"image\":\"f-1\"");
            then.status(200).json_body(chat_answer("a7kX9"));
        })
        .await;
    let relay = Relay::start(&upstream).await;

    let (status, body) = relay
        .post_json("/recognize", Some(COOKIE), json!({ "imageId": "f-1" }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({ "success": true, "result": "A7KX9", "type": "captcha" })
    );
    chat.assert_async().await;
}

#[tokio::test]
async fn test_base64_upload_then_text_cleanup() {
    let upstream = MockServer::start_async().await;
    let files = upstream
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/files/")
                .header("authorization", "Bearer t0k")
                .body_contains("filename=\"image.png\"")
                .body_contains("image/jpeg");
            then.status(200).json_body(json!({ "id": "file-42" }));
        })
        .await;
    let chat = upstream
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/chat/completions")
                .body_contains("file-42");
            then.status(200)
                .json_body(chat_answer("\n设 $ x^2 $ 为面积\n\n\n\n单位 \\（m\\）\n"));
        })
        .await;
    let relay = Relay::start(&upstream).await;

    let image = base64::engine::general_purpose::STANDARD.encode(b"\xff\xd8\xff\xe0fake-jpeg");
    let (status, body) = relay
        .post_json(
            "/api/recognize/base64",
            Some(COOKIE),
            json!({ "base64Image": format!("data:image/jpeg;base64,{image}") }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["type"], "text");
    assert_eq!(body["result"], "设$x^2$为面积\n\n单位 \\(m\\)");
    files.assert_async().await;
    chat.assert_async().await;
}

#[tokio::test]
async fn test_url_flow_downloads_and_uploads() {
    let upstream = MockServer::start_async().await;
    let image = upstream
        .mock_async(|when, then| {
            when.method(GET).path("/img.png");
            then.status(200).body("PNGDATA");
        })
        .await;
    let files = upstream
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/files/").body_contains("PNGDATA");
            then.status(200).json_body(json!({ "id": "file-7" }));
        })
        .await;
    upstream
        .mock_async(|when, then| {
            when.method(POST).path("/api/chat/completions");
            then.status(200).json_body(chat_answer("Hello, world of images"));
        })
        .await;
    let relay = Relay::start(&upstream).await;

    let (status, body) = relay
        .post_json(
            "/api/recognize/url",
            Some(COOKIE),
            json!({ "imageUrl": upstream.url("/img.png") }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({ "success": true, "result": "Hello, world of images", "type": "text" })
    );
    image.assert_async().await;
    files.assert_async().await;
}

#[tokio::test]
async fn test_download_failure_is_500() {
    let upstream = MockServer::start_async().await;
    upstream
        .mock_async(|when, then| {
            when.method(GET).path("/gone.png");
            then.status(404);
        })
        .await;
    let relay = Relay::start(&upstream).await;

    let (status, body) = relay
        .post_json(
            "/api/recognize/url",
            Some(COOKIE),
            json!({ "imageUrl": upstream.url("/gone.png") }),
        )
        .await;
    assert_eq!(status, 500);
    assert_eq!(
        body,
        json!({ "error": "Failed to download image from URL: Not Found" })
    );
}

#[tokio::test]
async fn test_upload_failures_embed_upstream_text() {
    let upstream = MockServer::start_async().await;
    let mut failing = upstream
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/files/");
            then.status(502).body("bad gateway upstream");
        })
        .await;
    let relay = Relay::start(&upstream).await;

    let (status, body) = relay
        .post_json("/api/recognize/base64", Some(COOKIE), json!({ "base64Image": "AAEC" }))
        .await;
    assert_eq!(status, 500);
    assert_eq!(
        body,
        json!({ "error": "File upload failed: Bad Gateway - bad gateway upstream" })
    );

    failing.delete_async().await;
    upstream
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/files/");
            then.status(200).json_body(json!({ "detail": "stored" }));
        })
        .await;

    let (status, body) = relay
        .post_json("/api/recognize/base64", Some(COOKIE), json!({ "base64Image": "AAEC" }))
        .await;
    assert_eq!(status, 500);
    assert_eq!(body, json!({ "error": "File upload failed: No ID received" }));
}

#[tokio::test]
async fn test_chat_failure_is_tagged_unsuccessful() {
    let upstream = MockServer::start_async().await;
    upstream
        .mock_async(|when, then| {
            when.method(POST).path("/api/chat/completions");
            then.status(401).body("token expired");
        })
        .await;
    let relay = Relay::start(&upstream).await;

    let (status, body) = relay
        .post_json("/recognize", Some(COOKIE), json!({ "imageId": "f-1" }))
        .await;
    assert_eq!(status, 500);
    assert_eq!(
        body,
        json!({
            "success": false,
            "error": "Qwen API request failed: Unauthorized - token expired"
        })
    );
}

#[tokio::test]
async fn test_empty_answer_reports_failure_text() {
    let upstream = MockServer::start_async().await;
    upstream
        .mock_async(|when, then| {
            when.method(POST).path("/api/chat/completions");
            then.status(200).json_body(json!({ "choices": [] }));
        })
        .await;
    let relay = Relay::start(&upstream).await;

    let (status, body) = relay
        .post_json("/recognize", Some(COOKIE), json!({ "imageId": "f-1" }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({ "success": true, "result": "识别失败", "type": "text" })
    );
}

#[tokio::test]
async fn test_advanced_mode_forwards_custom_prompt_verbatim() {
    let upstream = MockServer::start_async().await;
    let chat = upstream
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/chat/completions")
                .body_contains("Transcribe the table as CSV");
            then.status(200).json_body(chat_answer("a,b\n\n\n\n1,2 "));
        })
        .await;
    let relay = Relay::start(&upstream).await;

    let prompt = base64::engine::general_purpose::STANDARD.encode("Transcribe the table as CSV");
    let resp = relay
        .client
        .post(relay.url("/recognize"))
        .header("x-custom-cookie", COOKIE)
        .header("x-advanced-mode", "true")
        .header("x-custom-prompt", prompt)
        .json(&json!({ "imageId": "f-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body,
        json!({ "success": true, "result": "a,b\n\n\n\n1,2 ", "type": "text" })
    );
    chat.assert_async().await;
}

#[tokio::test]
async fn test_urlencoded_body_is_accepted() {
    let upstream = MockServer::start_async().await;
    upstream
        .mock_async(|when, then| {
            when.method(POST).path("/api/chat/completions").body_contains("f-9");
            then.status(200).json_body(chat_answer("zz9"));
        })
        .await;
    let relay = Relay::start(&upstream).await;

    let resp = relay
        .client
        .post(relay.url("/recognize"))
        .header("x-custom-cookie", COOKIE)
        .header("content-type", "application/x-www-form-urlencoded")
        .body("imageId=f-9")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"], "ZZ9");
    assert_eq!(body["type"], "captcha");
}

#[tokio::test]
async fn test_proxy_upload_relays_upstream_answer() {
    let upstream = MockServer::start_async().await;
    let files = upstream
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/files/")
                .header("authorization", "Bearer t0k")
                .body_contains("filename=\"scan.jpg\"");
            then.status(201)
                .json_body(json!({ "id": "f-55", "filename": "scan.jpg" }));
        })
        .await;
    let relay = Relay::start(&upstream).await;

    let part = reqwest::multipart::Part::bytes(b"JPEG".to_vec())
        .file_name("scan.jpg")
        .mime_str("image/jpeg")
        .unwrap();
    let resp = relay
        .client
        .post(relay.url("/proxy/upload"))
        .header("x-custom-cookie", COOKIE)
        .multipart(reqwest::multipart::Form::new().part("file", part))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "id": "f-55", "filename": "scan.jpg" }));
    files.assert_async().await;
}

#[tokio::test]
async fn test_proxy_upload_without_file() {
    let upstream = MockServer::start_async().await;
    let relay = Relay::start(&upstream).await;

    let resp = relay
        .client
        .post(relay.url("/proxy/upload"))
        .header("x-custom-cookie", COOKIE)
        .multipart(reqwest::multipart::Form::new().text("note", "hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "error": "No file uploaded" }));
}

#[tokio::test]
async fn test_static_page_cors_and_methods() {
    let upstream = MockServer::start_async().await;
    let relay = Relay::start(&upstream).await;

    let resp = relay.client.get(relay.url("/")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    assert_eq!(resp.text().await.unwrap(), "<h1>OCR Relay</h1>");

    let resp = relay.client.get(relay.url("/nope.js")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    let resp = relay
        .client
        .request(reqwest::Method::OPTIONS, relay.url("/api/recognize/url"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 204);
    let allowed = resp.headers()["access-control-allow-headers"].to_str().unwrap();
    assert!(allowed.contains("x-advanced-mode"));

    let resp = relay.client.put(relay.url("/recognize")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 405);

    let resp = relay.client.post(relay.url("/api/unknown")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    let body: Value = resp.json().await.unwrap();
    assert!(body.get("error").is_some());

    let resp = relay.client.get(relay.url("/healthz")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let upstream = MockServer::start_async().await;
    let relay = Relay::start_with(&upstream, |cfg| cfg.http.max_body_size = 64).await;

    let resp = relay
        .client
        .post(relay.url("/api/recognize/base64"))
        .header("x-custom-cookie", COOKIE)
        .header("content-type", "application/json")
        .body(format!("{{\"base64Image\":\"{}\"}}", "A".repeat(256)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 413);
}

#[tokio::test]
async fn test_unparseable_data_url_type_uploads_as_png() {
    let upstream = MockServer::start_async().await;
    let files = upstream
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/files/")
                .body_contains("image/png");
            then.status(200).json_body(json!({ "id": "file-3" }));
        })
        .await;
    upstream
        .mock_async(|when, then| {
            when.method(POST).path("/api/chat/completions").body_contains("file-3");
            then.status(200).json_body(chat_answer("QX12"));
        })
        .await;
    let relay = Relay::start(&upstream).await;

    let (status, body) = relay
        .post_json(
            "/api/recognize/base64",
            Some(COOKIE),
            json!({ "base64Image": "data:image/;base64,AAEC" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], "QX12");
    files.assert_async().await;
}

#[tokio::test]
async fn test_url_safe_base64_with_stray_characters() {
    let upstream = MockServer::start_async().await;
    let files = upstream
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/files/");
            then.status(200).json_body(json!({ "id": 99 }));
        })
        .await;
    let chat = upstream
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/chat/completions")
                .body_contains("\"image\":\"99\"");
            then.status(200).json_body(chat_answer("ok7"));
        })
        .await;
    let relay = Relay::start(&upstream).await;

    let (status, body) = relay
        .post_json(
            "/api/recognize/base64",
            Some(COOKIE),
            json!({ "base64Image": "-_-_\n#AAB=" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], "OK7");
    files.assert_async().await;
    chat.assert_async().await;
}

#[tokio::test]
async fn test_numeric_image_id_is_accepted() {
    let upstream = MockServer::start_async().await;
    let chat = upstream
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/chat/completions")
                .body_contains("\"image\":\"12345\"");
            then.status(200).json_body(chat_answer("x9"));
        })
        .await;
    let relay = Relay::start(&upstream).await;

    let (status, body) = relay
        .post_json("/recognize", Some(COOKIE), json!({ "imageId": 12345 }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], "X9");
    chat.assert_async().await;

    let (status, body) = relay
        .post_json("/recognize", Some(COOKIE), json!({ "imageId": 0 }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({ "error": "Missing cookie or imageId" }));
}

/// Runs the relay the way `main` does: the runtime is dropped as soon as
/// `serve` returns, so anything still running would be cancelled.
#[test]
fn test_shutdown_lets_in_flight_request_finish() {
    let upstream = MockServer::start();
    let _chat = upstream.mock(|when, then| {
        when.method(POST).path("/api/chat/completions");
        then.status(200)
            .delay(Duration::from_millis(800))
            .json_body(chat_answer("late1"));
    });
    let static_dir = tempfile::tempdir().unwrap();
    let cfg = relay_config(&upstream, static_dir.path());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let (listener, state) = runtime.block_on(async {
        let listener = server::create_reusable_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        (listener, Arc::new(AppState::new(&cfg).unwrap()))
    });
    let addr = listener.local_addr().unwrap();

    let caller = std::thread::spawn(move || {
        tokio::runtime::Runtime::new().unwrap().block_on(async move {
            reqwest::Client::new()
                .post(format!("http://{addr}/recognize"))
                .header("x-custom-cookie", COOKIE)
                .json(&json!({ "imageId": "f-1" }))
                .send()
                .await?
                .json::<Value>()
                .await
        })
    });

    runtime.block_on(server::serve(
        listener,
        state,
        Arc::new(AtomicUsize::new(0)),
        async {
            tokio::time::sleep(Duration::from_millis(300)).await;
        },
    ));
    drop(runtime);

    let body = caller.join().unwrap().unwrap();
    assert_eq!(
        body,
        json!({ "success": true, "result": "LATE1", "type": "captcha" })
    );
}
