//! Real HTTP clients against local actix servers standing in for the vendor APIs.

mod common;

use actix_web::{App, HttpResponse, HttpServer, web};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{JPEG_BYTES, KeywordGenerator};
use stylemorph::config::{AnalysisConfig, FanOutConfig, GenerationConfig};
use stylemorph::errors::{AuthError, ErrorKind, InferenceError, OrchestrationError};
use stylemorph::models::SessionPhase;
use stylemorph::services::auth::RegistrationForm;
use stylemorph::services::{
    AuthBackend, ClothingImageGenerator, HuggingFaceBackend, ImageSynthesizer, OpenRouterAnalyzer,
    PocketBaseClient, ResultAggregator, StyleAnalyzer, StyleOrchestrator,
};

/// Serves `body` with `status` for every request, counting hits.
fn spawn_stub(
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
) -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    let server = HttpServer::new(move || {
        let counter = counter.clone();
        let body = body.clone();
        App::new().default_service(web::to(move || {
            let counter = counter.clone();
            let body = body.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                HttpResponse::build(actix_web::http::StatusCode::from_u16(status).unwrap())
                    .content_type(content_type)
                    .body(body)
            }
        }))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();

    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    (addr, hits)
}

fn analysis_config(addr: SocketAddr) -> AnalysisConfig {
    AnalysisConfig {
        endpoint: format!("http://{}/", addr),
        api_key: "test-key".to_string(),
        model: "test-model".to_string(),
        timeout: Duration::from_secs(5),
    }
}

fn generation_config(addr: SocketAddr) -> GenerationConfig {
    GenerationConfig {
        endpoint: format!("http://{}/", addr),
        api_token: "test-token".to_string(),
        timeout: Duration::from_secs(5),
        max_attempts: 3,
        retry_delay: Duration::from_millis(10),
    }
}

fn chat_completion(content: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    }))
    .unwrap()
}

#[actix_web::test]
async fn analysis_http_500_fails_session_without_generation() {
    let (addr, hits) = spawn_stub(
        500,
        "application/json",
        br#"{"error":{"message":"Internal Server Error"}}"#.to_vec(),
    );
    let analyzer = Arc::new(OpenRouterAnalyzer::new(analysis_config(addr)).unwrap());
    let generator = Arc::new(KeywordGenerator::new(Duration::ZERO));
    let orchestrator = StyleOrchestrator::new(
        analyzer,
        generator.clone(),
        Arc::new(ResultAggregator::new()),
        FanOutConfig::default(),
    );

    let err = orchestrator.analyze(JPEG_BYTES.to_vec()).await.unwrap_err();

    match err {
        OrchestrationError::Analysis(InferenceError::Remote { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "Internal Server Error");
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    assert!(matches!(
        orchestrator.aggregator().snapshot().phase,
        SessionPhase::AnalysisFailed {
            status: Some(500),
            ..
        }
    ));
}

#[actix_web::test]
async fn analysis_decodes_chat_completion() {
    let content = r#"```json
{
  "bodyAnalysisSummary": "Whole body visible; pear shape.",
  "genderPresentation": "Female",
  "styleRecommendations": [
    {"itemType": "Bottoms", "itemDescription": "A-line midi skirt",
     "stylingRationale": "Balances the hips", "materialAndPattern": "cotton poplin"}
  ],
  "generalStylingTips": ["Draw attention upward with statement necklines"]
}
```"#;
    let (addr, _) = spawn_stub(200, "application/json", chat_completion(content));
    let analyzer = OpenRouterAnalyzer::new(analysis_config(addr)).unwrap();

    let result = analyzer.analyze(JPEG_BYTES).await.unwrap();

    assert_eq!(result.items.len(), 1);
    assert_eq!(
        result.items[0].generation_description(),
        "A-line midi skirt, cotton poplin"
    );
}

#[actix_web::test]
async fn analysis_classifies_bad_payloads() {
    let (addr, _) = spawn_stub(200, "text/html", b"<html>oops</html>".to_vec());
    let err = OpenRouterAnalyzer::new(analysis_config(addr))
        .unwrap()
        .analyze(JPEG_BYTES)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);

    let (addr, _) = spawn_stub(
        200,
        "application/json",
        chat_completion(r#"{"bodyAnalysisSummary": "ok"}"#),
    );
    let err = OpenRouterAnalyzer::new(analysis_config(addr))
        .unwrap()
        .analyze(JPEG_BYTES)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[actix_web::test]
async fn analysis_unreachable_is_transport_error() {
    // Bind then drop to get a port nothing listens on.
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let err = OpenRouterAnalyzer::new(analysis_config(addr))
        .unwrap()
        .analyze(JPEG_BYTES)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[actix_web::test]
async fn gateway_timeouts_exhaust_exactly_max_attempts() {
    let (addr, hits) = spawn_stub(504, "text/plain", b"Gateway Timeout".to_vec());
    let config = generation_config(addr);
    let backend = Arc::new(HuggingFaceBackend::new(&config).unwrap());
    let synthesizer = ImageSynthesizer::new(backend, &config);

    let err = synthesizer.generate("charcoal wool trousers").await.unwrap_err();

    assert_eq!(hits.load(Ordering::SeqCst), 3);
    match err {
        InferenceError::GenerationExhausted {
            attempts,
            last_status,
            detail,
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(last_status, Some(504));
            assert!(detail.contains("Gateway Timeout"));
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[actix_web::test]
async fn json_error_body_on_success_status_is_retried() {
    let (addr, hits) = spawn_stub(
        200,
        "application/json",
        br#"{"error":"Model black-forest-labs/FLUX.1-dev is currently loading"}"#.to_vec(),
    );
    let config = generation_config(addr);
    let backend = Arc::new(HuggingFaceBackend::new(&config).unwrap());
    let synthesizer = ImageSynthesizer::new(backend, &config);

    let err = synthesizer.generate("silk scarf").await.unwrap_err();

    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(err.kind(), ErrorKind::GenerationExhausted);
    assert!(err.to_string().contains("currently loading"));
}

#[actix_web::test]
async fn image_bytes_become_embedded_ref() {
    let (addr, hits) = spawn_stub(200, "image/jpeg", JPEG_BYTES.to_vec());
    let config = generation_config(addr);
    let backend = Arc::new(HuggingFaceBackend::new(&config).unwrap());
    let synthesizer = ImageSynthesizer::new(backend, &config);

    let image_ref = synthesizer.generate("leather loafers").await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(image_ref.as_str().starts_with("data:image/jpeg;base64,"));
    assert_eq!(image_ref.decode_embedded().as_deref(), Some(JPEG_BYTES));
}

#[actix_web::test]
async fn pocketbase_field_errors_are_normalized() {
    let (addr, hits) = spawn_stub(
        400,
        "application/json",
        br#"{"code":400,"message":"Failed to create record.","data":{
            "email":{"code":"validation_not_unique","message":"The email is invalid or already in use."},
            "password":{"code":"validation_length_out_of_range"}}}"#
            .to_vec(),
    );
    let client = PocketBaseClient::new(&format!("http://{}/", addr)).unwrap();
    let form = RegistrationForm {
        email: "ada@example.com".to_string(),
        name: "Ada".to_string(),
        password: "difference-engine".to_string(),
        password_confirm: "difference-engine".to_string(),
    };

    let err = client.create_user(&form).await.unwrap_err();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(
        err.display_lines(),
        vec![
            "email: The email is invalid or already in use.".to_string(),
            "password: validation_length_out_of_range".to_string(),
        ]
    );
    assert!(matches!(err, AuthError::Rejected { status: 400, .. }));
}

#[actix_web::test]
async fn pocketbase_login_yields_token_and_record() {
    let (addr, _) = spawn_stub(
        200,
        "application/json",
        br#"{"token":"jwt-abc","record":{"id":"u1","email":"ada@example.com","name":"Ada","verified":true}}"#
            .to_vec(),
    );
    let client = PocketBaseClient::new(&format!("http://{}", addr)).unwrap();

    let state = client
        .authenticate("ada@example.com", "difference-engine")
        .await
        .unwrap();

    assert_eq!(state.token, "jwt-abc");
    assert_eq!(state.user.id, "u1");
    assert_eq!(state.user.name, "Ada");
}
