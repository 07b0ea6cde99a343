//! Non-streaming chat through the gateway facade

mod common;

use std::time::Duration;

use ai_gateway::error::{GatewayError, TransientKind};
use ai_gateway::llm::ProviderType;
use ai_gateway::types::ChatCompletionRequest;
use common::{gateway_with, llama_fallback, user, Script, ScriptedAdapter};

#[tokio::test]
async fn test_omitted_provider_resolves_to_default() {
    let ollama = ScriptedAdapter::reply(ProviderType::Ollama, "Paris");
    let lm_studio = ScriptedAdapter::reply(ProviderType::LmStudio, "Paris too");
    let gateway = gateway_with(&[ollama.clone(), lm_studio.clone()], vec![]);

    let response = gateway
        .send_chat_completion(ChatCompletionRequest::new("llama", user("Capital of France?")))
        .await
        .unwrap();

    assert_eq!(response.provider, ProviderType::Ollama);
    assert_eq!(response.message.content, "Paris");
    assert_eq!(ollama.calls(), 1);
    assert_eq!(lm_studio.calls(), 0);
}

#[tokio::test]
async fn test_explicit_provider_is_honoured() {
    let ollama = ScriptedAdapter::reply(ProviderType::Ollama, "from ollama");
    let lm_studio = ScriptedAdapter::reply(ProviderType::LmStudio, "from lm studio");
    let gateway = gateway_with(&[ollama.clone(), lm_studio.clone()], vec![]);

    let request =
        ChatCompletionRequest::new("llama", user("hi")).with_provider(ProviderType::LmStudio);
    let response = gateway.send_chat_completion(request).await.unwrap();

    assert_eq!(response.provider, ProviderType::LmStudio);
    assert_eq!(ollama.calls(), 0);
}

#[tokio::test]
async fn test_unregistered_model_never_reaches_an_adapter() {
    let ollama = ScriptedAdapter::reply(ProviderType::Ollama, "unused");
    let gateway = gateway_with(&[ollama.clone()], vec![]);

    let err = gateway
        .send_chat_completion(ChatCompletionRequest::new("gpt-17", user("hi")))
        .await
        .unwrap_err();
    assert!(err.is_validation_error());

    let err = gateway
        .send_chat_completion(
            ChatCompletionRequest::new("llama", user("hi")).with_provider(ProviderType::Anthropic),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::UnknownModel { provider: Some(ProviderType::Anthropic), .. }));

    let err = gateway
        .send_chat_completion(ChatCompletionRequest::new("llama", vec![]))
        .await
        .unwrap_err();
    assert!(err.is_validation_error());

    assert_eq!(ollama.calls(), 0);
    assert_eq!(gateway.in_flight(), 0);
}

#[tokio::test]
async fn test_transient_failure_is_served_by_fallback() {
    let ollama = ScriptedAdapter::new(ProviderType::Ollama, Script::Transient);
    let lm_studio = ScriptedAdapter::reply(ProviderType::LmStudio, "rescued");
    let gateway = gateway_with(&[ollama.clone(), lm_studio.clone()], vec![llama_fallback()]);

    let response = gateway
        .send_chat_completion(ChatCompletionRequest::new("llama", user("hi")))
        .await
        .unwrap();

    assert_eq!(response.provider, ProviderType::LmStudio);
    assert_eq!(response.message.content, "rescued");
    assert_eq!(ollama.calls(), 1);
    assert_eq!(lm_studio.calls(), 1);
}

#[tokio::test]
async fn test_fallback_happens_at_most_once() {
    let ollama = ScriptedAdapter::new(ProviderType::Ollama, Script::Transient);
    let lm_studio = ScriptedAdapter::new(ProviderType::LmStudio, Script::Transient);
    let gateway = gateway_with(&[ollama.clone(), lm_studio.clone()], vec![llama_fallback()]);

    let err = gateway
        .send_chat_completion(ChatCompletionRequest::new("llama", user("hi")))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GatewayError::ProviderTransient {
            provider: ProviderType::LmStudio,
            kind: TransientKind::Timeout,
            ..
        }
    ));
    assert_eq!(ollama.calls(), 1);
    assert_eq!(lm_studio.calls(), 1);
}

#[tokio::test]
async fn test_fatal_failure_skips_fallback() {
    let ollama = ScriptedAdapter::new(ProviderType::Ollama, Script::Fatal);
    let lm_studio = ScriptedAdapter::reply(ProviderType::LmStudio, "unused");
    let gateway = gateway_with(&[ollama.clone(), lm_studio.clone()], vec![llama_fallback()]);

    let err = gateway
        .send_chat_completion(ChatCompletionRequest::new("llama", user("hi")))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::ProviderFatal { .. }));
    assert_eq!(lm_studio.calls(), 0);
}

#[tokio::test]
async fn test_request_deadline_becomes_transient_and_falls_back() {
    let ollama = ScriptedAdapter::new(
        ProviderType::Ollama,
        Script::Slow("too late".to_string(), Duration::from_secs(30)),
    );
    let lm_studio = ScriptedAdapter::reply(ProviderType::LmStudio, "on time");
    let gateway = ai_gateway::AiGateway::builder()
        .registry(common::test_registry())
        .adapter(ollama.clone())
        .adapter(lm_studio.clone())
        .fallback(llama_fallback())
        .request_timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let response = gateway
        .send_chat_completion(ChatCompletionRequest::new("llama", user("hi")))
        .await
        .unwrap();
    assert_eq!(response.provider, ProviderType::LmStudio);
}

#[tokio::test]
async fn test_cancel_in_flight_request() {
    let ollama = ScriptedAdapter::new(
        ProviderType::Ollama,
        Script::Slow("never seen".to_string(), Duration::from_secs(30)),
    );
    let gateway = gateway_with(&[ollama.clone()], vec![]);

    let in_flight = gateway
        .start_chat_completion(ChatCompletionRequest::new("llama", user("hi")))
        .unwrap();
    let id = in_flight.id();
    assert_eq!(gateway.in_flight(), 1);

    assert!(gateway.cancel(id));
    match in_flight.await {
        Err(GatewayError::Cancelled { request_id }) => assert_eq!(request_id, id),
        other => panic!("expected Cancelled, got {:?}", other),
    }

    // The task leaves the table once it observes the cancellation
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(gateway.in_flight(), 0);
    assert!(!gateway.cancel(id));
}

#[tokio::test]
async fn test_concurrent_requests_are_independent() {
    let ollama = ScriptedAdapter::reply(ProviderType::Ollama, "pong");
    let gateway = gateway_with(&[ollama.clone()], vec![]);

    let requests = (0..8).map(|i| {
        let gateway = gateway.clone();
        async move {
            gateway
                .send_chat_completion(ChatCompletionRequest::new("llama", user(&format!("ping {}", i))))
                .await
        }
    });
    let responses = futures::future::join_all(requests).await;

    assert!(responses.iter().all(|r| r.is_ok()));
    assert_eq!(ollama.calls(), 8);
}

#[tokio::test]
async fn test_health_check_reports_every_adapter() {
    let ollama = ScriptedAdapter::reply(ProviderType::Ollama, "ok");
    let lm_studio = ScriptedAdapter::new(ProviderType::LmStudio, Script::Transient);
    let gateway = gateway_with(&[lm_studio, ollama], vec![]);

    let statuses = gateway.health_check().await;
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].provider, ProviderType::Ollama);
    assert!(statuses[0].healthy);
    assert!(!statuses[1].healthy);
}
