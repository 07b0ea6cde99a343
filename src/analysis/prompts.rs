//! Prompt construction for structured analysis.
//!
//! Each analysis type asks the model for one JSON object with a fixed set of
//! keys; [`super::parse`] reads exactly those keys back.

use crate::types::{AnalysisRequest, AnalysisType, ChatCompletionRequest, ChatMessage, ModelId};

/// Sampling temperature used when the request leaves it unset
pub const ANALYSIS_TEMPERATURE: f32 = 0.2;

const PREAMBLE: &str = "You are an analysis engine. Respond with a single JSON object and nothing else: no prose, no code fences.";

fn instructions(analysis_type: AnalysisType) -> &'static str {
    match analysis_type {
        AnalysisType::LeadScoring => {
            r#"Score the sales lead in the user message from 0 (no fit) to 100 (ideal fit).
Return {"score": <integer 0-100>, "reasoning": "<one or two sentences>", "factors": ["<signal that drove the score>", ...]}"#
        }
        AnalysisType::Summarization => {
            r#"Summarize the content in the user message.
Return {"summary": "<concise summary>", "key_points": ["<point>", ...]}"#
        }
        AnalysisType::Sentiment => {
            r#"Classify the overall sentiment of the content in the user message.
Return {"label": "positive" | "neutral" | "negative", "confidence": <number between 0 and 1>}"#
        }
        AnalysisType::KeywordExtraction => {
            r#"Extract the most relevant keywords or key phrases from the content in the user message, most relevant first.
Return {"keywords": ["<keyword>", ...]}"#
        }
    }
}

/// System prompt for one analysis type
pub fn system_prompt(analysis_type: AnalysisType) -> String {
    format!("{}\n\n{}", PREAMBLE, instructions(analysis_type))
}

/// The subject as the user message body; strings are passed through verbatim
pub fn subject_text(subject: &serde_json::Value) -> String {
    match subject {
        serde_json::Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Chat request that asks `model` for the analysis document
pub fn build_chat_request(model: &ModelId, request: &AnalysisRequest) -> ChatCompletionRequest {
    let mut chat = ChatCompletionRequest::new(
        model.clone(),
        vec![
            ChatMessage::system(system_prompt(request.analysis_type)),
            ChatMessage::user(subject_text(&request.subject)),
        ],
    );
    chat.provider = request.provider;
    chat.parameters = request.parameters.clone();
    chat.parameters.json_response = true;
    if chat.parameters.temperature.is_none() {
        chat.parameters.temperature = Some(ANALYSIS_TEMPERATURE);
    }
    chat
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatRole;
    use serde_json::json;

    #[test]
    fn test_build_chat_request() {
        let request = AnalysisRequest::new(
            AnalysisType::Sentiment,
            "gpt-4o-mini",
            json!("I love this product"),
        );
        let chat = build_chat_request(&request.model, &request);

        assert!(!chat.stream);
        assert!(chat.parameters.json_response);
        assert_eq!(chat.parameters.temperature, Some(ANALYSIS_TEMPERATURE));
        assert_eq!(chat.messages[0].role, ChatRole::System);
        assert!(chat.messages[0].content.contains("\"label\""));
        assert_eq!(chat.messages[1].content, "I love this product");
    }

    #[test]
    fn test_structured_subject_is_pretty_printed() {
        let text = subject_text(&json!({"company": "Acme", "employees": 250}));
        assert!(text.contains("\"company\": \"Acme\""));
    }

    #[test]
    fn test_every_type_has_instructions() {
        for analysis_type in AnalysisType::ALL {
            assert!(system_prompt(analysis_type).contains("Return {"));
        }
    }
}
