//! Parsing model output into typed analysis results.
//!
//! All-or-nothing: either every required field parses and passes its range
//! check, or the call fails with `ProviderFatal`. Models sometimes wrap JSON
//! in code fences or add a sentence around it, so the outermost object is
//! extracted first.

use serde::Deserialize;

use crate::error::GatewayError;
use crate::llm::traits::ProviderType;
use crate::types::{AnalysisResult, AnalysisType, LeadTier, SentimentLabel};

/// Outermost `{...}` in the model output
pub fn extract_json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&content[start..=end])
}

#[derive(Debug, Deserialize)]
struct LeadScoreWire {
    score: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    factors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryWire {
    summary: String,
    #[serde(default)]
    key_points: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SentimentWire {
    label: String,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct KeywordsWire {
    keywords: Vec<String>,
}

fn malformed(provider: ProviderType, analysis_type: AnalysisType, detail: impl std::fmt::Display) -> GatewayError {
    GatewayError::provider_fatal(
        provider,
        format!("Malformed {} analysis: {}", analysis_type, detail),
    )
}

/// Parse `content` into the result variant for `analysis_type`
pub fn parse_result(
    provider: ProviderType,
    analysis_type: AnalysisType,
    content: &str,
) -> Result<AnalysisResult, GatewayError> {
    let json = extract_json_object(content)
        .ok_or_else(|| malformed(provider, analysis_type, "no JSON object in model output"))?;

    macro_rules! decode {
        ($wire:ty) => {
            serde_json::from_str::<$wire>(json).map_err(|e| malformed(provider, analysis_type, e))?
        };
    }

    let result = match analysis_type {
        AnalysisType::LeadScoring => {
            let wire = decode!(LeadScoreWire);
            if !(0.0..=100.0).contains(&wire.score) {
                return Err(malformed(
                    provider,
                    analysis_type,
                    format!("score {} outside 0-100", wire.score),
                ));
            }
            let score = wire.score.round() as u8;
            AnalysisResult::LeadScore {
                score,
                tier: LeadTier::from_score(score),
                reasoning: wire.reasoning.trim().to_string(),
                factors: clean_list(wire.factors),
            }
        }
        AnalysisType::Summarization => {
            let wire = decode!(SummaryWire);
            let summary = wire.summary.trim().to_string();
            if summary.is_empty() {
                return Err(malformed(provider, analysis_type, "empty summary"));
            }
            AnalysisResult::Summary {
                summary,
                key_points: clean_list(wire.key_points),
            }
        }
        AnalysisType::Sentiment => {
            let wire = decode!(SentimentWire);
            let label = match wire.label.trim().to_ascii_lowercase().as_str() {
                "positive" => SentimentLabel::Positive,
                "neutral" | "mixed" => SentimentLabel::Neutral,
                "negative" => SentimentLabel::Negative,
                other => {
                    return Err(malformed(
                        provider,
                        analysis_type,
                        format!("unknown label '{}'", other),
                    ))
                }
            };
            if !(0.0..=1.0).contains(&wire.confidence) {
                return Err(malformed(
                    provider,
                    analysis_type,
                    format!("confidence {} outside 0-1", wire.confidence),
                ));
            }
            AnalysisResult::Sentiment {
                label,
                confidence: wire.confidence as f32,
            }
        }
        AnalysisType::KeywordExtraction => {
            let wire = decode!(KeywordsWire);
            AnalysisResult::Keywords {
                keywords: clean_list(wire.keywords),
            }
        }
    };

    Ok(result)
}

/// Trim entries, drop blanks and case-insensitive duplicates, keep order
fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty() && seen.insert(item.to_lowercase()))
        .collect()
}
