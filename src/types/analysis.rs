//! Structured analysis requests and their typed results.

use serde::{Deserialize, Serialize};

use super::chat::{ChatParameters, ModelId, Usage};
use crate::llm::traits::ProviderType;

/// Kind of structured analysis; each variant fixes the shape of the result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    LeadScoring,
    Summarization,
    Sentiment,
    KeywordExtraction,
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 4] = [
        AnalysisType::LeadScoring,
        AnalysisType::Summarization,
        AnalysisType::Sentiment,
        AnalysisType::KeywordExtraction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::LeadScoring => "lead_scoring",
            AnalysisType::Summarization => "summarization",
            AnalysisType::Sentiment => "sentiment",
            AnalysisType::KeywordExtraction => "keyword_extraction",
        }
    }
}

impl std::fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured analysis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub analysis_type: AnalysisType,
    /// Opaque payload to analyse (a lead record, a document, ...)
    pub subject: serde_json::Value,
    pub model: ModelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderType>,
    #[serde(default)]
    pub parameters: ChatParameters,
}

impl AnalysisRequest {
    pub fn new<M: Into<ModelId>>(
        analysis_type: AnalysisType,
        model: M,
        subject: serde_json::Value,
    ) -> Self {
        Self {
            analysis_type,
            subject,
            model: model.into(),
            provider: None,
            parameters: ChatParameters::default(),
        }
    }

    pub fn with_provider(mut self, provider: ProviderType) -> Self {
        self.provider = Some(provider);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadTier {
    Hot,
    Warm,
    Cold,
}

impl LeadTier {
    /// Tier implied by a 0-100 score
    pub fn from_score(score: u8) -> Self {
        match score {
            70..=u8::MAX => LeadTier::Hot,
            40..=69 => LeadTier::Warm,
            _ => LeadTier::Cold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

/// Typed analysis result; the variant always matches the request's type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisResult {
    LeadScore {
        score: u8,
        tier: LeadTier,
        reasoning: String,
        #[serde(default)]
        factors: Vec<String>,
    },
    Summary {
        summary: String,
        #[serde(default)]
        key_points: Vec<String>,
    },
    Sentiment {
        label: SentimentLabel,
        confidence: f32,
    },
    Keywords {
        keywords: Vec<String>,
    },
}

impl AnalysisResult {
    pub fn analysis_type(&self) -> AnalysisType {
        match self {
            AnalysisResult::LeadScore { .. } => AnalysisType::LeadScoring,
            AnalysisResult::Summary { .. } => AnalysisType::Summarization,
            AnalysisResult::Sentiment { .. } => AnalysisType::Sentiment,
            AnalysisResult::Keywords { .. } => AnalysisType::KeywordExtraction,
        }
    }
}

/// Complete, typed result of one analysis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub analysis_type: AnalysisType,
    pub model: ModelId,
    pub provider: ProviderType,
    pub result: AnalysisResult,
    pub usage: Usage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lead_tier_boundaries() {
        assert_eq!(LeadTier::from_score(100), LeadTier::Hot);
        assert_eq!(LeadTier::from_score(70), LeadTier::Hot);
        assert_eq!(LeadTier::from_score(69), LeadTier::Warm);
        assert_eq!(LeadTier::from_score(40), LeadTier::Warm);
        assert_eq!(LeadTier::from_score(39), LeadTier::Cold);
    }

    #[test]
    fn test_result_variant_matches_type() {
        let result = AnalysisResult::Keywords {
            keywords: vec!["rust".to_string()],
        };
        assert_eq!(result.analysis_type(), AnalysisType::KeywordExtraction);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["type"], "keywords");
    }
}
