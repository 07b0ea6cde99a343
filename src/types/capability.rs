//! Capabilities a registered model may advertise.

use serde::{Deserialize, Serialize};

use super::analysis::AnalysisType;

/// A named feature a model may or may not support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    StreamingChat,
    Analysis(AnalysisType),
}

impl Capability {
    /// Capability required by a chat request in the given mode
    pub fn for_chat(stream: bool) -> Self {
        if stream {
            Capability::StreamingChat
        } else {
            Capability::Chat
        }
    }

    /// Chat, streaming chat and every analysis type
    pub fn full_set() -> Vec<Capability> {
        let mut all = vec![Capability::Chat, Capability::StreamingChat];
        all.extend(AnalysisType::ALL.iter().copied().map(Capability::Analysis));
        all
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Chat => write!(f, "chat"),
            Capability::StreamingChat => write!(f, "streaming chat"),
            Capability::Analysis(kind) => write!(f, "analysis:{}", kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_display() {
        assert_eq!(Capability::for_chat(true).to_string(), "streaming chat");
        assert_eq!(
            Capability::Analysis(AnalysisType::Sentiment).to_string(),
            "analysis:sentiment"
        );
        assert_eq!(Capability::full_set().len(), 6);
    }

    #[test]
    fn test_capability_serde_round_trip_in_config_form() {
        let caps: Vec<Capability> =
            serde_json::from_str(r#"["chat", {"analysis": "lead_scoring"}]"#).unwrap();
        assert_eq!(
            caps,
            vec![
                Capability::Chat,
                Capability::Analysis(AnalysisType::LeadScoring)
            ]
        );
    }
}
