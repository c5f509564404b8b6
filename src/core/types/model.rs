//! Model classification and catalog types

use serde::{Deserialize, Serialize};

/// What kind of workload a deployment serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Chat,
    Embedding,
    ImageGeneration,
    AudioTranscription,
    AudioSpeech,
    Moderation,
    Rerank,
}

impl Default for ModelType {
    fn default() -> Self {
        Self::Chat
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelType::Chat => "chat",
            ModelType::Embedding => "embedding",
            ModelType::ImageGeneration => "image_generation",
            ModelType::AudioTranscription => "audio_transcription",
            ModelType::AudioSpeech => "audio_speech",
            ModelType::Moderation => "moderation",
            ModelType::Rerank => "rerank",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(ModelType::Chat),
            "embedding" => Ok(ModelType::Embedding),
            "image_generation" => Ok(ModelType::ImageGeneration),
            "audio_transcription" => Ok(ModelType::AudioTranscription),
            "audio_speech" => Ok(ModelType::AudioSpeech),
            "moderation" => Ok(ModelType::Moderation),
            "rerank" => Ok(ModelType::Rerank),
            other => Err(format!("unknown model type: {}", other)),
        }
    }
}

/// One entry in the `/v1/models` catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCard {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl ModelCard {
    pub fn new(id: impl Into<String>, owned_by: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: "model".to_string(),
            created: chrono::Utc::now().timestamp(),
            owned_by: owned_by.into(),
        }
    }
}

/// `/v1/models` response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelListResponse {
    pub object: String,
    pub data: Vec<ModelCard>,
}

impl ModelListResponse {
    pub fn new(data: Vec<ModelCard>) -> Self {
        Self {
            object: "list".to_string(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_model_type_roundtrip() {
        for t in [
            ModelType::Chat,
            ModelType::Embedding,
            ModelType::ImageGeneration,
            ModelType::AudioTranscription,
            ModelType::AudioSpeech,
            ModelType::Moderation,
            ModelType::Rerank,
        ] {
            assert_eq!(ModelType::from_str(&t.to_string()).unwrap(), t);
        }
        assert!(ModelType::from_str("videogen").is_err());
    }
}
