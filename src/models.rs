// src/models.rs
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Parameters the music-generation worker understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub run_mode: String,
    pub model_type: String,
    pub music_type: String,
    pub start_sequence: Vec<u8>,
    pub length: u32,
    pub temperature: f32,
    pub bpm: u32,
    pub note_duration: f32,
    pub instrument_program: u8,
}

impl GenerationParams {
    pub fn new(music_type: &str, ai_model: &str) -> Self {
        Self {
            run_mode: ai_model.to_string(),
            model_type: ai_model.to_string(),
            music_type: music_type.to_string(),
            // C major arpeggio
            start_sequence: vec![60, 64, 67, 72],
            length: 150,
            temperature: 0.85,
            bpm: 120,
            note_duration: 0.4,
            instrument_program: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicGenerationRequest {
    pub task_id: String,
    pub params: GenerationParams,
}

impl MusicGenerationRequest {
    pub fn new(params: GenerationParams) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            params,
        }
    }
}

/// Status reported by the worker. Statuses other than `completed` and
/// `error` keep their raw string so they re-serialize unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GenerationStatus {
    Completed,
    Error,
    Other(String),
}

impl Default for GenerationStatus {
    fn default() -> Self {
        GenerationStatus::Other(String::new())
    }
}

impl From<String> for GenerationStatus {
    fn from(status: String) -> Self {
        match status.as_str() {
            "completed" => GenerationStatus::Completed,
            "error" => GenerationStatus::Error,
            _ => GenerationStatus::Other(status),
        }
    }
}

impl From<GenerationStatus> for String {
    fn from(status: GenerationStatus) -> Self {
        match status {
            GenerationStatus::Completed => "completed".to_string(),
            GenerationStatus::Error => "error".to_string(),
            GenerationStatus::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicGenerationResponse {
    // Workers may omit either field; an absent status never counts as completed.
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub status: GenerationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mp3_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midi_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_midi_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wav_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_generated: Option<u32>,
}

#[derive(Debug, Error, PartialEq)]
pub enum GenerationFailure {
    #[error("Generation failed: {0}")]
    Failed(String),

    #[error("Generation incomplete or invalid response (status {status:?})")]
    Incomplete { status: GenerationStatus },
}

fn non_empty(url: &Option<String>) -> bool {
    url.as_deref().is_some_and(|u| !u.is_empty())
}

impl MusicGenerationResponse {
    pub fn completed(task_id: &str, mp3_url: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: GenerationStatus::Completed,
            message: None,
            mp3_url: Some(mp3_url.to_string()),
            midi_url: None,
            raw_midi_url: None,
            wav_url: None,
            image_url: None,
            model_used: None,
            length_generated: None,
        }
    }

    /// Accepts only a completed response that points at playable output.
    pub fn into_result(self) -> Result<Self, GenerationFailure> {
        match self.status {
            GenerationStatus::Error => Err(GenerationFailure::Failed(
                self.message.unwrap_or_else(|| "unknown error".to_string()),
            )),
            GenerationStatus::Completed
                if non_empty(&self.mp3_url) || non_empty(&self.midi_url) =>
            {
                Ok(self)
            }
            status => Err(GenerationFailure::Incomplete { status }),
        }
    }
}
