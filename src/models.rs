// src/models.rs
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{ErrorKind, InferenceError};

/// Identifies one analyze-then-generate cycle. Strictly increasing per orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresentationTag {
    Male,
    Female,
    NonBinary,
    Unknown,
}

impl PresentationTag {
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "male" | "man" | "masculine" => PresentationTag::Male,
            "female" | "woman" | "feminine" => PresentationTag::Female,
            s if s.contains("non-binary") || s.contains("nonbinary") || s.contains("androgynous") => {
                PresentationTag::NonBinary
            }
            _ => PresentationTag::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedItem {
    pub category: String,
    pub description: String,
    pub rationale: String,
    pub colors: Option<String>,
    pub material_and_pattern: Option<String>,
}

impl RecommendedItem {
    /// Text handed to the image generator: description, then colors, then material.
    pub fn generation_description(&self) -> String {
        let mut text = self.description.clone();
        for extra in [&self.colors, &self.material_and_pattern].into_iter().flatten() {
            text.push_str(", ");
            text.push_str(extra);
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    pub presentation: PresentationTag,
    pub items: Vec<RecommendedItem>,
    pub tips: Vec<String>,
}

/// Reference to a generated image: a `data:` URI or a remote URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn embedded(mime: &str, data: &[u8]) -> Self {
        Self(format!(
            "data:{};base64,{}",
            mime,
            general_purpose::STANDARD.encode(data)
        ))
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_embedded(&self) -> bool {
        self.0.starts_with("data:")
    }

    pub fn mime(&self) -> Option<&str> {
        let rest = self.0.strip_prefix("data:")?;
        rest.split_once(';').map(|(mime, _)| mime)
    }

    pub fn decode_embedded(&self) -> Option<Vec<u8>> {
        let rest = self.0.strip_prefix("data:")?;
        let (_, payload) = rest.split_once(";base64,")?;
        general_purpose::STANDARD.decode(payload).ok()
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_embedded() {
            write!(f, "<embedded {} image>", self.mime().unwrap_or("unknown"))
        } else {
            f.write_str(&self.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Pending,
    Succeeded { image_ref: ImageRef },
    Failed { kind: ErrorKind, detail: String },
}

impl GenerationOutcome {
    pub fn failed(err: &InferenceError) -> Self {
        GenerationOutcome::Failed {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, GenerationOutcome::Pending)
    }

    pub fn image_ref(&self) -> Option<&ImageRef> {
        match self {
            GenerationOutcome::Succeeded { image_ref } => Some(image_ref),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Analyzing,
    AnalysisFailed {
        kind: ErrorKind,
        status: Option<u16>,
        message: String,
    },
    Synthesizing,
    Completed,
    PartiallyCompleted,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::AnalysisFailed { .. }
                | SessionPhase::Completed
                | SessionPhase::PartiallyCompleted
        )
    }
}

/// Read model handed to the presentation layer.
///
/// `completed` and `failed` count resolved outcomes; their sum plus the pending
/// count always equals `outcomes.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Option<SessionId>,
    pub phase: SessionPhase,
    pub analysis: Option<AnalysisResult>,
    pub outcomes: Vec<GenerationOutcome>,
    #[serde(default)]
    pub completed: usize,
    #[serde(default)]
    pub failed: usize,
}

impl SessionSnapshot {
    pub fn idle() -> Self {
        Self {
            session_id: None,
            phase: SessionPhase::Idle,
            analysis: None,
            outcomes: Vec::new(),
            completed: 0,
            failed: 0,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_pending()).count()
    }
}

/// Pushed to subscribers on every state change of the active session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Started {
        session_id: SessionId,
    },
    AnalysisFailed {
        session_id: SessionId,
        kind: ErrorKind,
    },
    Seeded {
        session_id: SessionId,
        items: usize,
    },
    ItemResolved {
        session_id: SessionId,
        index: usize,
        outcome: GenerationOutcome,
    },
    Finished {
        session_id: SessionId,
        phase: SessionPhase,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteEntry {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "imageUrl")]
    pub image_ref: ImageRef,
    pub category: String,
    pub description: String,
    pub rationale: String,
    #[serde(default)]
    pub colors: Option<String>,
    #[serde(default)]
    pub material_and_pattern: Option<String>,
    #[serde(default = "Utc::now")]
    pub saved_at: DateTime<Utc>,
}

impl FavoriteEntry {
    /// Entry for a completed item; the id is assigned when it is stored.
    pub fn from_outcome(item: &RecommendedItem, image_ref: ImageRef) -> Self {
        Self {
            id: String::new(),
            image_ref,
            category: item.category.clone(),
            description: item.description.clone(),
            rationale: item.rationale.clone(),
            colors: item.colors.clone(),
            material_and_pattern: item.material_and_pattern.clone(),
            saved_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(colors: Option<&str>, material: Option<&str>) -> RecommendedItem {
        RecommendedItem {
            category: "Top".to_string(),
            description: "Slim-fit oxford shirt".to_string(),
            rationale: "Defines the shoulders".to_string(),
            colors: colors.map(String::from),
            material_and_pattern: material.map(String::from),
        }
    }

    #[test]
    fn test_generation_description_appends_optionals() {
        assert_eq!(item(None, None).generation_description(), "Slim-fit oxford shirt");
        assert_eq!(
            item(Some("navy"), Some("cotton twill")).generation_description(),
            "Slim-fit oxford shirt, navy, cotton twill"
        );
        assert_eq!(
            item(None, Some("linen")).generation_description(),
            "Slim-fit oxford shirt, linen"
        );
    }

    #[test]
    fn test_presentation_labels() {
        assert_eq!(PresentationTag::from_label("Male"), PresentationTag::Male);
        assert_eq!(PresentationTag::from_label(" female "), PresentationTag::Female);
        assert_eq!(
            PresentationTag::from_label("Non-binary/Androgynous"),
            PresentationTag::NonBinary
        );
        assert_eq!(PresentationTag::from_label(""), PresentationTag::Unknown);
    }

    #[test]
    fn test_embedded_image_ref() {
        let image_ref = ImageRef::embedded("image/jpeg", &[0xFF, 0xD8, 0xFF]);
        assert!(image_ref.is_embedded());
        assert_eq!(image_ref.mime(), Some("image/jpeg"));
        assert_eq!(image_ref.decode_embedded(), Some(vec![0xFF, 0xD8, 0xFF]));

        let remote = ImageRef::remote("https://cdn.example.com/a.jpg");
        assert!(!remote.is_embedded());
        assert_eq!(remote.decode_embedded(), None);
    }

    #[test]
    fn test_favorite_entry_reads_stored_json() {
        let stored = r#"{"id":"1700000000000","imageUrl":"data:image/png;base64,AA==",
            "category":"Shoes","description":"Loafers","rationale":"Elongates the leg",
            "savedAt":"2024-05-01T10:00:00Z"}"#;
        let entry: FavoriteEntry = serde_json::from_str(stored).unwrap();
        assert_eq!(entry.id, "1700000000000");
        assert_eq!(entry.colors, None);
        assert_eq!(entry.image_ref.mime(), Some("image/png"));
    }
}
