// src/services/analysis_client.rs
use crate::config::AnalysisConfig;
use crate::errors::{InferenceError, excerpt};
use crate::models::{AnalysisResult, PresentationTag, RecommendedItem};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use log::{debug, info, warn};
use reqwest::Client;
use serde_json::{Value, json};

const ERROR_EXCERPT_CHARS: usize = 200;

const SYSTEM_PROMPT: &str = r#"
You are 'Style Morph AI', a professional personal stylist. You receive a full-body
photo of a person. Assess body shape, proportions, build, vertical line, overall
coloring and skin tone, and the person's gender presentation.

First decide whether the whole body is visible. If it is not, say so in the summary
and keep recommendations general.

Recommend concrete clothing, footwear and accessories that flatter the figure and fit
the gender presentation. Describe each item precisely enough to be rendered by an
image generator: cut, fabric, pattern and notable design details. Explain briefly why
each item suits the analysed body. Add short, practical styling tips.

Respond with a single JSON object:
{
    "bodyAnalysisSummary": "analysis text, stating whether the whole body was visible",
    "genderPresentation": "Male | Female | Non-binary/Androgynous",
    "styleRecommendations": [
        {
            "itemType": "Top | Bottoms | Dress | Outerwear | Accessory | Shoes",
            "itemDescription": "detailed item description for image generation",
            "stylingRationale": "why the item suits this body",
            "potentialColors": "suggested colors (optional)",
            "materialAndPattern": "suggested material and pattern (optional)"
        }
    ],
    "generalStylingTips": ["tip", "tip"]
}
"#;

const USER_PROMPT: &str = "Analyze this full-body image. Respond ONLY with a valid JSON object \
containing bodyAnalysisSummary (string), genderPresentation (string), styleRecommendations \
(array) and generalStylingTips (array). Do NOT use markdown formatting or code blocks.";

/// Turns a photo into structured style recommendations.
#[async_trait]
pub trait StyleAnalyzer: Send + Sync {
    async fn analyze(&self, image_data: &[u8]) -> Result<AnalysisResult, InferenceError>;
}

/// OpenAI-compatible chat-completions client (OpenRouter by default). Never retries.
pub struct OpenRouterAnalyzer {
    config: AnalysisConfig,
    client: Client,
}

impl OpenRouterAnalyzer {
    pub fn new(config: AnalysisConfig) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| InferenceError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn request_body(&self, image_data: &[u8]) -> Value {
        let base64_image = general_purpose::STANDARD.encode(image_data);

        json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": USER_PROMPT },
                        {
                            "type": "image_url",
                            "image_url": {
                                "url": format!("data:image/jpeg;base64,{}", base64_image)
                            }
                        }
                    ]
                }
            ],
            "max_tokens": 2500,
            "temperature": 0.2,
            "response_format": { "type": "json_object" }
        })
    }
}

#[async_trait]
impl StyleAnalyzer for OpenRouterAnalyzer {
    async fn analyze(&self, image_data: &[u8]) -> Result<AnalysisResult, InferenceError> {
        info!(
            "Sending {} byte photo to {} for style analysis",
            image_data.len(),
            self.config.model
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("HTTP-Referer", "http://localhost")
            .header("X-Title", "StyleMorph")
            .json(&self.request_body(image_data))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout {
                        status: None,
                        message: format!("Analysis request timed out: {}", e),
                    }
                } else {
                    InferenceError::Transport(format!("Analysis request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| InferenceError::Transport(format!("Failed to read analysis response: {}", e)))?;

        if !status.is_success() {
            warn!("Analysis endpoint returned {}", status);
            return Err(InferenceError::Remote {
                status: status.as_u16(),
                message: remote_message(&body),
            });
        }

        let envelope: Value = serde_json::from_str(&body)
            .map_err(|e| InferenceError::Parse(format!("Failed to parse analysis response: {}", e)))?;

        let content = envelope["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| InferenceError::Parse("No content in analysis response".to_string()))?;

        debug!("Raw analysis content: {}", excerpt(content, 500));

        let result = parse_analysis_content(content)?;
        info!(
            "Analysis complete: {} recommendations, {} tips",
            result.items.len(),
            result.tips.len()
        );
        Ok(result)
    }
}

/// Best human-readable message in an error body.
fn remote_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let error = &value["error"];
        if let Some(msg) = error["message"].as_str().or_else(|| error.as_str()) {
            return msg.to_string();
        }
        if let Some(msg) = value["message"].as_str() {
            return msg.to_string();
        }
    }
    if body.trim().is_empty() {
        "Unknown error".to_string()
    } else {
        excerpt(body.trim(), ERROR_EXCERPT_CHARS)
    }
}

fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Decodes and validates the model's JSON answer.
pub fn parse_analysis_content(content: &str) -> Result<AnalysisResult, InferenceError> {
    let data: Value = serde_json::from_str(strip_code_fences(content))
        .map_err(|e| InferenceError::Parse(format!("Failed to parse analysis JSON: {}", e)))?;

    if !data.is_object() {
        return Err(InferenceError::Validation(
            "Analysis response is not a JSON object".to_string(),
        ));
    }

    let summary = data["bodyAnalysisSummary"]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| InferenceError::Validation("Missing bodyAnalysisSummary".to_string()))?
        .to_string();

    let items = data["styleRecommendations"]
        .as_array()
        .ok_or_else(|| {
            InferenceError::Validation("Missing styleRecommendations array".to_string())
        })?
        .iter()
        .enumerate()
        .map(|(index, r)| parse_item(index, r))
        .collect::<Result<Vec<_>, _>>()?;

    let tips = data["generalStylingTips"]
        .as_array()
        .ok_or_else(|| InferenceError::Validation("Missing generalStylingTips array".to_string()))?
        .iter()
        .filter_map(|t| t.as_str().map(|s| s.to_string()))
        .collect();

    Ok(AnalysisResult {
        summary,
        presentation: PresentationTag::from_label(
            data["genderPresentation"].as_str().unwrap_or_default(),
        ),
        items,
        tips,
    })
}

fn parse_item(index: usize, r: &Value) -> Result<RecommendedItem, InferenceError> {
    let optional = |key: &str| {
        r[key]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    };

    let description = optional("itemDescription").ok_or_else(|| {
        InferenceError::Validation(format!(
            "styleRecommendations[{}] is missing itemDescription",
            index
        ))
    })?;

    Ok(RecommendedItem {
        category: r["itemType"].as_str().unwrap_or("").to_string(),
        description,
        rationale: r["stylingRationale"].as_str().unwrap_or("").to_string(),
        colors: optional("potentialColors"),
        material_and_pattern: optional("materialAndPattern"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "bodyAnalysisSummary": "Whole body visible. Rectangle shape, tall frame.",
        "genderPresentation": "Female",
        "styleRecommendations": [
            {
                "itemType": "Dress",
                "itemDescription": "Wrap dress with a defined waist",
                "stylingRationale": "Creates curves at the waist",
                "potentialColors": "emerald green",
                "materialAndPattern": ""
            }
        ],
        "generalStylingTips": ["Use belts to define the waist"]
    }"#;

    #[test]
    fn test_parse_valid_content() {
        let result = parse_analysis_content(VALID).unwrap();
        assert_eq!(result.presentation, PresentationTag::Female);
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].category, "Dress");
        assert_eq!(result.items[0].colors.as_deref(), Some("emerald green"));
        assert_eq!(result.items[0].material_and_pattern, None);
        assert_eq!(result.tips, vec!["Use belts to define the waist"]);
    }

    #[test]
    fn test_code_fences_are_stripped() {
        let fenced = format!("```json\n{}\n```", VALID);
        assert!(parse_analysis_content(&fenced).is_ok());
        let bare = format!("```\n{}\n```", VALID);
        assert!(parse_analysis_content(&bare).is_ok());
    }

    #[test]
    fn test_non_json_is_parse_error() {
        let err = parse_analysis_content("I'm sorry, I can't help with that.").unwrap_err();
        assert!(matches!(err, InferenceError::Parse(_)));
    }

    #[test]
    fn test_missing_fields_are_validation_errors() {
        let no_tips = r#"{"bodyAnalysisSummary": "x", "styleRecommendations": []}"#;
        assert!(matches!(
            parse_analysis_content(no_tips),
            Err(InferenceError::Validation(msg)) if msg.contains("generalStylingTips")
        ));

        let items_not_array = r#"{"bodyAnalysisSummary": "x",
            "styleRecommendations": {}, "generalStylingTips": []}"#;
        assert!(matches!(
            parse_analysis_content(items_not_array),
            Err(InferenceError::Validation(_))
        ));

        let no_summary = r#"{"styleRecommendations": [], "generalStylingTips": []}"#;
        assert!(matches!(
            parse_analysis_content(no_summary),
            Err(InferenceError::Validation(_))
        ));

        assert!(matches!(
            parse_analysis_content("[1, 2]"),
            Err(InferenceError::Validation(_))
        ));
    }

    #[test]
    fn test_remote_message_extraction() {
        assert_eq!(
            remote_message(r#"{"error": {"message": "Rate limit exceeded", "code": 429}}"#),
            "Rate limit exceeded"
        );
        assert_eq!(remote_message(r#"{"error": "Model is loading"}"#), "Model is loading");
        assert_eq!(remote_message(""), "Unknown error");
        assert_eq!(remote_message("<html>bad gateway</html>"), "<html>bad gateway</html>");
    }
}
