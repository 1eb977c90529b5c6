//! Insight collaborator - financial summaries and receipt field extraction.
//!
//! The generative model is asked for JSON; its answers are cleaned of markdown code
//! fences before parsing. Everything here is best-effort: the report job falls back to
//! [`fallback_insights`] on any failure.

use crate::{
    config::InsightsConfig,
    core::{
        money::{format_amount, parse_amount},
        report::MonthlyStats,
    },
    errors::{Error, Result},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, instrument};

/// Category keys a receipt may be filed under.
pub const RECEIPT_CATEGORIES: &[&str] = &[
    "housing",
    "transportation",
    "groceries",
    "utilities",
    "entertainment",
    "food",
    "shopping",
    "healthcare",
    "education",
    "personal",
    "travel",
    "insurance",
    "gifts",
    "bills",
    "other-expense",
    "salary",
    "freelance",
    "investments",
    "business",
    "other-income",
    "rental",
];

/// Category used when the model suggests something unknown.
pub const DEFAULT_RECEIPT_CATEGORY: &str = "other-expense";

/// Generic insights used when the provider is unavailable.
#[must_use]
pub fn fallback_insights() -> Vec<String> {
    vec![
        "Your highest expense category this month might need attention.".to_string(),
        "Consider setting up a budget for better financial management.".to_string(),
        "Track your recurring expenses to identify potential savings.".to_string(),
    ]
}

/// Fields extracted from a receipt image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptFields {
    /// Total in minor units
    pub amount: i64,
    /// Purchase date, if the model produced a readable one
    pub date: Option<DateTime<Utc>>,
    /// Short summary of the items purchased
    pub description: String,
    /// Merchant or store name
    pub merchant_name: String,
    /// One of [`RECEIPT_CATEGORIES`]
    pub category: String,
}

/// Provider of generated financial text.
#[async_trait]
pub trait Insights: Send + Sync {
    /// Short, actionable observations about one month of activity.
    async fn summarize_finances(&self, stats: &MonthlyStats, month: &str) -> Result<Vec<String>>;

    /// Reads a receipt image. `Ok(None)` means the image is not a receipt.
    async fn extract_receipt_fields(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<Option<ReceiptFields>>;
}

/// Fixed insights; used when no API key is configured.
#[derive(Debug, Clone, Default)]
pub struct FallbackInsights;

#[async_trait]
impl Insights for FallbackInsights {
    async fn summarize_finances(&self, _stats: &MonthlyStats, _month: &str) -> Result<Vec<String>> {
        Ok(fallback_insights())
    }

    async fn extract_receipt_fields(
        &self,
        _image: &[u8],
        _mime_type: &str,
    ) -> Result<Option<ReceiptFields>> {
        Err(Error::Insights {
            message: "Receipt scanning requires GEMINI_API_KEY".to_string(),
        })
    }
}

/// Google Generative Language API client.
#[derive(Debug, Clone)]
pub struct GeminiInsights {
    client: reqwest::Client,
    api_key: String,
    url: String,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn text(self) -> Option<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect();
        (!text.is_empty()).then_some(text)
    }
}

impl GeminiInsights {
    /// Creates a client for the configured model using the shared HTTP client.
    #[must_use]
    pub fn new(client: reqwest::Client, api_key: String, config: &InsightsConfig) -> Self {
        Self {
            client,
            api_key,
            url: format!(
                "{}/models/{}:generateContent",
                config.endpoint.trim_end_matches('/'),
                config.model
            ),
        }
    }

    async fn generate(&self, parts: Vec<Part>) -> Result<String> {
        let request = GenerateContentRequest {
            contents: vec![Content { parts }],
        };

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Insights {
                message: format!("Model API returned {status}: {body}"),
            });
        }

        response
            .json::<GenerateContentResponse>()
            .await?
            .text()
            .ok_or_else(|| Error::Insights {
                message: "Model returned no text".to_string(),
            })
    }
}

#[async_trait]
impl Insights for GeminiInsights {
    #[instrument(skip(self, stats))]
    async fn summarize_finances(&self, stats: &MonthlyStats, month: &str) -> Result<Vec<String>> {
        let text = self
            .generate(vec![Part::Text {
                text: summary_prompt(stats, month),
            }])
            .await?;
        parse_insights_response(&text)
    }

    #[instrument(skip(self, image), fields(bytes = image.len()))]
    async fn extract_receipt_fields(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<Option<ReceiptFields>> {
        let text = self
            .generate(vec![
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: mime_type.to_string(),
                        data: STANDARD.encode(image),
                    },
                },
                Part::Text {
                    text: receipt_prompt(),
                },
            ])
            .await?;
        parse_receipt_response(&text)
    }
}

fn summary_prompt(stats: &MonthlyStats, month: &str) -> String {
    let categories = stats
        .by_category
        .iter()
        .map(|(category, amount)| format!("{category}: {}", format_amount(*amount)))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Analyze this financial data and provide 3 concise, actionable insights.\n\
         Focus on spending patterns and practical advice.\n\
         Keep it friendly and conversational.\n\n\
         Financial Data for {month}:\n\
         - Total Income: {}\n\
         - Total Expenses: {}\n\
         - Net Income: {}\n\
         - Expense Categories: {categories}\n\n\
         Format the response as a JSON array of strings, like this:\n\
         [\"insight 1\", \"insight 2\", \"insight 3\"]",
        format_amount(stats.total_income),
        format_amount(stats.total_expenses),
        format_amount(stats.net_income()),
    )
}

fn receipt_prompt() -> String {
    format!(
        "Analyze this receipt image and extract the following information in JSON format:\n\
         - Total amount (just the number)\n\
         - Date (in ISO format)\n\
         - Description or items purchased (brief summary)\n\
         - Merchant/store name\n\
         - Suggested category (one of: {})\n\n\
         Only respond with valid JSON in this exact format:\n\
         {{\"amount\": number, \"date\": \"ISO date string\", \"description\": \"string\", \
         \"merchantName\": \"string\", \"category\": \"string\"}}\n\n\
         If it is not a receipt, return an empty object",
        RECEIPT_CATEGORIES.join(",")
    )
}

/// Removes markdown code fences (```` ``` ```` and ```` ```json ````) around model output.
#[must_use]
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .trim_end()
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Parses a JSON array of insight strings.
pub fn parse_insights_response(text: &str) -> Result<Vec<String>> {
    let insights: Vec<String> =
        serde_json::from_str(strip_code_fences(text)).map_err(|e| Error::Insights {
            message: format!("Invalid insights format: {e}"),
        })?;

    if insights.is_empty() {
        return Err(Error::Insights {
            message: "Model returned no insights".to_string(),
        });
    }
    Ok(insights)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    amount: Option<serde_json::Value>,
    date: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    merchant_name: String,
    category: Option<String>,
}

/// Parses the model's receipt answer. An empty object means "not a receipt".
pub fn parse_receipt_response(text: &str) -> Result<Option<ReceiptFields>> {
    let value: serde_json::Value =
        serde_json::from_str(strip_code_fences(text)).map_err(|e| Error::Insights {
            message: format!("Invalid receipt format: {e}"),
        })?;

    if value.as_object().is_some_and(serde_json::Map::is_empty) {
        debug!("Image is not a receipt");
        return Ok(None);
    }

    let raw: RawReceipt = serde_json::from_value(value)?;
    let amount = raw
        .amount
        .as_ref()
        .and_then(receipt_amount)
        .ok_or_else(|| Error::Insights {
            message: "Receipt has no readable amount".to_string(),
        })?;

    let category = raw
        .category
        .map(|c| c.trim().to_lowercase())
        .filter(|c| RECEIPT_CATEGORIES.contains(&c.as_str()))
        .unwrap_or_else(|| DEFAULT_RECEIPT_CATEGORY.to_string());

    Ok(Some(ReceiptFields {
        amount,
        date: raw.date.as_deref().and_then(parse_receipt_date),
        description: raw.description,
        merchant_name: raw.merchant_name,
        category,
    }))
}

/// Image MIME type guessed from a file extension.
#[must_use]
pub fn image_mime_type(path: &std::path::Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

fn receipt_amount(value: &serde_json::Value) -> Option<i64> {
    let text = match value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().trim_start_matches('$').to_string(),
        _ => return None,
    };
    let rounded = Decimal::from_str(&text).ok()?.round_dp(2);
    parse_amount(&rounded.to_string()).ok()
}

fn parse_receipt_date(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| d.and_utc())
        })
}
