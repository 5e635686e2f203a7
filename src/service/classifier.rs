//! AI 分类服务客户端
//!
//! 只在缓存未命中时调用。服务不可靠：可能超时、返回格式错误或直接失败，
//! 调用方把任何失败都当作 "待人工分类" 处理。

use crate::config::ClassifierConfig;
use crate::error::ClassificationServiceError;
use crate::models::CategoryPath;
use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

/// 分类请求
#[derive(Debug, Clone, Serialize)]
pub struct ClassifyRequest {
    pub product_code: String,
    pub description: String,
    pub quantity: BigDecimal,
    pub unit_code: Option<String>,
}

/// AI 给出的建议分类 (未经人工审核)
#[derive(Debug, Clone, PartialEq)]
pub struct AiSuggestion {
    pub category: CategoryPath,
    pub confidence: f64,
    pub standardized_unit: Option<String>,
    pub conversion_factor: Option<BigDecimal>,
}

/// 外部分类器接口
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, request: &ClassifyRequest)
        -> Result<AiSuggestion, ClassificationServiceError>;
}

/// HTTP JSON 分类器客户端
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    http_client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Serialize)]
struct HttpClassifyBody<'a> {
    model: &'a str,
    #[serde(flatten)]
    request: &'a ClassifyRequest,
}

impl HttpClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ClassificationServiceError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(
        &self,
        request: &ClassifyRequest,
    ) -> Result<AiSuggestion, ClassificationServiceError> {
        let mut builder = self.http_client.post(&self.endpoint).json(&HttpClassifyBody {
            model: &self.model,
            request,
        });
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClassificationServiceError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        parse_suggestion(&body)
    }
}

/// 去掉 markdown 代码块包裹
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn required_str(obj: &Value, field: &str) -> Result<String, ClassificationServiceError> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ClassificationServiceError::Malformed(format!("missing field '{}'", field)))
}

/// 数字或数字字符串 → BigDecimal；非数字视为缺失
fn decimal_field(obj: &Value, field: &str) -> Option<BigDecimal> {
    let raw = match obj.get(field)? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    BigDecimal::from_str(&raw).ok()
}

/// 解析并清洗分类器响应
///
/// - 置信度截断到 [0, 1]，缺失/非数字按 0.5
/// - 每包数量/换算系数 <= 0 或非数字视为缺失 (由单位引擎标记待审核)
/// - 兼容 `{"text": "<json>"}` 包裹和 markdown 代码块
pub fn parse_suggestion(body: &str) -> Result<AiSuggestion, ClassificationServiceError> {
    let mut value: Value = serde_json::from_str(strip_code_fence(body))
        .map_err(|e| ClassificationServiceError::Malformed(e.to_string()))?;

    if let Some(inner) = value.get("text").and_then(Value::as_str) {
        value = serde_json::from_str(strip_code_fence(inner))
            .map_err(|e| ClassificationServiceError::Malformed(e.to_string()))?;
    }
    if !value.is_object() {
        return Err(ClassificationServiceError::Malformed(
            "response is not a JSON object".to_string(),
        ));
    }

    let category = CategoryPath::new(
        required_str(&value, "category")?,
        required_str(&value, "subcategory")?,
        required_str(&value, "sub_sub_category")
            .or_else(|_| required_str(&value, "sub_subcategory"))?,
    );

    let confidence = match value.get("confidence") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|c| c.is_finite())
    .unwrap_or(0.5)
    .clamp(0.0, 1.0);

    let standardized_unit = value
        .get("standardized_unit")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let conversion_factor = decimal_field(&value, "conversion_factor")
        .or_else(|| decimal_field(&value, "units_per_package"))
        .filter(|f| *f > BigDecimal::zero());

    Ok(AiSuggestion {
        category,
        confidence,
        standardized_unit,
        conversion_factor,
    })
}
