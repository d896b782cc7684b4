// トリガー作成リクエストの検証
//
// POST /triggers のJSONボディを解析し、作成に必要な値が揃っているかを検証する。
// ここでの失敗はすべて422（ValidationError）としてクライアントに返る。

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// 作成リクエスト検証のエラー型
///
/// メッセージはそのままレスポンスボディになる。
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NewTriggerError {
    /// ボディがJSONとして解析できない、または型が合わない
    #[error("Invalid request body: {0}")]
    InvalidJson(String),

    /// 必須フィールドが欠落
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// hoursBetweenFireが正の整数でない
    #[error("hoursBetweenFire must be a positive integer, got {0}")]
    NonPositiveInterval(i64),

    /// hoursBetweenFireが大きすぎる
    #[error("hoursBetweenFire is too large: {0}")]
    IntervalTooLarge(i64),

    /// fireURLが絶対http(s) URLでない
    #[error("fireURL must be an absolute http or https URL: {0}")]
    InvalidFireUrl(String),
}

/// POST /triggers のボディ（未検証）
#[derive(Debug, Deserialize)]
struct CreateTriggerBody {
    #[serde(rename = "hoursBetweenFire")]
    hours_between_fire: Option<i64>,
    #[serde(rename = "fireURL")]
    fire_url: Option<String>,
    #[serde(rename = "firePayload")]
    fire_payload: Option<String>,
}

/// 検証済みのトリガー作成パラメータ
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrigger {
    /// 発火間隔（時間、1以上）
    pub hours_between_fire: u32,
    /// 発火時にPOSTするURL
    pub fire_url: String,
    /// 発火時に送るボディ（省略時は空文字列）
    pub fire_payload: String,
}

impl NewTrigger {
    /// 値を検証してNewTriggerを作成
    pub fn new(
        hours_between_fire: i64,
        fire_url: impl Into<String>,
        fire_payload: impl Into<String>,
    ) -> Result<Self, NewTriggerError> {
        if hours_between_fire <= 0 {
            return Err(NewTriggerError::NonPositiveInterval(hours_between_fire));
        }
        let hours = u32::try_from(hours_between_fire)
            .map_err(|_| NewTriggerError::IntervalTooLarge(hours_between_fire))?;

        let fire_url = fire_url.into();
        if fire_url.trim().is_empty() {
            return Err(NewTriggerError::MissingField("fireURL"));
        }
        let parsed =
            Url::parse(&fire_url).map_err(|_| NewTriggerError::InvalidFireUrl(fire_url.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(NewTriggerError::InvalidFireUrl(fire_url));
        }

        Ok(Self {
            hours_between_fire: hours,
            fire_url,
            fire_payload: fire_payload.into(),
        })
    }

    /// JSONボディを解析して検証
    ///
    /// # 形式
    /// `{ "hoursBetweenFire": 24, "fireURL": "https://...", "firePayload": "..." }`
    pub fn from_json(body: &[u8]) -> Result<Self, NewTriggerError> {
        let body: CreateTriggerBody = serde_json::from_slice(body)
            .map_err(|e| NewTriggerError::InvalidJson(e.to_string()))?;

        let hours = body
            .hours_between_fire
            .ok_or(NewTriggerError::MissingField("hoursBetweenFire"))?;
        let fire_url = body
            .fire_url
            .ok_or(NewTriggerError::MissingField("fireURL"))?;

        Self::new(hours, fire_url, body.fire_payload.unwrap_or_default())
    }
}
