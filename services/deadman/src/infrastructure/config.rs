/// デッドマンスイッチの実行設定
///
/// 環境変数から一度だけ読み込み、ルーターとディスパッチャーに明示的に渡す。
use aws_sdk_dynamodb::Client as DynamoDbClient;
use std::time::Duration;
use thiserror::Error;

use crate::infrastructure::DynamoTriggerRepository;

/// 環境変数名: トリガーテーブル名
pub const ENV_TRIGGERS_TABLE: &str = "TRIGGERS_TABLE";

/// 環境変数名: Locationヘッダーに使う公開ベースURL
pub const ENV_PUBLIC_BASE_URL: &str = "PUBLIC_BASE_URL";

/// 環境変数名: コールバック1件あたりのタイムアウト（秒）
pub const ENV_CALLBACK_TIMEOUT_SECS: &str = "CALLBACK_TIMEOUT_SECS";

/// コールバックタイムアウトのデフォルト値（秒）
pub const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 30;

/// 設定読み込みのエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

/// デッドマンスイッチ設定
#[derive(Debug, Clone, PartialEq)]
pub struct DeadmanConfig {
    /// トリガーテーブル名
    triggers_table: String,
    /// 公開ベースURL（末尾スラッシュなし）。未設定ならLocationは相対パス
    public_base_url: Option<String>,
    /// コールバック1件あたりのタイムアウト
    callback_timeout: Duration,
}

impl DeadmanConfig {
    /// 環境変数から設定を読み込み
    ///
    /// 環境変数:
    /// - TRIGGERS_TABLE: トリガー用DynamoDBテーブル名（必須）
    /// - PUBLIC_BASE_URL: 公開ベースURL（任意）
    /// - CALLBACK_TIMEOUT_SECS: コールバックタイムアウト秒（任意、デフォルト30）
    pub fn from_env() -> Result<Self, ConfigError> {
        let triggers_table = std::env::var(ENV_TRIGGERS_TABLE)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(ENV_TRIGGERS_TABLE.to_string()))?;

        let public_base_url = std::env::var(ENV_PUBLIC_BASE_URL)
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());

        let callback_timeout_secs = match std::env::var(ENV_CALLBACK_TIMEOUT_SECS) {
            Ok(value) => value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    name: ENV_CALLBACK_TIMEOUT_SECS.to_string(),
                    value,
                })?,
            Err(_) => DEFAULT_CALLBACK_TIMEOUT_SECS,
        };

        Ok(Self {
            triggers_table,
            public_base_url,
            callback_timeout: Duration::from_secs(callback_timeout_secs),
        })
    }

    /// 明示的な値で設定を作成（テスト用）
    pub fn new(
        triggers_table: impl Into<String>,
        public_base_url: Option<String>,
        callback_timeout: Duration,
    ) -> Self {
        Self {
            triggers_table: triggers_table.into(),
            public_base_url,
            callback_timeout,
        }
    }

    /// 環境からAWS設定を読み込み、DynamoDBクライアントを作成
    pub async fn dynamodb_client(&self) -> DynamoDbClient {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        DynamoDbClient::new(&aws_config)
    }

    /// 設定されたテーブルを使うトリガーリポジトリを作成
    pub async fn trigger_repository(&self) -> DynamoTriggerRepository {
        DynamoTriggerRepository::new(self.dynamodb_client().await, self.triggers_table.clone())
    }

    pub fn triggers_table(&self) -> &str {
        &self.triggers_table
    }

    pub fn public_base_url(&self) -> Option<&str> {
        self.public_base_url.as_deref()
    }

    pub fn callback_timeout(&self) -> Duration {
        self.callback_timeout
    }
}
