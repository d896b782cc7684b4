// CallbackClient - 発火コールバック用HTTPクライアント
//
// due済みトリガーのfireURLへ、firePayloadをそのままボディにして1回だけPOSTする。
// 再試行はしない（失敗したトリガーも削除され、次回以降は発火しない）。

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// 接続タイムアウト（秒）
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// コールバック発火のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CallbackError {
    /// 2xx以外のレスポンス
    #[error("Callback returned HTTP {status}")]
    HttpStatus {
        /// HTTPステータスコード
        status: u16,
    },

    /// タイムアウト（スイープの残り時間切れを含む）
    #[error("Callback timed out")]
    Timeout,

    /// 接続エラー・不正なURLなど
    #[error("Network error: {0}")]
    NetworkError(String),
}

/// コールバック送信用トレイト
///
/// 実際のHTTPクライアントとテスト用モックを差し替えられるようにする。
#[async_trait]
pub trait CallbackClient: Send + Sync {
    /// `url`へ`payload`をボディとしてPOSTする
    ///
    /// # 戻り値
    /// * 2xxの場合は`Ok(ステータスコード)`
    /// * それ以外は`Err(CallbackError)`
    async fn fire(&self, url: &str, payload: &str, timeout: Duration) -> Result<u16, CallbackError>;
}

/// reqwestによるCallbackClient実装
#[derive(Debug, Clone)]
pub struct ReqwestCallbackClient {
    client: Client,
}

impl ReqwestCallbackClient {
    /// 新しいReqwestCallbackClientを作成
    pub fn new() -> Result<Self, CallbackError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| CallbackError::NetworkError(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackClient for ReqwestCallbackClient {
    #[instrument(skip(self, payload), fields(payload_len = payload.len()))]
    async fn fire(&self, url: &str, payload: &str, timeout: Duration) -> Result<u16, CallbackError> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .body(payload.to_string())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallbackError::Timeout
                } else {
                    CallbackError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        debug!(status = %status, "コールバックのレスポンスを受信");

        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(CallbackError::HttpStatus {
                status: status.as_u16(),
            })
        }
    }
}
