/// トリガー操作のエラー型
///
/// ライフサイクル操作はこの型を返すだけで、HTTPレスポンスへの変換は
/// ルーターだけが`status_code()`を使って行う。メッセージはそのままボディになる。
use lambda_http::http::{Method, StatusCode};
use thiserror::Error;

use crate::domain::{NewTriggerError, ScheduleError};
use crate::infrastructure::StoreError;

/// 404のメッセージ
pub const NOT_FOUND_MESSAGE: &str = "The requested URL could not be found";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TriggerError {
    /// 未知のパス、不正なID、存在しないトリガー
    #[error("{}", NOT_FOUND_MESSAGE)]
    NotFound,

    /// パスは既知だがメソッドが許可されていない
    #[error("The requested method is not available. Available methods: {}", allowed_list(.allowed))]
    MethodNotAllowed { allowed: Vec<Method> },

    /// 作成リクエストのボディまたは値が不正
    #[error("{0}")]
    Validation(String),

    /// ストレージ操作の失敗
    #[error("{0}")]
    Store(#[from] StoreError),

    /// 分類できないその他の失敗
    #[error("{0}")]
    Internal(String),
}

impl TriggerError {
    /// 許可メソッドを指定してMethodNotAllowedを作成
    pub fn method_not_allowed(allowed: &[Method]) -> Self {
        Self::MethodNotAllowed {
            allowed: allowed.to_vec(),
        }
    }

    /// エラー種別に対応するHTTPステータスコード
    pub fn status_code(&self) -> StatusCode {
        match self {
            TriggerError::NotFound => StatusCode::NOT_FOUND,
            TriggerError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            TriggerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TriggerError::Store(_) | TriggerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Allowヘッダーの値（MethodNotAllowedのときのみ）
    pub fn allow_header(&self) -> Option<String> {
        match self {
            TriggerError::MethodNotAllowed { allowed } => Some(allowed_list(allowed)),
            _ => None,
        }
    }
}

impl From<NewTriggerError> for TriggerError {
    fn from(err: NewTriggerError) -> Self {
        TriggerError::Validation(err.to_string())
    }
}

impl From<ScheduleError> for TriggerError {
    fn from(err: ScheduleError) -> Self {
        TriggerError::Validation(err.to_string())
    }
}

/// "GET, DELETE"形式のメソッド一覧
fn allowed_list(methods: &[Method]) -> String {
    methods
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
