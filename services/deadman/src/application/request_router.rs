// トリガーAPIのリクエストルーター
//
// (メソッド, パス)をライフサイクル操作に対応付け、結果をHTTPレスポンスに変換する。
// 型付きエラーをステータスコードに変換するのはこのモジュールだけ。
//
// | パス                      | メソッド | 操作     | 成功レスポンス |
// |---------------------------|----------|----------|----------------|
// | /triggers                 | POST     | 作成     | 307 + Location |
// | /triggers/{id}            | GET      | 取得     | 200 + JSON     |
// | /triggers/{id}            | DELETE   | 削除     | 204            |
// | /triggers/{id}/checkin    | POST     | チェックイン | 200 + JSON |

use lambda_http::http::header::{
    HeaderValue, ALLOW, CONTENT_LENGTH, CONTENT_TYPE, LOCATION,
};
use lambda_http::http::{Method, StatusCode};
use lambda_http::{Body, Request, Response};
use tracing::{error, info, warn};

use crate::application::{TriggerError, TriggerService};
use crate::domain::{Clock, NewTrigger, SystemClock, Trigger, TriggerId};
use crate::infrastructure::TriggerRepository;

/// トリガーコレクションのパスセグメント
pub const COLLECTION_SEGMENT: &str = "triggers";

/// チェックインのパスセグメント
pub const CHECKIN_SEGMENT: &str = "checkin";

/// エラーレスポンスのContent-Type
const TEXT_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

/// 解決済みのルート
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Create,
    Get(TriggerId),
    Delete(TriggerId),
    CheckIn(TriggerId),
}

impl Route {
    /// メソッドとパスからルートを解決
    ///
    /// IDとして解析できないセグメントは、存在しないIDと区別せず`NotFound`にする。
    pub fn resolve(method: &Method, path: &str) -> Result<Self, TriggerError> {
        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() < 2 || !segments[0].is_empty() || segments[1] != COLLECTION_SEGMENT {
            return Err(TriggerError::NotFound);
        }

        match segments.as_slice() {
            [_, _] => match *method {
                Method::POST => Ok(Route::Create),
                _ => Err(TriggerError::method_not_allowed(&[Method::POST])),
            },
            [_, _, id] => {
                let id = Self::parse_id(id)?;
                match *method {
                    Method::GET => Ok(Route::Get(id)),
                    Method::DELETE => Ok(Route::Delete(id)),
                    _ => Err(TriggerError::method_not_allowed(&[Method::GET, Method::DELETE])),
                }
            }
            [_, _, id, action] if *action == CHECKIN_SEGMENT => {
                let id = Self::parse_id(id)?;
                match *method {
                    Method::POST => Ok(Route::CheckIn(id)),
                    _ => Err(TriggerError::method_not_allowed(&[Method::POST])),
                }
            }
            _ => Err(TriggerError::NotFound),
        }
    }

    fn parse_id(segment: &str) -> Result<TriggerId, TriggerError> {
        segment.parse().map_err(|e| {
            info!(segment = segment, error = %e, "IDとして解析できないパスセグメント");
            TriggerError::NotFound
        })
    }
}

/// トリガーAPIのルーター
pub struct RequestRouter<R, C = SystemClock>
where
    R: TriggerRepository,
    C: Clock,
{
    /// ライフサイクル操作
    service: TriggerService<R, C>,
    /// Locationヘッダーに使う公開ベースURL（末尾スラッシュなし）
    base_url: Option<String>,
}

impl<R, C> RequestRouter<R, C>
where
    R: TriggerRepository,
    C: Clock,
{
    /// 新しいルーターを作成
    pub fn new(service: TriggerService<R, C>, base_url: Option<String>) -> Self {
        Self { service, base_url }
    }

    /// HTTPリクエストを処理してレスポンスを返す
    ///
    /// エラーはすべてここでテキストレスポンスに変換するため、常にレスポンスを返す。
    pub async fn handle(&self, request: Request) -> Response<Body> {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        let response = match self.dispatch(&request).await {
            Ok(response) => response,
            Err(err) => {
                let status = err.status_code();
                if status.is_server_error() {
                    error!(method = %method, path = %path, error = %err, "リクエスト処理に失敗");
                } else {
                    warn!(method = %method, path = %path, status = status.as_u16(), error = %err, "リクエストを拒否");
                }
                Self::error_response(&err)
            }
        };

        info!(method = %method, path = %path, status = response.status().as_u16(), "リクエスト処理完了");
        response
    }

    async fn dispatch(&self, request: &Request) -> Result<Response<Body>, TriggerError> {
        match Route::resolve(request.method(), request.uri().path())? {
            Route::Create => {
                let new_trigger = NewTrigger::from_json(request.body().as_ref())?;
                let trigger = self.service.create(new_trigger).await?;
                self.redirect_response(&trigger)
            }
            Route::Get(id) => Self::json_response(&self.service.get(id).await?),
            Route::Delete(id) => {
                self.service.delete(id).await?;
                Self::empty_response(StatusCode::NO_CONTENT, None)
            }
            Route::CheckIn(id) => Self::json_response(&self.service.check_in(id).await?),
        }
    }

    /// 作成したトリガーへの307リダイレクト
    fn redirect_response(&self, trigger: &Trigger) -> Result<Response<Body>, TriggerError> {
        let location = format!(
            "{}/{}/{}",
            self.base_url.as_deref().unwrap_or(""),
            COLLECTION_SEGMENT,
            trigger.id()
        );
        Self::empty_response(StatusCode::TEMPORARY_REDIRECT, Some(location))
    }

    fn empty_response(
        status: StatusCode,
        location: Option<String>,
    ) -> Result<Response<Body>, TriggerError> {
        let mut builder = Response::builder().status(status);
        if let Some(location) = location {
            builder = builder.header(LOCATION, location);
        }
        builder
            .body(Body::Empty)
            .map_err(|e| TriggerError::Internal(e.to_string()))
    }

    /// トリガーをJSONで返す200レスポンス
    fn json_response(trigger: &Trigger) -> Result<Response<Body>, TriggerError> {
        let json =
            serde_json::to_string(trigger).map_err(|e| TriggerError::Internal(e.to_string()))?;

        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::Text(json))
            .map_err(|e| TriggerError::Internal(e.to_string()))
    }

    /// プレーンテキストのエラーレスポンス
    ///
    /// Content-Lengthはボディのバイト数と一致させる。405ではAllowヘッダーも付ける。
    pub fn error_response(err: &TriggerError) -> Response<Body> {
        let message = err.to_string();
        let length = message.len();

        let mut response = Response::new(Body::Text(message));
        *response.status_mut() = err.status_code();

        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_CONTENT_TYPE));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        if let Some(allow) = err.allow_header()
            && let Ok(value) = HeaderValue::from_str(&allow)
        {
            headers.insert(ALLOW, value);
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::tests::ManualClock;
    use crate::infrastructure::StoreError;
    use crate::infrastructure::trigger_repository::tests::MockTriggerRepository;
    use chrono::Duration;
    use lambda_http::http::Request as HttpRequest;

    // ==================== テストヘルパー ====================

    fn create_test_router(
        base_url: Option<&str>,
    ) -> (
        RequestRouter<MockTriggerRepository, ManualClock>,
        MockTriggerRepository,
        ManualClock,
    ) {
        let repo = MockTriggerRepository::new();
        let clock = ManualClock::at_epoch();
        let service = TriggerService::with_clock(repo.clone(), clock.clone());
        let router = RequestRouter::new(service, base_url.map(str::to_string));
        (router, repo, clock)
    }

    fn request(method: &str, uri: &str, body: Body) -> Request {
        HttpRequest::builder()
            .method(method)
            .uri(uri)
            .body(body)
            .unwrap()
    }

    fn body_text(response: &Response<Body>) -> String {
        String::from_utf8(response.body().as_ref().to_vec()).unwrap()
    }

    fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
        response.headers().get(name).map(|v| v.to_str().unwrap())
    }

    fn create_body(hours: i64, url: &str) -> Body {
        Body::Text(
            serde_json::json!({
                "hoursBetweenFire": hours,
                "fireURL": url,
                "firePayload": "{\"msg\":\"nightly job missed\"}"
            })
            .to_string(),
        )
    }

    /// POST /triggers で作成し、Locationのパスを返す
    async fn create_trigger(router: &RequestRouter<MockTriggerRepository, ManualClock>) -> String {
        let response = router
            .handle(request("POST", "/triggers", create_body(2, "https://example.com/hook")))
            .await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        header(&response, "location").unwrap().to_string()
    }

    fn assert_text_error(response: &Response<Body>, status: StatusCode, message: &str) {
        assert_eq!(response.status(), status);
        assert_eq!(body_text(response), message);
        assert_eq!(header(response, "content-type"), Some("text/plain;charset=UTF-8"));
        assert_eq!(
            header(response, "content-length"),
            Some(message.len().to_string().as_str())
        );
    }

    // ==================== Route::resolve ====================

    #[test]
    fn test_resolve_known_routes() {
        let id = TriggerId::generate();

        assert_eq!(Route::resolve(&Method::POST, "/triggers"), Ok(Route::Create));
        assert_eq!(
            Route::resolve(&Method::GET, &format!("/triggers/{id}")),
            Ok(Route::Get(id))
        );
        assert_eq!(
            Route::resolve(&Method::DELETE, &format!("/triggers/{id}")),
            Ok(Route::Delete(id))
        );
        assert_eq!(
            Route::resolve(&Method::POST, &format!("/triggers/{id}/checkin")),
            Ok(Route::CheckIn(id))
        );
    }

    #[test]
    fn test_resolve_collection_allows_only_post() {
        for method in [Method::GET, Method::PUT, Method::DELETE, Method::PATCH] {
            assert_eq!(
                Route::resolve(&method, "/triggers"),
                Err(TriggerError::method_not_allowed(&[Method::POST]))
            );
        }
    }

    #[test]
    fn test_resolve_item_allows_get_and_delete() {
        let path = format!("/triggers/{}", TriggerId::generate());
        for method in [Method::POST, Method::PUT, Method::PATCH] {
            assert_eq!(
                Route::resolve(&method, &path),
                Err(TriggerError::method_not_allowed(&[Method::GET, Method::DELETE]))
            );
        }
    }

    #[test]
    fn test_resolve_checkin_allows_only_post() {
        let path = format!("/triggers/{}/checkin", TriggerId::generate());
        for method in [Method::GET, Method::DELETE] {
            assert_eq!(
                Route::resolve(&method, &path),
                Err(TriggerError::method_not_allowed(&[Method::POST]))
            );
        }
    }

    #[test]
    fn test_resolve_unknown_paths_are_not_found() {
        let id = TriggerId::generate();
        for path in [
            "/".to_string(),
            "".to_string(),
            "/other".to_string(),
            "/other/abc".to_string(),
            "triggers".to_string(),
            "/triggers/".to_string(),
            "/triggers/not-a-uuid".to_string(),
            "/triggers/not-a-uuid/checkin".to_string(),
            format!("/triggers/{id}/renew"),
            format!("/triggers/{id}/checkin/extra"),
        ] {
            assert_eq!(
                Route::resolve(&Method::GET, &path),
                Err(TriggerError::NotFound),
                "path: {path}"
            );
        }
    }

    #[test]
    fn test_resolve_invalid_id_wins_over_wrong_method() {
        assert_eq!(
            Route::resolve(&Method::PUT, "/triggers/xyz"),
            Err(TriggerError::NotFound)
        );
    }

    // ==================== 作成 ====================

    #[tokio::test]
    async fn test_create_redirects_to_new_trigger() {
        let (router, repo, _) = create_test_router(None);

        let response = router
            .handle(request("POST", "/triggers", create_body(2, "https://example.com/hook")))
            .await;

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(body_text(&response), "");
        let location = header(&response, "location").unwrap();
        let id: TriggerId = location.strip_prefix("/triggers/").unwrap().parse().unwrap();
        assert!(repo.get_trigger(id).is_some());
    }

    #[tokio::test]
    async fn test_create_location_uses_base_url() {
        let (router, _, _) = create_test_router(Some("https://deadman.example.com"));

        let location = create_trigger(&router).await;

        assert!(location.starts_with("https://deadman.example.com/triggers/"));
    }

    #[tokio::test]
    async fn test_create_validation_errors_are_422_without_store_write() {
        let (router, repo, _) = create_test_router(None);

        for body in [
            create_body(0, "https://example.com"),
            create_body(-5, "https://example.com"),
            Body::Text(r#"{"hoursBetweenFire": 1}"#.to_string()),
            Body::Text("not json".to_string()),
            Body::Empty,
        ] {
            let response = router.handle(request("POST", "/triggers", body)).await;
            assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
            assert_eq!(
                header(&response, "content-type"),
                Some("text/plain;charset=UTF-8")
            );
        }
        assert_eq!(repo.trigger_count(), 0);
    }

    #[tokio::test]
    async fn test_create_validation_message_is_body() {
        let (router, _, _) = create_test_router(None);

        let response = router
            .handle(request("POST", "/triggers", create_body(0, "https://example.com")))
            .await;

        assert_text_error(
            &response,
            StatusCode::UNPROCESSABLE_ENTITY,
            "hoursBetweenFire must be a positive integer, got 0",
        );
    }

    #[tokio::test]
    async fn test_create_store_failure_is_500() {
        let (router, repo, _) = create_test_router(None);
        repo.set_next_error(StoreError::WriteError("unavailable".to_string()));

        let response = router
            .handle(request("POST", "/triggers", create_body(1, "https://example.com")))
            .await;

        assert_text_error(
            &response,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Write error: unavailable",
        );
    }

    // ==================== 取得 ====================

    #[tokio::test]
    async fn test_get_returns_trigger_json() {
        let (router, _, _) = create_test_router(None);
        let location = create_trigger(&router).await;

        let response = router.handle(request("GET", &location, Body::Empty)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "content-type"), Some("application/json"));
        let json: serde_json::Value = serde_json::from_str(&body_text(&response)).unwrap();
        assert_eq!(json["id"], location.strip_prefix("/triggers/").unwrap());
        assert_eq!(json["due"], "2024-01-01T02:00:00Z");
        assert_eq!(json["hoursBetweenFire"], 2);
        assert_eq!(json["checkins"], serde_json::json!(["2024-01-01T00:00:00Z"]));
        assert_eq!(json["fireURL"], "https://example.com/hook");
        assert_eq!(json["firePayload"], "{\"msg\":\"nightly job missed\"}");
    }

    // ==================== チェックイン ====================

    #[tokio::test]
    async fn test_checkin_extends_due() {
        let (router, _, clock) = create_test_router(None);
        let location = create_trigger(&router).await;
        clock.advance(Duration::minutes(90));

        let response = router
            .handle(request("POST", &format!("{location}/checkin"), Body::Empty))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(&response)).unwrap();
        assert_eq!(json["due"], "2024-01-01T03:30:00Z");
        assert_eq!(
            json["checkins"],
            serde_json::json!(["2024-01-01T00:00:00Z", "2024-01-01T01:30:00Z"])
        );
    }

    // ==================== 削除 ====================

    #[tokio::test]
    async fn test_delete_returns_no_content_then_not_found() {
        let (router, repo, _) = create_test_router(None);
        let location = create_trigger(&router).await;

        let response = router.handle(request("DELETE", &location, Body::Empty)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(body_text(&response), "");
        assert_eq!(repo.trigger_count(), 0);

        let response = router.handle(request("GET", &location, Body::Empty)).await;
        assert_text_error(
            &response,
            StatusCode::NOT_FOUND,
            "The requested URL could not be found",
        );
    }

    // ==================== 404 / 405 ====================

    /// 存在しないIDと不正なIDは区別できない
    #[tokio::test]
    async fn test_unknown_and_malformed_ids_are_both_404() {
        let (router, _, _) = create_test_router(None);
        let unknown = format!("/triggers/{}", TriggerId::generate());

        for (method, path) in [
            ("GET", unknown.clone()),
            ("DELETE", unknown.clone()),
            ("POST", format!("{unknown}/checkin")),
            ("GET", "/triggers/12345".to_string()),
            ("DELETE", "/triggers/12345".to_string()),
            ("POST", "/triggers/12345/checkin".to_string()),
        ] {
            let response = router.handle(request(method, &path, Body::Empty)).await;
            assert_text_error(
                &response,
                StatusCode::NOT_FOUND,
                "The requested URL could not be found",
            );
        }
    }

    #[tokio::test]
    async fn test_method_not_allowed_lists_methods() {
        let (router, _, _) = create_test_router(None);
        let item = format!("/triggers/{}", TriggerId::generate());

        let response = router.handle(request("GET", "/triggers", Body::Empty)).await;
        assert_text_error(
            &response,
            StatusCode::METHOD_NOT_ALLOWED,
            "The requested method is not available. Available methods: POST",
        );
        assert_eq!(header(&response, "allow"), Some("POST"));

        let response = router.handle(request("PUT", &item, Body::Empty)).await;
        assert_text_error(
            &response,
            StatusCode::METHOD_NOT_ALLOWED,
            "The requested method is not available. Available methods: GET, DELETE",
        );
        assert_eq!(header(&response, "allow"), Some("GET, DELETE"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let (router, _, _) = create_test_router(None);

        let response = router.handle(request("GET", "/health", Body::Empty)).await;

        assert_text_error(
            &response,
            StatusCode::NOT_FOUND,
            "The requested URL could not be found",
        );
    }

    #[test]
    fn test_error_response_content_length_counts_bytes() {
        let err = TriggerError::Validation("fireURL must be an absolute http or https URL: ü".to_string());
        let response = RequestRouter::<MockTriggerRepository, ManualClock>::error_response(&err);

        let expected = err.to_string().len().to_string();
        assert_eq!(header(&response, "content-length"), Some(expected.as_str()));
    }
}
