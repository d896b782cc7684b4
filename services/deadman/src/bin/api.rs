/// トリガーAPI HTTP Lambdaエントリポイント
///
/// Lambda Function URL経由のHTTPリクエストを受け取り、
/// トリガーの作成・取得・チェックイン・削除を行う。
use deadman::application::{RequestRouter, TriggerService};
use deadman::infrastructure::{init_logging, DeadmanConfig};
use lambda_http::{run, service_fn, Error, Request};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 構造化ログを初期化
    init_logging();

    // 設定不備はコールドスタート時に失敗させる
    let config = DeadmanConfig::from_env()?;
    info!(
        table = config.triggers_table(),
        public_base_url = config.public_base_url().unwrap_or(""),
        "トリガーAPI Lambda関数を初期化"
    );

    // DynamoDBクライアントはwarm start間で再利用する
    let router = RequestRouter::new(
        TriggerService::new(config.trigger_repository().await),
        config.public_base_url().map(str::to_string),
    );
    let router = &router;

    run(service_fn(move |request: Request| async move {
        Ok::<_, Error>(router.handle(request).await)
    }))
    .await
}
