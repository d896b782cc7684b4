/// 期限切れトリガーのスイープLambdaエントリポイント
///
/// EventBridgeのスケジュールで定期的に起動され、
/// 期限を過ぎたトリガーのコールバックを発火して削除する。
///
/// 1件でも失敗があれば呼び出しをエラーで終了し、次回のスケジュールで残りを拾う。
use deadman::application::{SweepDeadline, SweepDispatcher, SweepReport};
use deadman::domain::Clock;
use deadman::infrastructure::{
    init_logging, CallbackClient, DeadmanConfig, ReqwestCallbackClient, TriggerRepository,
};
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::{json, Value};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 構造化ログを初期化
    init_logging();

    let config = DeadmanConfig::from_env()?;
    info!(
        table = config.triggers_table(),
        callback_timeout_secs = config.callback_timeout().as_secs(),
        "スイープLambda関数を初期化"
    );

    let dispatcher = SweepDispatcher::new(
        config.trigger_repository().await,
        ReqwestCallbackClient::new()?,
        config.callback_timeout(),
    );
    let dispatcher = &dispatcher;

    let func = service_fn(move |event: LambdaEvent<Value>| async move {
        handler(dispatcher, event).await
    });
    lambda_runtime::run(func).await?;
    Ok(())
}

/// スケジュールイベントハンドラー
///
/// イベントのペイロードは使わない。呼び出し期限だけをコンテキストから取り出す。
async fn handler<R, K, C>(
    dispatcher: &SweepDispatcher<R, K, C>,
    event: LambdaEvent<Value>,
) -> Result<Value, Error>
where
    R: TriggerRepository + 'static,
    K: CallbackClient + 'static,
    C: Clock,
{
    let deadline = SweepDeadline::from_epoch_millis(event.context.deadline);
    info!(request_id = %event.context.request_id, "スイープ開始");

    match dispatcher.sweep(deadline).await {
        Ok(report) => Ok(report_json(&report)),
        Err(err) => {
            error!(error = %err, "スイープが失敗を含んで終了");
            Err(err.into())
        }
    }
}

/// 集計結果をレスポンスJSONに変換
fn report_json(report: &SweepReport) -> Value {
    json!({
        "due": report.due,
        "fired": report.fired,
        "callbackFailures": report.callback_failures,
        "removed": report.removed,
        "alreadyRemoved": report.already_removed,
        "deferred": report.deferred,
    })
}
