/// スイープ（期限切れトリガーの一括発火）
///
/// `due <= now`のトリガーをページ単位で列挙し、トリガーごとに1タスクを起動して
/// コールバック発火とストレージ削除を並行に行う。全タスクの完了を待ってから
/// 結果を集約して返す。
///
/// # 配信保証
/// at-least-once。削除前にプロセスが落ちたトリガーは次回のスイープで再発火する。
/// 並行して走った2つのスイープが同じトリガーを発火することも許容する。
/// 実行期限までに送信する時間が残っていないトリガーは、発火も削除もせずに次回へ回す。
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::domain::{Clock, SystemClock, Trigger, TriggerId};
use crate::infrastructure::{CallbackClient, CallbackError, DueCursor, StoreError, TriggerRepository};

/// Lambdaの実行期限から差し引く安全マージン
const DEADLINE_SAFETY_MARGIN: Duration = Duration::from_secs(1);

/// コールバックを送信するのに最低限必要な残り時間
///
/// これを下回ったトリガーは発火も削除もせず、次回のスイープに回す。
pub const MIN_CALLBACK_BUDGET: Duration = Duration::from_secs(1);

/// スイープの実行期限
///
/// 期限がない場合（ローカル実行など）はコールバックごとのタイムアウトだけが効く。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepDeadline(Option<Instant>);

impl SweepDeadline {
    /// 期限なし
    pub fn none() -> Self {
        Self(None)
    }

    /// 指定時刻を期限とする
    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// Lambdaコンテキストの期限（Unixエポックからのミリ秒）から作成
    ///
    /// 安全マージンを差し引く。0は期限なしとして扱う。
    pub fn from_epoch_millis(deadline_ms: u64) -> Self {
        if deadline_ms == 0 {
            return Self::none();
        }

        let deadline = UNIX_EPOCH + Duration::from_millis(deadline_ms);
        let remaining = deadline
            .duration_since(SystemTime::now())
            .unwrap_or_default()
            .saturating_sub(DEADLINE_SAFETY_MARGIN);

        Self::at(Instant::now() + remaining)
    }

    /// コールバック1件に使える時間
    ///
    /// `per_callback`と期限までの残り時間の短い方。
    /// 残りが`MIN_CALLBACK_BUDGET`未満なら送信できないので`None`。
    pub fn budget(&self, per_callback: Duration) -> Option<Duration> {
        match self.0 {
            None => Some(per_callback),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining < MIN_CALLBACK_BUDGET {
                    None
                } else {
                    Some(remaining.min(per_callback))
                }
            }
        }
    }
}

/// スイープ結果の集計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// 見つかったdue済みトリガー数
    pub due: usize,
    /// コールバックが2xxで完了した数
    pub fired: usize,
    /// コールバックが失敗した数（削除は行われる）
    pub callback_failures: usize,
    /// このスイープで削除した数
    pub removed: usize,
    /// 削除時に既に存在しなかった数（並行スイープが先に削除した）
    pub already_removed: usize,
    /// 残り時間が足りず、発火も削除もせずに次回へ回した数
    pub deferred: usize,
}

/// スイープ失敗の個別要因
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SweepFailure {
    /// due範囲クエリが途中で失敗した（残りは次回のスイープで拾う）
    #[error("due query failed: {0}")]
    Query(StoreError),

    /// 発火済みトリガーの削除に失敗した
    #[error("failed to remove trigger {trigger_id}: {error}")]
    Removal {
        trigger_id: TriggerId,
        error: StoreError,
    },

    /// 発火タスクが異常終了した
    #[error("fire task aborted: {0}")]
    TaskAborted(String),
}

/// スイープのエラー型
///
/// 起動元には成功/失敗だけが伝わるが、すべての失敗要因を保持する。
#[derive(Debug, Clone, PartialEq, Error)]
#[error("sweep finished with {} failure(s): {}", .failures.len(), describe(.failures))]
pub struct SweepError {
    /// 失敗時点までの集計
    pub report: SweepReport,
    /// 失敗要因（発生順）
    pub failures: Vec<SweepFailure>,
}

fn describe(failures: &[SweepFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// トリガー1件分の発火結果
#[derive(Debug)]
enum FireOutcome {
    /// コールバックを送信し、削除を試みた
    Attempted {
        trigger_id: TriggerId,
        callback: Result<u16, CallbackError>,
        removal: Result<bool, StoreError>,
    },
    /// 残り時間不足で何もしなかった（トリガーはdueのまま残る）
    Deferred,
}

/// 期限切れトリガーを発火するディスパッチャー
pub struct SweepDispatcher<R, K, C = SystemClock>
where
    R: TriggerRepository + 'static,
    K: CallbackClient + 'static,
    C: Clock,
{
    /// トリガーリポジトリ（発火タスクと共有）
    repository: Arc<R>,
    /// コールバッククライアント（発火タスクと共有）
    callback_client: Arc<K>,
    /// 現在時刻
    clock: C,
    /// コールバック1件あたりのタイムアウト
    callback_timeout: Duration,
}

impl<R, K> SweepDispatcher<R, K>
where
    R: TriggerRepository + 'static,
    K: CallbackClient + 'static,
{
    /// システム時刻を使うディスパッチャーを作成
    pub fn new(repository: R, callback_client: K, callback_timeout: Duration) -> Self {
        Self::with_clock(repository, callback_client, SystemClock, callback_timeout)
    }
}

impl<R, K, C> SweepDispatcher<R, K, C>
where
    R: TriggerRepository + 'static,
    K: CallbackClient + 'static,
    C: Clock,
{
    /// クロックを指定してディスパッチャーを作成
    pub fn with_clock(
        repository: R,
        callback_client: K,
        clock: C,
        callback_timeout: Duration,
    ) -> Self {
        Self {
            repository: Arc::new(repository),
            callback_client: Arc::new(callback_client),
            clock,
            callback_timeout,
        }
    }

    /// スイープを1回実行
    ///
    /// # 処理フロー
    /// 1. `due <= now`のトリガーをページ単位で列挙
    /// 2. トリガーごとに発火タスクを起動（コールバックと削除を並行実行）
    /// 3. 列挙が終わったら（失敗した場合も）全タスクの完了を待つ
    /// 4. 結果を集約し、削除失敗・クエリ失敗が1件でもあれば`Err(SweepError)`
    pub async fn sweep(&self, deadline: SweepDeadline) -> Result<SweepReport, SweepError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut failures = Vec::new();
        let mut tasks = JoinSet::new();
        let mut cursor: Option<DueCursor> = None;

        info!(now = %now, "スイープ開始");

        loop {
            match self.repository.find_due(now, cursor.take()).await {
                Ok(page) => {
                    for trigger in page.triggers {
                        report.due += 1;
                        tasks.spawn(fire_and_remove(
                            self.repository.clone(),
                            self.callback_client.clone(),
                            trigger,
                            deadline,
                            self.callback_timeout,
                        ));
                    }
                    match page.next_cursor {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }
                Err(err) => {
                    error!(error = %err, "due済みトリガーの列挙に失敗");
                    failures.push(SweepFailure::Query(err));
                    break;
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => Self::record(outcome, &mut report, &mut failures),
                Err(join_error) => {
                    error!(error = %join_error, "発火タスクが異常終了");
                    failures.push(SweepFailure::TaskAborted(join_error.to_string()));
                }
            }
        }

        info!(
            due = report.due,
            fired = report.fired,
            callback_failures = report.callback_failures,
            removed = report.removed,
            already_removed = report.already_removed,
            deferred = report.deferred,
            failures = failures.len(),
            "スイープ完了"
        );

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(SweepError { report, failures })
        }
    }

    fn record(outcome: FireOutcome, report: &mut SweepReport, failures: &mut Vec<SweepFailure>) {
        let FireOutcome::Attempted {
            trigger_id,
            callback,
            removal,
        } = outcome
        else {
            report.deferred += 1;
            return;
        };

        match callback {
            Ok(_) => report.fired += 1,
            Err(_) => report.callback_failures += 1,
        }

        match removal {
            Ok(true) => report.removed += 1,
            Ok(false) => report.already_removed += 1,
            Err(error) => failures.push(SweepFailure::Removal { trigger_id, error }),
        }
    }
}

/// トリガー1件を発火して削除する
///
/// コールバックの成否にかかわらず削除する（失敗したコールバックは再試行しない）。
/// 送信する時間が残っていなければ、削除もせずにdueのまま残す。
async fn fire_and_remove<R, K>(
    repository: Arc<R>,
    callback_client: Arc<K>,
    trigger: Trigger,
    deadline: SweepDeadline,
    callback_timeout: Duration,
) -> FireOutcome
where
    R: TriggerRepository,
    K: CallbackClient,
{
    let trigger_id = trigger.id();
    let Some(budget) = deadline.budget(callback_timeout) else {
        warn!(trigger_id = %trigger_id, "残り時間が足りないため次回のスイープに回す");
        return FireOutcome::Deferred;
    };
    info!(trigger_id = %trigger_id, fire_url = trigger.fire_url(), "コールバックを発火");

    let callback = async {
        tokio::time::timeout(
            budget,
            callback_client.fire(trigger.fire_url(), trigger.fire_payload(), budget),
        )
        .await
        .unwrap_or(Err(CallbackError::Timeout))
    };

    let (callback, removal) = tokio::join!(callback, repository.delete(trigger_id));

    match &callback {
        Ok(status) => info!(
            trigger_id = %trigger_id,
            fire_url = trigger.fire_url(),
            status = status,
            "コールバック成功"
        ),
        Err(err) => warn!(
            trigger_id = %trigger_id,
            fire_url = trigger.fire_url(),
            error = %err,
            "コールバック失敗"
        ),
    }
    if let Err(err) = &removal {
        error!(trigger_id = %trigger_id, error = %err, "発火済みトリガーの削除に失敗");
    }

    FireOutcome::Attempted {
        trigger_id,
        callback,
        removal,
    }
}
