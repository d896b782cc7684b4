/// トリガーのライフサイクル操作
///
/// 作成・チェックイン・取得・削除を提供する。状態はすべてリポジトリにあり、
/// このサービス自身は共有可変状態を持たない。
use tracing::{info, warn};

use crate::application::TriggerError;
use crate::domain::{Clock, NewTrigger, SystemClock, Trigger, TriggerId};
use crate::infrastructure::{StoreError, TriggerRepository};

/// チェックインの読み取り→書き込みを競合時に再試行する最大回数
const MAX_CHECKIN_ATTEMPTS: usize = 3;

/// トリガーのライフサイクルを扱うサービス
pub struct TriggerService<R, C = SystemClock>
where
    R: TriggerRepository,
    C: Clock,
{
    /// トリガーリポジトリ
    repository: R,
    /// 現在時刻
    clock: C,
}

impl<R> TriggerService<R>
where
    R: TriggerRepository,
{
    /// システム時刻を使うサービスを作成
    pub fn new(repository: R) -> Self {
        Self::with_clock(repository, SystemClock)
    }
}

impl<R, C> TriggerService<R, C>
where
    R: TriggerRepository,
    C: Clock,
{
    /// クロックを指定してサービスを作成
    pub fn with_clock(repository: R, clock: C) -> Self {
        Self { repository, clock }
    }

    /// トリガーを作成
    ///
    /// 新しいIDを払い出し、`checkins = [now]`、`due = now + hoursBetweenFire`で保存する。
    pub async fn create(&self, request: NewTrigger) -> Result<Trigger, TriggerError> {
        let now = self.clock.now();
        let trigger = Trigger::arm(
            TriggerId::generate(),
            now,
            request.hours_between_fire,
            request.fire_url,
            request.fire_payload,
        )?;

        self.repository.insert(&trigger).await?;

        info!(
            trigger_id = %trigger.id(),
            due = %trigger.due_at(),
            hours_between_fire = trigger.hours_between_fire(),
            "トリガーを作成"
        );

        Ok(trigger)
    }

    /// チェックインしてdueを延長
    ///
    /// 保存済みのチェックイン数を条件に書き込むため、同時チェックインで
    /// 片方が失われることはない。競合した場合は読み直して再試行する。
    pub async fn check_in(&self, id: TriggerId) -> Result<Trigger, TriggerError> {
        let mut attempt = 1;
        loop {
            let mut trigger = self.repository.get(id).await?.ok_or(TriggerError::NotFound)?;
            let expected_checkins = trigger.checkins().len();

            // 保存済みの間隔でdueが計算できないのはリクエストではなくデータの問題
            trigger
                .check_in(self.clock.now())
                .map_err(|e| TriggerError::Internal(e.to_string()))?;

            match self.repository.replace(&trigger, expected_checkins).await {
                Ok(()) => {
                    info!(
                        trigger_id = %id,
                        due = %trigger.due_at(),
                        checkin_count = trigger.checkins().len(),
                        "チェックインを記録"
                    );
                    return Ok(trigger);
                }
                Err(StoreError::Conflict(_)) if attempt < MAX_CHECKIN_ATTEMPTS => {
                    warn!(trigger_id = %id, attempt = attempt, "チェックインが競合したため再試行");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// トリガーを取得
    pub async fn get(&self, id: TriggerId) -> Result<Trigger, TriggerError> {
        self.repository.get(id).await?.ok_or(TriggerError::NotFound)
    }

    /// トリガーを削除
    pub async fn delete(&self, id: TriggerId) -> Result<(), TriggerError> {
        if self.repository.delete(id).await? {
            info!(trigger_id = %id, "トリガーを削除");
            Ok(())
        } else {
            Err(TriggerError::NotFound)
        }
    }
}
