/// トリガー（デッドマンスイッチ1つ分）のドメインモデル
///
/// チェックインのたびにdueが「チェックイン時刻 + hoursBetweenFire時間」へ
/// 再計算される。dueを過ぎたトリガーはスイープで発火・削除される。
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// due計算のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScheduleError {
    /// チェックイン時刻 + 間隔が表現可能な日時の範囲を超えた
    #[error("hoursBetweenFire {hours} is too large to compute a due time")]
    DueTimeOverflow {
        /// 発火間隔（時間）
        hours: u32,
    },
}

/// トリガーID（UUID）
///
/// ストレージのキーとしても使われる。一度払い出したIDは再利用しない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerId(Uuid);

impl TriggerId {
    /// 新しいランダムIDを生成
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for TriggerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// デッドマンスイッチのトリガー
///
/// # 不変条件
/// - `checkins`は空にならない（作成時刻が最初の要素）
/// - `due_at == checkinsの最後 + hours_between_fire時間`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trigger {
    id: TriggerId,
    #[serde(rename = "due")]
    due_at: DateTime<Utc>,
    #[serde(rename = "hoursBetweenFire")]
    hours_between_fire: u32,
    checkins: Vec<DateTime<Utc>>,
    #[serde(rename = "fireURL")]
    fire_url: String,
    #[serde(rename = "firePayload")]
    fire_payload: String,
}

impl Trigger {
    /// 新しいトリガーを作成（作成時刻を最初のチェックインとして記録）
    pub fn arm(
        id: TriggerId,
        now: DateTime<Utc>,
        hours_between_fire: u32,
        fire_url: String,
        fire_payload: String,
    ) -> Result<Self, ScheduleError> {
        let due_at = Self::due_after(now, hours_between_fire)?;

        Ok(Self {
            id,
            due_at,
            hours_between_fire,
            checkins: vec![now],
            fire_url,
            fire_payload,
        })
    }

    /// ストレージから読み出した値でトリガーを復元
    pub fn from_parts(
        id: TriggerId,
        due_at: DateTime<Utc>,
        hours_between_fire: u32,
        checkins: Vec<DateTime<Utc>>,
        fire_url: String,
        fire_payload: String,
    ) -> Self {
        Self {
            id,
            due_at,
            hours_between_fire,
            checkins,
            fire_url,
            fire_payload,
        }
    }

    /// チェックインを記録し、dueを`now + hours_between_fire`へ延長
    ///
    /// 失敗時はトリガーを変更しない。
    pub fn check_in(&mut self, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        let due_at = Self::due_after(now, self.hours_between_fire)?;
        self.checkins.push(now);
        self.due_at = due_at;
        Ok(())
    }

    /// `now`時点でdueに達しているか
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.due_at
    }

    /// 暦を使わない単純な時間加算でdueを計算
    fn due_after(checkin: DateTime<Utc>, hours: u32) -> Result<DateTime<Utc>, ScheduleError> {
        Duration::try_hours(i64::from(hours))
            .and_then(|interval| checkin.checked_add_signed(interval))
            .ok_or(ScheduleError::DueTimeOverflow { hours })
    }

    pub fn id(&self) -> TriggerId {
        self.id
    }

    pub fn due_at(&self) -> DateTime<Utc> {
        self.due_at
    }

    pub fn hours_between_fire(&self) -> u32 {
        self.hours_between_fire
    }

    pub fn checkins(&self) -> &[DateTime<Utc>] {
        &self.checkins
    }

    pub fn fire_url(&self) -> &str {
        &self.fire_url
    }

    pub fn fire_payload(&self) -> &str {
        &self.fire_payload
    }
}
