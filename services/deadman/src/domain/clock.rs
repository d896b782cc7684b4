/// 現在時刻の取得を抽象化するクロック
///
/// トリガーのdue計算は常に「今」を基準にするため、
/// テストでは時刻を固定・前進できる実装に差し替える。
use chrono::{DateTime, SubsecRound, Utc};

/// 現在時刻を返すトレイト
pub trait Clock: Send + Sync {
    /// 現在時刻を取得（秒未満は切り捨て）
    fn now(&self) -> DateTime<Utc>;
}

/// システム時刻を返す本番用クロック
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(0)
    }
}
