// ドメイン層モジュール
pub mod clock;
pub mod new_trigger;
pub mod trigger;

// 再エクスポート
pub use clock::{Clock, SystemClock};
pub use new_trigger::{NewTrigger, NewTriggerError};
pub use trigger::{ScheduleError, Trigger, TriggerId};
