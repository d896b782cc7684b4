// アプリケーション層モジュール
pub mod error;
pub mod request_router;
pub mod sweep_dispatcher;
pub mod trigger_service;

// 再エクスポート
pub use error::TriggerError;
pub use request_router::{RequestRouter, Route};
pub use sweep_dispatcher::{SweepDeadline, SweepDispatcher, SweepError, SweepFailure, SweepReport};
pub use trigger_service::TriggerService;
