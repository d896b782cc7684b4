// インフラストラクチャ層モジュール
pub mod callback_client;
pub mod config;
pub mod logging;
pub mod trigger_repository;

// 再エクスポート
pub use callback_client::{CallbackClient, CallbackError, ReqwestCallbackClient};
pub use config::{ConfigError, DeadmanConfig};
pub use logging::init_logging;
pub use trigger_repository::{
    DueCursor, DuePage, DynamoTriggerRepository, StoreError, TriggerRepository,
};
