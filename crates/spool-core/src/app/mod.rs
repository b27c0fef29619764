//! App - broker を使う実行時コンポーネント
//!
//! # 主要コンポーネント
//! - **Forwarder**: due になった Scheduled/Retry を Pending へ
//! - **Recoverer**: lease 期限切れの Active を Pending へ
//! - **Janitor**: Dead の retention
//! - **Poller**: cancel 可能な blocking dequeue
//! - **Heartbeat**: 実行中 task の lease 延長
//! - **Services**: 3 つの定期ループの起動と停止

pub mod forwarder_loop;
pub mod heartbeat;
pub mod janitor_loop;
mod periodic;
pub mod poller;
pub mod recoverer_loop;
pub mod services;

// 主要な型を再エクスポート
pub use self::forwarder_loop::Forwarder;
pub use self::heartbeat::Heartbeat;
pub use self::janitor_loop::Janitor;
pub use self::poller::Poller;
pub use self::recoverer_loop::Recoverer;
pub use self::services::Services;
