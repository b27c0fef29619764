//! spool-core
//!
//! Core building blocks for the Spool task-queue broker.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, options, lease）
//! - **queue**: task state と queue のポリシー（retry backoff, priority）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, StateStore）
//! - **impls**: ports の実装（MemoryStore）
//! - **keys**: store の keyspace layout
//! - **broker**: lifecycle 操作（enqueue, dequeue, done, retry, kill, requeue, renew_lease, ...）
//! - **app**: 実行時コンポーネント（Forwarder, Recoverer, Janitor, Poller, Heartbeat, Services）
//! - **config**: BrokerConfig と TOML 読み込み
//! - **error**: エラー型と分類

pub mod app;
pub mod broker;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod keys;
pub mod ports;
pub mod queue;

pub use broker::{Broker, QueueStats, RetryOutcome, TaskInfo};
pub use config::BrokerConfig;
pub use error::{BrokerError, BrokerResult, ErrorKind, ValidationError};
