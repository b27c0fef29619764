//! Ports - 抽象化レイヤー
//!
//! broker が外部に依存する箇所（時刻、ID 生成、共有 store）を trait として定義します。
//! 実装は `impls` にあります。

pub mod clock;
pub mod id_generator;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::store::{StateStore, StoreError, StoreResult, Transaction};
