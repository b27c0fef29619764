//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **MemoryStore**: 単一プロセス用の StateStore（開発・テスト用）
//!
//! # 本番用実装
//! 共有 store（Redis など）への adapter は別クレートに配置する想定です。
//! `StateStore::atomically` を script / MULTI で実装すれば broker はそのまま動きます。

pub mod memory_store;

pub use self::memory_store::MemoryStore;
