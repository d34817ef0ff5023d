//! Pericope 编辑锁服务：带心跳续期和 TTL 过期的互斥锁，
//! 保证同一时间只有一位标注者在编辑同一段经文。

pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod service;
pub mod storage;
pub mod sweeper;
