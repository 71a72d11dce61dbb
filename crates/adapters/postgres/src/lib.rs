//! folio-adapter-postgres - PostgreSQL 适配器
//!
//! 连接参数组装、连接池与基于文件的 schema 迁移

mod config;
mod connection;
mod migration;

pub use config::*;
pub use connection::*;
pub use migration::*;
