//! folio-common - 站点各组件共享的工具

pub mod retry;

pub use retry::*;
