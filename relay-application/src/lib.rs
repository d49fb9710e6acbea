//! 应用层命令/查询分发（relay-application）
//!
//! 进程内 CQRS 路由：每种命令/查询类型恰好注册一个处理器，
//! 分发时先校验，再按 `TypeId` 查找处理器并执行；
//! 处理器错误与 panic 在总线边界转换为失败结果，不向调用方传播。
//!
pub mod command;
pub mod command_bus;
pub mod command_handler;
pub mod context;
pub mod error;
pub mod inmemory_command_bus;
pub mod inmemory_query_bus;
pub mod query;
pub mod query_bus;
pub mod query_handler;
pub mod result;

pub use inmemory_command_bus::InMemoryCommandBus;
pub use inmemory_query_bus::InMemoryQueryBus;
pub use result::{CommandResult, QueryResult};

// 允许宏生成的 ::relay_application 路径在本 crate 内部解析
extern crate self as relay_application;
