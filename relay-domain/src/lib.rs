//! 可靠事件处理基础库（relay-domain）
//!
//! 面向基于分区、按位点寻址的日志型消息中间件，提供“至少一次”消费语义所需的构件：
//! - 退避与重试（`retry`）：策略、上下文、指数退避与带取消的重试执行器
//! - 错误分类（`classify`）：瞬时/永久/未知三分类与策略级显式名单
//! - 熔断（`circuit_breaker`）：按下游服务名懒创建的熔断器注册表
//! - 死信（`dead_letter`）：失败消息及完整失败上下文的旁路投递、检索与重放
//! - 幂等（`idempotency`）：按事件 ID 记录已处理标记
//! - 消费编排（`consumer`）：幂等检查 → 重试处理 → 确认或死信 → 指标
//! - 中间件协议（`broker`）与指标协议（`metrics`）：仅定义最小接口，具体实现由上层注入
//!
//! 典型用法：
//! 1. 为事件载荷实现 `Identifiable`（或使用 `#[identifiable]` 宏）；
//! 2. 实现 `consumer::EventHandler`，保证处理逻辑幂等；
//! 3. 以 `EventConsumer::builder()` 装配重试策略、死信、幂等存储与指标；
//! 4. 交给 `ConsumerEngine` 订阅消息源并按分区驱动消费循环。
//!
pub mod broker;
pub mod circuit_breaker;
pub mod classify;
pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod error;
pub mod idempotency;
pub mod message;
pub mod metrics;
pub mod retry;

// 允许在本 crate 内部通过 ::relay_domain 进行自引用，
// 以便过程宏在本 crate 的单元测试中也能解析到 ::relay_domain 路径。
extern crate self as relay_domain;
