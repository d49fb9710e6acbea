use proc_macro::TokenStream;

mod attr_args;
mod command;
mod derive_utils;
mod identifiable;
mod query;

/// 命令宏
/// - 为结构体实现 `::relay_application::command::Command`
/// - 支持参数：
///   - `name = "..."`：稳定名称，默认取结构体名
///   - `output = Type`：返回值类型，默认 `()`
///   - `correlation_id = field`：关联 ID 所在字段（`String` / `Option<String>`）
///   - `initiator = field`：发起者所在字段，缺失或为空时为 `"SYSTEM"`
///   - `validate = path::to::fn`：`fn(&Self) -> Result<(), AppError>` 校验函数
#[proc_macro_attribute]
pub fn command(attr: TokenStream, item: TokenStream) -> TokenStream {
    command::expand(attr, item)
}

/// 查询宏
/// - 追加 `serde::Serialize` 派生（用于缓存键）
/// - 为结构体实现 `::relay_application::query::Query`
/// - 支持参数：`name = "..."`、`output = Type`、`correlation_id = field`
#[proc_macro_attribute]
pub fn query(attr: TokenStream, item: TokenStream) -> TokenStream {
    query::expand(attr, item)
}

/// 可识别事件宏
/// - 为结构体实现 `::relay_domain::message::Identifiable`
/// - 支持参数：
///   - `id = field`：事件 ID 所在字段；缺省时回退到载荷内容哈希
///   - `correlation_id = field`：关联 ID 所在字段；缺省时回退到消息头部
///   - `event_type = "..."`：日志与指标使用的事件类型名，默认取结构体名
#[proc_macro_attribute]
pub fn identifiable(attr: TokenStream, item: TokenStream) -> TokenStream {
    identifiable::expand(attr, item)
}
