// ==========================================
// 挂片协议引擎 - 协议匹配器
// ==========================================
// 职责: 对全部协议的 协议/检查/序列/实例 规则求值，输出排序后的匹配结果
// 输入: 协议列表（注册顺序）+ 已加载检查 + 匹配选项
// 输出: 按总分降序的 MatchResult 列表（同分按注册顺序）
// ==========================================
// 红线: 无状态、无副作用，同输入同输出
// ==========================================

mod candidate;
mod core;

#[cfg(test)]
mod tests;

pub use self::core::{ExclusionReason, MatchOptions, ProtocolMatcher};
