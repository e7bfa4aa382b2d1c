// ==========================================
// 国际化 (i18n) 模块
// ==========================================
// 使用 rust-i18n 库，词条位于 locales/*.yml
// 支持中文（默认）和英文
// 注意: rust_i18n::i18n! 宏已在 lib.rs 中初始化
// ==========================================

/// 默认语言
pub const DEFAULT_LOCALE: &str = "zh-CN";

/// 获取当前语言
pub fn current_locale() -> String {
    rust_i18n::locale().to_string()
}

/// 设置语言
///
/// 未提供词条的语言被忽略，返回 false
pub fn set_locale(locale: &str) -> bool {
    if !rust_i18n::available_locales!().iter().any(|l| *l == locale) {
        tracing::warn!(locale = %locale, "不支持的语言，保持 {}", current_locale());
        return false;
    }
    rust_i18n::set_locale(locale);
    true
}

/// 翻译消息（无参数）
///
/// # 示例
/// ```no_run
/// use material_reservation::i18n::t;
/// let msg = t("reservation.concurrent_modification");
/// ```
pub fn t(key: &str) -> String {
    rust_i18n::t!(key).to_string()
}

/// 翻译消息（`%{name}` 占位符替换）
///
/// # 示例
/// ```no_run
/// use material_reservation::i18n::t_with_args;
/// let msg = t_with_args("reservation.timeout", &[("timeout_ms", "5000")]);
/// ```
pub fn t_with_args(key: &str, args: &[(&str, &str)]) -> String {
    args.iter()
        .fold(rust_i18n::t!(key).to_string(), |msg, (k, v)| {
            msg.replace(&format!("%{{{}}}", k), v)
        })
}
