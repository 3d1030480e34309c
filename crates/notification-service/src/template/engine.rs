//! 模板渲染引擎
//!
//! 渲染是纯函数：相同的模板与变量总是得到相同的结果，可并发调用。
//!
//! ```ignore
//! let rendered = render(&template, &delivery_variables("DEL123", "123 Rue X"));
//! assert_eq!(rendered.title, "Nouvelle livraison #DEL123");
//! ```

use std::sync::LazyLock;

use courier_shared::events::Variables;
use regex::{Captures, Regex};

use crate::models::{NotificationTemplate, RenderedContent};

/// 匹配 `{{variable}}`，允许花括号内两侧留白，变量名支持字母、数字、下划线
static VARIABLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("占位符正则必须合法")
});

/// 渲染模板的标题与正文
pub fn render(template: &NotificationTemplate, variables: &Variables) -> RenderedContent {
    RenderedContent {
        title: render_str(&template.title_template, variables),
        body: render_str(&template.body_template, variables),
    }
}

/// 渲染单个字符串
///
/// 未提供的变量替换为空字符串，不会保留原始占位符。
pub fn render_str(pattern: &str, variables: &Variables) -> String {
    VARIABLE_REGEX
        .replace_all(pattern, |caps: &Captures| {
            variables
                .get(&caps[1])
                .map(ToString::to_string)
                .unwrap_or_default()
        })
        .into_owned()
}

/// 提取模板中出现的变量名（按出现顺序，去重）
pub fn extract_variables(pattern: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in VARIABLE_REGEX.captures_iter(pattern) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}
