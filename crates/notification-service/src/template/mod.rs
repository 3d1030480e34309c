//! 通知模板
//!
//! `engine` 负责 `{{variable}}` 占位符替换，`repository` 负责按名称读写模板。

mod engine;
mod repository;

pub use engine::{extract_variables, render, render_str};
pub use repository::{
    InMemoryTemplateRepository, PgTemplateRepository, TemplateRepository, default_templates,
};

#[cfg(test)]
pub use repository::MockTemplateRepository;
