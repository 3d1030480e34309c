//! 领域模型

mod notification;
mod template;

pub use notification::{NewNotification, Notification, NotificationFilter};
pub use template::{NotificationTemplate, RenderedContent};
