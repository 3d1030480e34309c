//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use super::ObservabilityConfig;

/// 初始化 Prometheus 指标导出
///
/// 安装全局 recorder 并在指定端口暴露 `/metrics`，需在 tokio 运行时内调用。
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", config.service_name.clone())
        .install()?;

    register_common_metrics(&config.service_name);
    info!("Metrics server listening on {}", addr);

    Ok(())
}

/// 注册通用指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "notification_dispatch_total",
        "Total number of dispatch requests"
    );
    metrics::describe_counter!(
        "notification_delivery_attempts_total",
        "Total number of delivery attempts"
    );
    metrics::describe_histogram!(
        "notification_delivery_duration_seconds",
        "Delivery attempt duration in seconds"
    );
    metrics::describe_counter!(
        "notification_retry_exhausted_total",
        "Notifications that reached terminal failed status"
    );
    metrics::describe_histogram!(
        "notification_sweep_batch_size",
        "Number of due notifications loaded per sweep batch"
    );
    metrics::describe_counter!(
        "offline_drain_envelopes_total",
        "Offline envelopes processed by drain, by outcome"
    );
    metrics::describe_gauge!("offline_queue_depth", "Envelopes left after a drain");
    metrics::describe_gauge!("badge_total", "Current unread badge total");
    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last scheduled task run"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录分发请求
#[inline]
pub fn record_dispatch(template: &str, priority: &str, outcome: &str) {
    metrics::counter!(
        "notification_dispatch_total",
        "template" => template.to_string(),
        "priority" => priority.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录投递尝试
#[inline]
pub fn record_delivery_attempt(channel: &str, status: &str, duration_secs: f64) {
    metrics::counter!(
        "notification_delivery_attempts_total",
        "channel" => channel.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "notification_delivery_duration_seconds",
        "channel" => channel.to_string()
    )
    .record(duration_secs);
}

/// 记录重试耗尽
#[inline]
pub fn record_retry_exhausted(notification_type: &str) {
    metrics::counter!(
        "notification_retry_exhausted_total",
        "type" => notification_type.to_string()
    )
    .increment(1);
}

/// 记录扫描批次大小
#[inline]
pub fn record_sweep_batch(size: usize) {
    metrics::histogram!("notification_sweep_batch_size").record(size as f64);
}

/// 记录离线信封处理结果（synced / skipped / discarded）
#[inline]
pub fn record_drain_envelope(outcome: &str) {
    metrics::counter!(
        "offline_drain_envelopes_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 更新离线队列剩余长度
#[inline]
pub fn set_offline_queue_depth(depth: u64) {
    metrics::gauge!("offline_queue_depth").set(depth as f64);
}

/// 更新徽章总数
#[inline]
pub fn set_badge_total(total: u32) {
    metrics::gauge!("badge_total").set(total as f64);
}

/// 记录定时任务最近一次运行时间，供告警判断任务是否存活
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!(
        "worker_last_run_timestamp",
        "worker" => worker.to_string()
    )
    .set(chrono::Utc::now().timestamp() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_dispatch("new_delivery", "high", "created");
        record_delivery_attempt("push", "success", 0.1);
        record_retry_exhausted("delivery");
        record_sweep_batch(42);
        record_drain_envelope("synced");
        set_offline_queue_depth(3);
        set_badge_total(7);
        set_worker_last_run("due_sweep");
    }
}
