use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;
use tracing::debug;

use relay_errors::{RelayError, RelayResult};

/// CRON表达式解析和调度工具
pub struct CronScheduler {
    expr: String,
    schedule: Schedule,
}

impl CronScheduler {
    pub fn new(cron_expr: &str) -> RelayResult<Self> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| {
            RelayError::config_error(format!("无效的CRON表达式 '{cron_expr}': {e}"))
        })?;

        Ok(Self {
            expr: cron_expr.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// 获取下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// 计算下次执行时间距离现在的时长
    pub fn time_until_next_execution(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_execution_time(now).map(|next| {
            let wait = next - now;
            debug!(
                "CRON '{}' 下次执行: {}, 等待 {}ms",
                self.expr,
                next.format("%Y-%m-%d %H:%M:%S UTC"),
                wait.num_milliseconds()
            );
            wait
        })
    }

    /// 获取执行频率描述
    pub fn get_frequency_description(&self) -> String {
        let upcoming = self.upcoming_times(Utc::now(), 2);
        if upcoming.len() >= 2 {
            let seconds = (upcoming[1] - upcoming[0]).num_seconds();
            match seconds {
                s if s < 60 => format!("每{s}秒"),
                s if s < 3600 => format!("每{}分钟", s / 60),
                s if s < 86400 => format!("每{}小时", s / 3600),
                s if s < 604800 => format!("每{}天", s / 86400),
                s => format!("每{}周", s / 604800),
            }
        } else {
            "无法确定频率".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_invalid_expression_is_config_error() {
        assert!(matches!(
            CronScheduler::new("not a cron"),
            Err(RelayError::Configuration(_))
        ));
        assert!(CronScheduler::new("0 */5 * * * *").is_ok());
    }

    #[test]
    fn test_next_execution_every_five_minutes() {
        let cron = CronScheduler::new("0 */5 * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 10, 2, 30).unwrap();

        let next = cron.next_execution_time(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 10, 5, 0).unwrap());

        let wait = cron.time_until_next_execution(from).unwrap();
        assert_eq!(wait.num_seconds(), 150);

        let upcoming = cron.upcoming_times(from, 3);
        assert_eq!(upcoming.len(), 3);
        assert_eq!((upcoming[1] - upcoming[0]).num_minutes(), 5);
    }

    #[test]
    fn test_frequency_description() {
        assert_eq!(
            CronScheduler::new("0 * * * * *").unwrap().get_frequency_description(),
            "每1分钟"
        );
        assert_eq!(
            CronScheduler::new("0 0 * * * *").unwrap().get_frequency_description(),
            "每1小时"
        );
    }
}
