//! Scheduler 单元测试
//!
//! 测试任务、优先级队列和工作线程池的调度行为


use std::time::{Duration, Instant};

/// Poll `condition` until it holds or `timeout` elapses.
pub(super) fn wait_until(
    timeout: Duration,
    condition: impl Fn() -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[cfg(test)]
mod task_id_tests {
    use crate::runtime::scheduler::{TaskId, TaskIdGenerator};

    #[test]
    fn test_task_id_display() {
        assert_eq!(TaskId(7).to_string(), "Task(7)");
        assert_eq!(TaskId::from(3).inner(), 3);
    }

    #[test]
    fn test_generator_is_monotonic() {
        let ids = TaskIdGenerator::new();
        let a = ids.next();
        let b = ids.next();
        assert!(a < b);
    }
}

#[cfg(test)]
mod task_priority_tests {
    use crate::runtime::scheduler::TaskPriority;

    #[test]
    fn test_task_priority_weights() {
        assert_eq!(TaskPriority::Low.weight(), 0);
        assert_eq!(TaskPriority::Normal.weight(), 1);
        assert_eq!(TaskPriority::High.weight(), 2);
        assert_eq!(TaskPriority::Critical.weight(), 3);
    }

    #[test]
    fn test_task_priority_ord() {
        assert!(TaskPriority::Low < TaskPriority::Normal);
        assert!(TaskPriority::Normal < TaskPriority::High);
        assert!(TaskPriority::High < TaskPriority::Critical);
    }

    #[test]
    fn test_task_priority_default_is_normal() {
        assert_eq!(TaskPriority::default(), TaskPriority::Normal);
    }

    #[test]
    fn test_task_priority_serde_lowercase() {
        let json = serde_json::to_string(&TaskPriority::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
        let parsed: TaskPriority = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(parsed, TaskPriority::Low);
    }
}

#[cfg(test)]
mod task_tests {
    use crate::runtime::scheduler::{Task, TaskError, TaskId, TaskPriority};
    use serde_json::json;

    #[test]
    fn test_task_execute_returns_output() {
        let task = Task::new(TaskId(1), TaskPriority::Normal, None, "answer", || {
            Ok(Some(json!(42)))
        });
        assert_eq!(task.name(), "answer");
        assert_eq!(task.execute().unwrap(), Some(json!(42)));
    }

    #[test]
    fn test_task_error_is_captured() {
        let task = Task::new(TaskId(2), TaskPriority::Low, None, "fails", || {
            Err(anyhow::anyhow!("bad input"))
        });
        match task.execute() {
            Err(TaskError::Failed(err)) => assert!(err.to_string().contains("bad input")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_task_panic_is_captured() {
        let task = Task::new(TaskId(3), TaskPriority::High, None, "panics", || {
            panic!("kaboom")
        });
        match task.execute() {
            Err(TaskError::Panicked(message)) => assert_eq!(message, "kaboom"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_empty_name_falls_back_to_id() {
        let task = Task::new(TaskId(9), TaskPriority::Normal, None, "", || Ok(None));
        assert_eq!(task.name(), "Task(9)");
    }

    #[test]
    fn test_task_debug() {
        let task = Task::new(TaskId(1), TaskPriority::Normal, None, "dbg", || Ok(None));
        let debug = format!("{:?}", task);
        assert!(debug.contains("Task"));
        assert!(debug.contains("dbg"));
    }
}

#[cfg(test)]
mod scheduler_config_tests {
    use crate::runtime::scheduler::SchedulerConfig;
    use std::time::Duration;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert!(config.num_workers >= 1);
        assert_eq!(config.idle_timeout(), Duration::from_millis(10));
        assert_eq!(config.join_timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn test_scheduler_config_partial_toml() {
        let config: SchedulerConfig = toml::from_str("num_workers = 3").unwrap();
        assert_eq!(config.num_workers, 3);
        assert_eq!(config.idle_timeout_ms, 10);
    }
}
