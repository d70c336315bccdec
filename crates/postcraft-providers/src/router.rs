//! Task routing: which providers, in which order, serve each task.

use std::fmt;
use std::str::FromStr;

use postcraft_core::config::schema::TasksConfig;

use crate::error::ConfigError;

/// A logical generation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Title,
    Body,
    Svg,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [TaskKind::Svg, TaskKind::Title, TaskKind::Body];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Title => "title",
            TaskKind::Body => "body",
            TaskKind::Svg => "svg",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title" => Ok(TaskKind::Title),
            "body" => Ok(TaskKind::Body),
            "svg" => Ok(TaskKind::Svg),
            other => Err(ConfigError::UnknownTask(other.to_string())),
        }
    }
}

/// One entry in a task's chain. `rank` 0 is the primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskAttempt {
    pub provider: String,
    pub model: String,
    pub rank: usize,
}

/// Ordered attempts for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskChain {
    pub task: TaskKind,
    pub attempts: Vec<TaskAttempt>,
}

impl TaskChain {
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }
}

/// Read-only lookup from task name to its chain.
#[derive(Debug, Clone)]
pub struct TaskRouter {
    title: TaskChain,
    body: TaskChain,
    svg: TaskChain,
}

impl TaskRouter {
    pub fn from_config(tasks: &TasksConfig) -> Self {
        let chain = |task: TaskKind| TaskChain {
            task,
            attempts: tasks
                .get(task.as_str())
                .map(|t| {
                    t.chain
                        .iter()
                        .enumerate()
                        .map(|(rank, entry)| TaskAttempt {
                            provider: entry.provider.clone(),
                            model: entry.model.clone(),
                            rank,
                        })
                        .collect()
                })
                .unwrap_or_default(),
        };

        Self {
            title: chain(TaskKind::Title),
            body: chain(TaskKind::Body),
            svg: chain(TaskKind::Svg),
        }
    }

    /// Chain for a task name.
    ///
    /// # Errors
    /// `UnknownTask` unless `task` is one of `title`, `body`, `svg`.
    pub fn chain_for(&self, task: &str) -> Result<&TaskChain, ConfigError> {
        Ok(self.chain(task.parse()?))
    }

    pub fn chain(&self, task: TaskKind) -> &TaskChain {
        match task {
            TaskKind::Title => &self.title,
            TaskKind::Body => &self.body,
            TaskKind::Svg => &self.svg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postcraft_core::config::{ChainEntry, TaskConfig};

    #[test]
    fn test_default_chains() {
        let router = TaskRouter::from_config(&TasksConfig::default());

        let svg = router.chain_for("svg").unwrap();
        let providers: Vec<&str> = svg.attempts.iter().map(|a| a.provider.as_str()).collect();
        assert_eq!(providers, vec!["openrouter", "novita", "siliconflow", "moonshot"]);
        assert_eq!(svg.attempts[0].rank, 0);
        assert_eq!(svg.attempts[3].rank, 3);

        let title = router.chain_for("title").unwrap();
        assert_eq!(title.attempts[0].provider, "siliconflow");
        assert_eq!(title.task, TaskKind::Title);
    }

    #[test]
    fn test_unknown_task() {
        let router = TaskRouter::from_config(&TasksConfig::default());
        assert_eq!(
            router.chain_for("captions").unwrap_err(),
            ConfigError::UnknownTask("captions".into())
        );
        assert!(router.chain_for("Title").is_err());
    }

    #[test]
    fn test_custom_chain_preserves_order() {
        let tasks = TasksConfig {
            body: TaskConfig::new(vec![
                ChainEntry::new("moonshot", "kimi"),
                ChainEntry::new("my-proxy", "local-model"),
            ]),
            ..Default::default()
        };
        let router = TaskRouter::from_config(&tasks);
        let body = router.chain(TaskKind::Body);

        assert_eq!(body.len(), 2);
        assert_eq!(
            body.attempts[1],
            TaskAttempt {
                provider: "my-proxy".into(),
                model: "local-model".into(),
                rank: 1
            }
        );
    }

    #[test]
    fn test_task_kind_round_trip_names() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
        }
    }
}
