//! Channel/task router
//!
//! Bidirectional mapping between chat channels and backend tasks. Both
//! directions are updated together so a lookup either way never dangles.

use std::collections::HashMap;

use crate::protocol::{ChannelId, TaskId};

/// At most one live task per channel, with a reverse index for event routing
#[derive(Debug, Default)]
pub struct ChannelRouter {
    by_channel: HashMap<ChannelId, TaskId>,
    by_task: HashMap<TaskId, ChannelId>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `channel_id` to `task_id`.
    ///
    /// Any previous task of the channel, or previous channel of the task, is
    /// unbound first. Returns the task the channel was bound to before.
    pub fn bind(&mut self, channel_id: impl Into<ChannelId>, task_id: impl Into<TaskId>) -> Option<TaskId> {
        let channel_id = channel_id.into();
        let task_id = task_id.into();

        if let Some(old_channel) = self.by_task.remove(&task_id) {
            self.by_channel.remove(&old_channel);
        }
        let previous = self.by_channel.remove(&channel_id);
        if let Some(old_task) = &previous {
            self.by_task.remove(old_task);
        }

        self.by_task.insert(task_id.clone(), channel_id.clone());
        self.by_channel.insert(channel_id, task_id);
        previous.filter(|t| !self.by_task.contains_key(t))
    }

    /// Drop the binding of a task; returns the channel it belonged to
    pub fn unbind(&mut self, task_id: &str) -> Option<ChannelId> {
        let channel_id = self.by_task.remove(task_id)?;
        self.by_channel.remove(&channel_id);
        Some(channel_id)
    }

    /// Drop whatever task a channel is bound to
    pub fn unbind_channel(&mut self, channel_id: &str) -> Option<TaskId> {
        let task_id = self.by_channel.remove(channel_id)?;
        self.by_task.remove(&task_id);
        Some(task_id)
    }

    pub fn task_for(&self, channel_id: &str) -> Option<&str> {
        self.by_channel.get(channel_id).map(String::as_str)
    }

    pub fn channel_for(&self, task_id: &str) -> Option<&str> {
        self.by_task.get(task_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_channel.is_empty()
    }

    /// Remove every binding
    pub fn clear(&mut self) {
        self.by_channel.clear();
        self.by_task.clear();
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        assert_eq!(self.by_channel.len(), self.by_task.len());
        for (channel, task) in &self.by_channel {
            assert_eq!(self.by_task.get(task), Some(channel));
        }
    }
}
