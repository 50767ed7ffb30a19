//! Hierarchy tags derived from a resolved identity
//!
//! Apps are path-like (`/group/sub/app`), tasks are Mesos-style
//! (`name.uuid-with-dashes`). Both are flattened into numbered tags so that
//! queries can group by any level of the hierarchy.

use crate::models::Identity;
use std::collections::BTreeMap;

/// Tag name to tag value, ordered by name
pub type TagSet = BTreeMap<String, String>;

/// Build the full tag set for an identity
pub fn identity_tags(identity: &Identity) -> TagSet {
    let mut tags = expand_app(&identity.raw_app);
    tags.extend(expand_task(&identity.raw_task));
    tags
}

/// Expand an unsanitized app path into `app_id`, `app` and group tags
pub fn expand_app(app: &str) -> TagSet {
    let mut tags = TagSet::new();
    tags.insert("app_id".to_string(), app.to_string());

    let path = app.strip_prefix('/').unwrap_or(app);
    let mut parents: Vec<&str> = path.split('/').collect();
    let last = parents.pop().unwrap_or_default();

    tags.insert("app".to_string(), last.to_string());

    if parents.is_empty() {
        tags.insert("group".to_string(), "/".to_string());
        return tags;
    }

    let mut group = String::new();
    for (depth, segment) in parents.iter().enumerate() {
        group.push('/');
        group.push_str(segment);
        tags.insert(format!("group{}", depth + 1), group.clone());
    }
    tags.insert("group".to_string(), group);

    tags
}

/// Expand a task id into `task` and its numbered components
///
/// `task1` is everything before the first dot; the remainder is split on
/// dashes into `task2`, `task3` and so on.
pub fn expand_task(task: &str) -> TagSet {
    let mut tags = TagSet::new();
    tags.insert("task".to_string(), task.to_string());

    match task.split_once('.') {
        Some((head, rest)) => {
            tags.insert("task1".to_string(), head.to_string());
            for (i, part) in rest.split('-').enumerate() {
                tags.insert(format!("task{}", i + 2), part.to_string());
            }
        }
        None => {
            tags.insert("task1".to_string(), task.to_string());
        }
    }

    tags
}
