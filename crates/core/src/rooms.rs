//! Room (topic) naming for the push channel.
//!
//! Rooms are the addressable scopes lifecycle notifications are
//! published to. The server recognises three kinds: one per user
//! (addressed by the credential's subject claim), one per job, and a
//! global room carrying every job event.

use std::fmt;

use crate::types::JobId;

/// An addressable subscription scope on the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// `user:{subjectId}` — events for jobs owned by one user. The key
    /// is the subject claim from the bearer token, not a locally cached
    /// user id.
    User(String),
    /// `job:{jobId}` — events for a single job.
    Job(JobId),
    /// `jobs:all` — every job event.
    AllJobs,
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::User(subject) => write!(f, "user:{subject}"),
            Room::Job(id) => write!(f, "job:{id}"),
            Room::AllJobs => write!(f, "jobs:all"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_names_match_wire_format() {
        assert_eq!(Room::User("u-42".into()).to_string(), "user:u-42");
        assert_eq!(Room::Job("j-7".into()).to_string(), "job:j-7");
        assert_eq!(Room::AllJobs.to_string(), "jobs:all");
    }

    #[test]
    fn rooms_are_hashable_keys() {
        let mut set = std::collections::HashSet::new();
        set.insert(Room::AllJobs);
        set.insert(Room::Job("j1".into()));
        set.insert(Room::Job("j1".into()));
        assert_eq!(set.len(), 2);
    }
}
