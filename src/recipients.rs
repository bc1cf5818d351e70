//! Recipient resolution.
//!
//! When an episode triggers, the directory is queried for every user record
//! and each populated contact channel becomes a [`Recipient`]. Results are
//! never cached: the directory is the source of truth at trigger time.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::model::{Channel, Recipient, UserRecord};

/// Source of user records.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Return every user record.
    async fn list_users(&self) -> anyhow::Result<Vec<UserRecord>>;
}

/// Which users receive alerts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RecipientPolicy {
    /// Every registered user.
    #[default]
    AllUsers,
    /// Only users whose role matches.
    Role(String),
}

impl RecipientPolicy {
    pub fn admits(&self, user: &UserRecord) -> bool {
        match self {
            RecipientPolicy::AllUsers => true,
            RecipientPolicy::Role(role) => user.role() == role.as_str(),
        }
    }
}

/// Turns directory records into notification targets.
#[derive(Clone)]
pub struct RecipientResolver {
    directory: Arc<dyn Directory>,
    policy: RecipientPolicy,
}

impl RecipientResolver {
    pub fn new(directory: Arc<dyn Directory>, policy: RecipientPolicy) -> Self {
        Self { directory, policy }
    }

    pub fn policy(&self) -> &RecipientPolicy {
        &self.policy
    }

    /// Query the directory and extract every populated contact channel.
    ///
    /// Blank addresses are skipped for that channel only. A repeated
    /// (channel, address) pair is kept once so nobody is messaged twice for
    /// the same trigger. An empty result is not an error.
    pub async fn resolve(&self) -> anyhow::Result<Vec<Recipient>> {
        let users = self.directory.list_users().await?;
        let recipients = extract_recipients(&users, &self.policy);

        debug!(
            users = users.len(),
            recipients = recipients.len(),
            "Resolved alert recipients"
        );
        Ok(recipients)
    }
}

fn extract_recipients(users: &[UserRecord], policy: &RecipientPolicy) -> Vec<Recipient> {
    let mut seen = HashSet::new();
    let mut recipients = Vec::new();

    for user in users.iter().filter(|u| policy.admits(u)) {
        let channels = [
            (Channel::Email, user.email.as_deref()),
            (Channel::Sms, user.phone.as_deref()),
        ];
        for (channel, address) in channels {
            let Some(address) = address.map(str::trim).filter(|a| !a.is_empty()) else {
                continue;
            };
            if seen.insert((channel, address.to_string())) {
                recipients.push(Recipient {
                    channel,
                    address: address.to_string(),
                    user_id: user.id.clone(),
                });
            }
        }
    }

    recipients
}
