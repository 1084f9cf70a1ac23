//! The chat-platform port.
//!
//! Everything the desk needs from the hosting chat platform, expressed as a
//! trait so the core stays transport-free. [`memory::MemoryPlatform`] is an
//! in-process implementation used by the integration tests.

use super::ticket::TimeStamp;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;

/// The acting identity attached to every inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub is_admin: bool,
    pub roles: Vec<String>,
}

impl Actor {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_admin: false,
            roles: Vec::new(),
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_admin: true,
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Raw platform event payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Command { name: String, args: Vec<String> },
    Button { token: String },
    Form { token: String, fields: HashMap<String, String> },
}

/// An inbound platform event plus its context.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub actor: Actor,
    pub channel: String,
    pub event: Event,
}

impl Inbound {
    pub fn command(actor: Actor, channel: impl Into<String>, name: &str, args: &[&str]) -> Self {
        Self {
            actor,
            channel: channel.into(),
            event: Event::Command {
                name: name.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
            },
        }
    }

    pub fn button(actor: Actor, channel: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            actor,
            channel: channel.into(),
            event: Event::Button {
                token: token.into(),
            },
        }
    }

    pub fn form(
        actor: Actor,
        channel: impl Into<String>,
        token: impl Into<String>,
        fields: &[(&str, &str)],
    ) -> Self {
        Self {
            actor,
            channel: channel.into(),
            event: Event::Form {
                token: token.into(),
                fields: fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            },
        }
    }
}

/// One message fetched from a conversation's history.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub author_id: String,
    pub author_tag: String,
    pub content: String,
    pub sent_at: TimeStamp<Utc>,
}

/// A selectable option attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub token: String,
    pub label: String,
}

/// An outbound message: plain text plus optional call-to-action buttons.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub text: String,
    pub buttons: Vec<Button>,
}

impl Outbound {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_button(mut self, token: impl Into<String>, label: impl Into<String>) -> Self {
        self.buttons.push(Button {
            token: token.into(),
            label: label.into(),
        });
        self
    }
}

pub trait ChatPort {
    /// Create a private conversation visible to `member` and, when set, the
    /// given role. Returns the new conversation's reference.
    fn create_private_channel(
        &mut self,
        name: &str,
        member: &str,
        role: Option<&str>,
        category: Option<&str>,
    ) -> anyhow::Result<String>;

    fn send_message(&mut self, channel: &str, message: Outbound) -> anyhow::Result<()>;

    fn set_visibility(&mut self, channel: &str, user: &str, visible: bool) -> anyhow::Result<()>;

    fn rename_channel(&mut self, channel: &str, name: &str) -> anyhow::Result<()>;

    fn grant_role(&mut self, user: &str, role: &str) -> anyhow::Result<()>;

    fn fetch_user_tag(&self, user: &str) -> anyhow::Result<String>;

    /// Most recent messages first, up to `limit`.
    fn fetch_recent(&self, channel: &str, limit: usize) -> anyhow::Result<Vec<ChannelMessage>>;

    /// Deliver a private message with an attached file to a user.
    fn send_direct_file(&mut self, user: &str, note: &str, file: &Path) -> anyhow::Result<()>;
}

pub mod memory {
    //! In-process chat platform used by the integration tests.

    use super::*;
    use crate::utils;
    use anyhow::{anyhow, Context};
    use std::collections::{BTreeMap, BTreeSet};

    #[derive(Debug, Default)]
    struct Channel {
        name: String,
        category: Option<String>,
        messages: Vec<ChannelMessage>,
        visible_to: BTreeSet<String>,
        visible_roles: BTreeSet<String>,
    }

    /// A delivered direct message, captured for assertions.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct DirectDelivery {
        pub user: String,
        pub note: String,
        pub contents: String,
    }

    #[derive(Default)]
    pub struct MemoryPlatform {
        channels: BTreeMap<String, Channel>,
        users: BTreeMap<String, String>,
        deliveries: Vec<DirectDelivery>,
        granted: Vec<(String, String)>,
        /// Users whose direct-message delivery should fail.
        pub fail_dm_for: BTreeSet<String>,
    }

    impl MemoryPlatform {
        pub fn new() -> Self {
            Self::default()
        }

        /// Mint a user id and register its display tag.
        pub fn register_user(&mut self, tag: &str) -> String {
            let id = utils::new_uuid_to_bech32("user").expect("minting a user id");
            self.users.insert(id.clone(), tag.to_string());
            id
        }

        /// Record a human-authored message, as if typed in the channel.
        pub fn say(&mut self, channel: &str, user: &str, content: &str) {
            let tag = self.users.get(user).cloned().unwrap_or_else(|| user.to_string());
            if let Some(chan) = self.channels.get_mut(channel) {
                chan.messages.push(ChannelMessage {
                    author_id: user.to_string(),
                    author_tag: tag,
                    content: content.to_string(),
                    sent_at: TimeStamp::new(),
                });
            }
        }

        pub fn messages(&self, channel: &str) -> &[ChannelMessage] {
            self.channels
                .get(channel)
                .map(|c| c.messages.as_slice())
                .unwrap_or(&[])
        }

        pub fn last_message(&self, channel: &str) -> Option<&ChannelMessage> {
            self.messages(channel).last()
        }

        pub fn channel_name(&self, channel: &str) -> Option<&str> {
            self.channels.get(channel).map(|c| c.name.as_str())
        }

        pub fn channel_category(&self, channel: &str) -> Option<&str> {
            self.channels.get(channel).and_then(|c| c.category.as_deref())
        }

        pub fn role_can_view(&self, channel: &str, role: &str) -> bool {
            self.channels
                .get(channel)
                .is_some_and(|c| c.visible_roles.contains(role))
        }

        pub fn can_view(&self, channel: &str, user: &str) -> bool {
            self.channels
                .get(channel)
                .is_some_and(|c| c.visible_to.contains(user))
        }

        pub fn deliveries(&self) -> &[DirectDelivery] {
            &self.deliveries
        }

        pub fn granted_roles(&self) -> &[(String, String)] {
            &self.granted
        }

        /// References of every channel created so far, in creation order.
        pub fn channel_refs(&self) -> Vec<String> {
            self.channels.keys().cloned().collect()
        }
    }

    impl ChatPort for MemoryPlatform {
        fn create_private_channel(
            &mut self,
            name: &str,
            member: &str,
            role: Option<&str>,
            category: Option<&str>,
        ) -> anyhow::Result<String> {
            let reference = utils::new_uuid_to_bech32("chan").context("minting a channel ref")?;
            let mut channel = Channel {
                name: name.to_string(),
                category: category.map(str::to_string),
                ..Channel::default()
            };
            channel.visible_to.insert(member.to_string());
            if let Some(role) = role {
                channel.visible_roles.insert(role.to_string());
            }
            self.channels.insert(reference.clone(), channel);
            Ok(reference)
        }

        fn send_message(&mut self, channel: &str, message: Outbound) -> anyhow::Result<()> {
            let chan = self
                .channels
                .get_mut(channel)
                .ok_or_else(|| anyhow!("unknown channel {channel}"))?;
            let mut content = message.text;
            for button in &message.buttons {
                content.push_str(&format!(" [{}|{}]", button.label, button.token));
            }
            chan.messages.push(ChannelMessage {
                author_id: "desk".into(),
                author_tag: "desk".into(),
                content,
                sent_at: TimeStamp::new(),
            });
            Ok(())
        }

        fn set_visibility(
            &mut self,
            channel: &str,
            user: &str,
            visible: bool,
        ) -> anyhow::Result<()> {
            let chan = self
                .channels
                .get_mut(channel)
                .ok_or_else(|| anyhow!("unknown channel {channel}"))?;
            if visible {
                chan.visible_to.insert(user.to_string());
            } else {
                chan.visible_to.remove(user);
            }
            Ok(())
        }

        fn rename_channel(&mut self, channel: &str, name: &str) -> anyhow::Result<()> {
            let chan = self
                .channels
                .get_mut(channel)
                .ok_or_else(|| anyhow!("unknown channel {channel}"))?;
            chan.name = name.to_string();
            Ok(())
        }

        fn grant_role(&mut self, user: &str, role: &str) -> anyhow::Result<()> {
            self.granted.push((user.to_string(), role.to_string()));
            Ok(())
        }

        fn fetch_user_tag(&self, user: &str) -> anyhow::Result<String> {
            self.users
                .get(user)
                .cloned()
                .ok_or_else(|| anyhow!("unknown user {user}"))
        }

        fn fetch_recent(&self, channel: &str, limit: usize) -> anyhow::Result<Vec<ChannelMessage>> {
            let chan = self
                .channels
                .get(channel)
                .ok_or_else(|| anyhow!("unknown channel {channel}"))?;
            // platform delivery order: newest first
            Ok(chan.messages.iter().rev().take(limit).cloned().collect())
        }

        fn send_direct_file(&mut self, user: &str, note: &str, file: &Path) -> anyhow::Result<()> {
            if self.fail_dm_for.contains(user) {
                return Err(anyhow!("direct messages are closed for {user}"));
            }
            let contents = std::fs::read_to_string(file).context("reading the attachment")?;
            self.deliveries.push(DirectDelivery {
                user: user.to_string(),
                note: note.to_string(),
                contents,
            });
            Ok(())
        }
    }
}
