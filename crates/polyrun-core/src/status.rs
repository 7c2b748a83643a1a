//! Host lifecycle status broadcasting.
//!
//! Every coordinator owns one [`StatusBroadcaster`]. Any number of callers may
//! subscribe; a subscription ends when it is dropped or explicitly unsubscribed.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::core_types::GuestLanguage;
use crate::protocol::{Generation, HostMessage};

const DEFAULT_CAPACITY: usize = 64;

/// Lifecycle event republished from a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StatusEvent {
    Loading { message: String },
    Ready,
    LoadError { error: String },
    PackageLoading { packages: Vec<String> },
    PackagesLoaded,
}

impl StatusEvent {
    /// Lifecycle events carried by a host message, if any.
    pub fn from_host_message(message: &HostMessage) -> Option<Self> {
        match message {
            HostMessage::Loading { message } => Some(StatusEvent::Loading {
                message: message.clone(),
            }),
            HostMessage::Ready => Some(StatusEvent::Ready),
            HostMessage::LoadError { error } => Some(StatusEvent::LoadError {
                error: error.clone(),
            }),
            HostMessage::PackageLoading { packages, .. } => Some(StatusEvent::PackageLoading {
                packages: packages.clone(),
            }),
            HostMessage::PackagesLoaded { .. } => Some(StatusEvent::PackagesLoaded),
            HostMessage::Result { .. } | HostMessage::Error { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub language: GuestLanguage,
    pub generation: Generation,
    #[serde(flatten)]
    pub event: StatusEvent,
}

#[derive(Debug, Clone)]
pub struct StatusBroadcaster {
    language: GuestLanguage,
    sender: broadcast::Sender<StatusUpdate>,
}

impl StatusBroadcaster {
    pub fn new(language: GuestLanguage) -> Self {
        Self::with_capacity(language, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(language: GuestLanguage, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { language, sender }
    }

    pub fn publish(&self, generation: Generation, event: StatusEvent) {
        let update = StatusUpdate {
            language: self.language,
            generation,
            event,
        };
        // No subscribers is not an error.
        if self.sender.send(update).is_err() {
            log::trace!("No status subscribers for {}", self.language);
        }
    }

    pub fn subscribe(&self) -> StatusSubscription {
        StatusSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct StatusSubscription {
    receiver: broadcast::Receiver<StatusUpdate>,
}

impl StatusSubscription {
    /// Next update, or `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<StatusUpdate> {
        loop {
            match self.receiver.recv().await {
                Ok(update) => return Some(update),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Status subscriber lagged, skipped {} updates", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-delivered update without waiting.
    pub fn try_recv(&mut self) -> Option<StatusUpdate> {
        loop {
            match self.receiver.try_recv() {
                Ok(update) => return Some(update),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    log::warn!("Status subscriber lagged, skipped {} updates", skipped);
                }
                Err(_) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives_updates() {
        let broadcaster = StatusBroadcaster::new(GuestLanguage::Python);
        let mut first = broadcaster.subscribe();
        let mut second = broadcaster.subscribe();

        broadcaster.publish(0, StatusEvent::Ready);

        for sub in [&mut first, &mut second] {
            let update = sub.recv().await.unwrap();
            assert_eq!(update.language, GuestLanguage::Python);
            assert_eq!(update.event, StatusEvent::Ready);
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_drops_receiver() {
        let broadcaster = StatusBroadcaster::new(GuestLanguage::Sql);
        let first = broadcaster.subscribe();
        let mut second = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);

        first.unsubscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);

        broadcaster.publish(
            2,
            StatusEvent::Loading {
                message: "Loading SQLite runtime...".to_string(),
            },
        );
        assert_eq!(second.try_recv().unwrap().generation, 2);
        assert!(second.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_to_latest() {
        let broadcaster = StatusBroadcaster::with_capacity(GuestLanguage::Go, 2);
        let mut sub = broadcaster.subscribe();
        for generation in 0..5 {
            broadcaster.publish(generation, StatusEvent::Ready);
        }
        assert_eq!(sub.recv().await.unwrap().generation, 3);
        assert_eq!(sub.recv().await.unwrap().generation, 4);
    }

    #[test]
    fn test_status_update_serializes_flat() {
        let update = StatusUpdate {
            language: GuestLanguage::Python,
            generation: 1,
            event: StatusEvent::PackageLoading {
                packages: vec!["numpy".to_string()],
            },
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["type"], "package-loading");
        assert_eq!(value["language"], "python");
        assert_eq!(value["packages"][0], "numpy");
    }

    #[test]
    fn test_terminal_messages_are_not_status_events() {
        let msg = HostMessage::Result {
            output: String::new(),
            id: 1,
        };
        assert!(StatusEvent::from_host_message(&msg).is_none());
    }
}
