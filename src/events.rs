use std::sync::Arc;

use tokio::sync::mpsc;

use crate::hash::ContentHash;
use crate::identity::{BareIdentity, Identity};
use crate::registry::AvatarRegistry;
use crate::transport::Announcement;

/// Everything the transports can report back to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarEvent {
    /// A push announcement on the metadata node.
    Announce {
        from: Identity,
        announcement: Announcement,
    },
    /// A requested data item arrived.
    Item {
        from: Identity,
        hash: ContentHash,
        bytes: Vec<u8>,
    },
    /// A requested data item cannot be retrieved.
    ItemUnavailable { from: Identity, hash: ContentHash },
    /// A directory photo hash was advertised, `None` meaning no photo.
    PhotoHash {
        from: Identity,
        hash: Option<ContentHash>,
    },
    /// A profile was fetched.
    ProfileUpdated {
        identity: BareIdentity,
        photo: Option<Vec<u8>>,
    },
    /// One of our own items was published.
    PublishSuccess { node: String, item_id: String },
}

/// Apply events from `events` to `registry` in arrival order until every
/// sender is dropped. Returns the number of events applied.
///
/// Each event runs on the blocking pool since it may touch the disk.
pub async fn drive(
    registry: Arc<AvatarRegistry>,
    mut events: mpsc::UnboundedReceiver<AvatarEvent>,
) -> usize {
    log::debug!("Avatar event loop started");
    let mut applied = 0;

    while let Some(event) = events.recv().await {
        log::trace!("Received event: {:?}", event);
        let registry = registry.clone();
        match tokio::task::spawn_blocking(move || registry.handle(event)).await {
            Ok(()) => applied += 1,
            Err(e) => log::error!("Failed to apply avatar event: {:?}", e),
        }
    }

    log::debug!("Avatar event loop finished after {} events", applied);
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelKind;
    use crate::config::AvatarConfig;
    use crate::raster::tests::png;
    use crate::test_utils::{initialize, RecordingDirectory, RecordingPush};
    use tempdir::TempDir;

    #[tokio::test]
    async fn events_are_applied_in_order() {
        initialize();
        let dir = TempDir::new("events_test").unwrap();
        let push = Arc::new(RecordingPush::default());
        let registry = Arc::new(
            AvatarRegistry::new(
                &AvatarConfig::with_root(dir.path()),
                push.clone(),
                Arc::new(RecordingDirectory::default()),
            )
            .unwrap(),
        );
        let mut changes = registry.subscribe();

        let from: Identity = "carol@example.org/laptop".parse().unwrap();
        let first = png(8, 8, 1);
        let second = png(8, 8, 2);
        let first_hash = ContentHash::from_bytes(&first);
        let second_hash = ContentHash::from_bytes(&second);

        let (sender, receiver) = mpsc::unbounded_channel();
        let events = vec![
            AvatarEvent::Announce {
                from: from.clone(),
                announcement: Announcement::Hash(first_hash.clone()),
            },
            AvatarEvent::Announce {
                from: from.clone(),
                announcement: Announcement::Hash(second_hash.clone()),
            },
            AvatarEvent::Item {
                from: from.clone(),
                hash: first_hash.clone(),
                bytes: first,
            },
            AvatarEvent::Item {
                from: from.clone(),
                hash: second_hash.clone(),
                bytes: second,
            },
        ];
        for event in events {
            sender.send(event).unwrap();
        }
        drop(sender);

        assert_eq!(drive(registry.clone(), receiver).await, 4);

        // The stale first delivery left nothing visible.
        let change = changes.recv().await.unwrap();
        assert_eq!(change.image.unwrap().fingerprint(), &second_hash);
        assert!(changes.try_recv().is_err());

        let resolved = registry.resolved(from.bare()).unwrap();
        assert_eq!(resolved.channel, ChannelKind::FederatedPush);
        assert_eq!(push.requests(), vec![(from.clone(), first_hash), (from, second_hash)]);
    }
}
