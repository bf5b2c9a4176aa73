use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::mpsc;

use crate::channel::{ChannelKind, IdentityChannels};
use crate::config::AvatarConfig;
use crate::events::AvatarEvent;
use crate::hash::ContentHash;
use crate::identity::{BareIdentity, Identity};
use crate::raster::{image_type, ImageDecoder, RasterImage, Rasterizer, StandardDecoder};
use crate::resolver::Resolver;
use crate::store::{ContentStore, OverrideStore};
use crate::transport::{
    Announcement, AvatarInfo, DataItem, DirectoryTransport, PublishItem,
    PushTransport, DATA_NODE,
};
use crate::Result;

/// The image currently shown for an identity and the channel it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAvatar {
    pub image: RasterImage,
    pub channel: ChannelKind,
}

/// Notification sent to observers when the avatar of an identity changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarChange {
    pub identity: BareIdentity,
    pub image: Option<RasterImage>,
}

struct Subscriber {
    identity: Option<BareIdentity>,
    sender: mpsc::UnboundedSender<AvatarChange>,
}

/// Resolution state of one bare identity.
struct IdentityRecord {
    identity: BareIdentity,
    channels: IdentityChannels,
    resolved: Option<ResolvedAvatar>,
    /// Full identity of the latest push announcer; push requests go there.
    push_source: Option<Identity>,
    /// Set once the record left the arena. Nothing is applied to it after.
    removed: bool,
}

/// Network work decided while a record was locked, issued once the lock
/// is released.
enum Fetch {
    Push(Identity, ContentHash),
    Directory(BareIdentity),
}

struct PendingPublish {
    info: AvatarInfo,
}

/// Public face of the engine: tracks the resolved avatar of every known
/// identity and tells subscribers when it changes.
///
/// Events for one identity are applied one at a time under that
/// identity's lock; different identities proceed independently.
pub struct AvatarRegistry {
    store: ContentStore,
    overrides: OverrideStore,
    rasterizer: Rasterizer,
    push: Arc<dyn PushTransport>,
    directory: Arc<dyn DirectoryTransport>,
    records: RwLock<HashMap<BareIdentity, Arc<Mutex<IdentityRecord>>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    self_publish: Mutex<Option<PendingPublish>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AvatarRegistry {
    pub fn new(
        config: &AvatarConfig,
        push: Arc<dyn PushTransport>,
        directory: Arc<dyn DirectoryTransport>,
    ) -> Result<Self> {
        Self::with_decoder(config, Arc::new(StandardDecoder), push, directory)
    }

    /// Like [`AvatarRegistry::new`] with a custom image decoder.
    pub fn with_decoder(
        config: &AvatarConfig,
        decoder: Arc<dyn ImageDecoder>,
        push: Arc<dyn PushTransport>,
        directory: Arc<dyn DirectoryTransport>,
    ) -> Result<Self> {
        config.ensure_dirs()?;
        let rasterizer = Rasterizer::new(
            decoder,
            config.max_stored_edge,
            config.max_display_edge,
        );
        let store = ContentStore::new("avatars".to_owned(), &config.cache_dir)?;
        let overrides = OverrideStore::new(
            "avatars".to_owned(),
            &config.override_dir,
            rasterizer.clone(),
        )?;
        log::info!(
            "Avatar registry ready, cache at {}, overrides at {}",
            config.cache_dir.display(),
            config.override_dir.display()
        );

        Ok(Self {
            store,
            overrides,
            rasterizer,
            push,
            directory,
            records: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            self_publish: Mutex::new(None),
        })
    }

    pub fn content_store(&self) -> &ContentStore {
        &self.store
    }

    // ---------------------------------------------------------------
    // Observers

    /// Changes of every identity.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<AvatarChange> {
        self.add_subscriber(None)
    }

    /// Changes of one identity only.
    pub fn subscribe_identity(
        &self,
        identity: &BareIdentity,
    ) -> mpsc::UnboundedReceiver<AvatarChange> {
        self.add_subscriber(Some(identity.clone()))
    }

    fn add_subscriber(
        &self,
        identity: Option<BareIdentity>,
    ) -> mpsc::UnboundedReceiver<AvatarChange> {
        let (sender, receiver) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(Subscriber { identity, sender });
        receiver
    }

    fn notify(&self, change: AvatarChange) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|subscriber| {
            let wanted = subscriber
                .identity
                .as_ref()
                .map_or(true, |identity| *identity == change.identity);
            !wanted || subscriber.sender.send(change.clone()).is_ok()
        });
    }

    // ---------------------------------------------------------------
    // Queries

    /// Current avatar of `identity`, recomputed from its channels.
    pub fn current_avatar(&self, identity: &BareIdentity) -> Option<RasterImage> {
        self.resolve(identity).map(|(image, _)| image)
    }

    /// Winning image and channel of `identity`, recomputed from its
    /// channels. Picks up override files changed on disk.
    pub fn resolve(&self, identity: &BareIdentity) -> Option<(RasterImage, ChannelKind)> {
        self.update(identity, |_, _| Vec::new())
            .map(|resolved| (resolved.image, resolved.channel))
    }

    /// Last recorded resolution, without recomputing or creating anything.
    pub fn resolved(&self, identity: &BareIdentity) -> Option<ResolvedAvatar> {
        let record = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()?;
        let record = lock(&record);
        record.resolved.clone()
    }

    pub fn identities(&self) -> Vec<BareIdentity> {
        let mut identities: Vec<_> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        identities.sort();
        identities
    }

    // ---------------------------------------------------------------
    // Local overrides

    /// Store `bytes` as the user-chosen avatar of `identity`.
    ///
    /// Bytes that do not decode are rejected and nothing changes.
    pub fn set_local_override(&self, identity: &BareIdentity, bytes: &[u8]) -> Result<()> {
        // The file is written under the identity lock so that the channel
        // and the mtime it records always describe the same file.
        self.update_with(identity, |record, registry| {
            (Vec::new(), registry.import_override(record, identity, bytes))
        })
        .1
    }

    pub fn clear_local_override(&self, identity: &BareIdentity) -> Result<()> {
        self.update_with(identity, |record, registry| {
            let removed = registry.overrides.remove(identity).map(|_| {
                record.channels.local_override_mut().clear();
            });
            (Vec::new(), removed)
        })
        .1
    }

    pub fn has_local_override(&self, identity: &BareIdentity) -> bool {
        self.overrides.exists(identity)
    }

    /// Forget everything about `identity` (contact removed). Observers get
    /// a final `None` if an avatar was showing. Override files stay.
    pub fn remove_identity(&self, identity: &BareIdentity) {
        let removed = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity);
        let Some(record) = removed else {
            return;
        };
        let mut record = lock(&record);
        record.removed = true;
        log::debug!("avatars/{}: removed", identity);
        if record.resolved.is_some() {
            self.notify(AvatarChange {
                identity: identity.clone(),
                image: None,
            });
        }
    }

    // ---------------------------------------------------------------
    // Federated push

    /// `from` announced its current avatar hash, or that it has none.
    pub fn on_announce(&self, from: &Identity, announcement: Announcement) {
        let hash = match announcement {
            Announcement::Hash(hash) => Some(hash),
            Announcement::Stop => None,
        };
        self.update(from.bare(), |record, registry| {
            record.push_source = Some(from.clone());
            let transition = record.channels.push_mut().update_hash(
                hash,
                &registry.store,
                &registry.rasterizer,
            );
            record.push_fetch(transition.fetch)
        });
    }

    /// The data item `hash` requested from `from` arrived.
    pub fn on_item(&self, from: &Identity, hash: &ContentHash, bytes: &[u8]) {
        self.update(from.bare(), |record, registry| {
            let transition = record.channels.push_mut().deliver(
                hash,
                bytes,
                &registry.store,
                &registry.rasterizer,
            );
            record.push_fetch(transition.fetch)
        });
    }

    pub fn on_item_unavailable(&self, from: &Identity, hash: &ContentHash) {
        self.update(from.bare(), |record, registry| {
            let transition = record
                .channels
                .push_mut()
                .unavailable(hash, &registry.store);
            record.push_fetch(transition.fetch)
        });
    }

    // ---------------------------------------------------------------
    // Directory

    /// `from` advertised the hash of its profile photo (`None`: no photo).
    pub fn on_photo_hash(&self, from: &Identity, hash: Option<ContentHash>) {
        self.update(from.bare(), |record, registry| {
            let transition = record.channels.profile_mut().update_hash(
                hash,
                &registry.store,
                &registry.rasterizer,
            );
            record.directory_fetch(transition.fetch)
        });
    }

    /// A profile of `identity` was fetched; `photo` is its embedded image.
    pub fn on_profile_updated(&self, identity: &BareIdentity, photo: Option<&[u8]>) {
        self.update(identity, |record, registry| {
            let mut fetches = Vec::new();
            if let Some(profile) = record.channels.profile.as_mut() {
                let transition = profile.deliver_pending(
                    photo.unwrap_or_default(),
                    &registry.store,
                    &registry.rasterizer,
                );
                if let Some(transition) = transition {
                    fetches = record.directory_fetch(transition.fetch);
                }
            }
            record
                .channels
                .snapshot_mut()
                .set_content(photo, &registry.rasterizer);
            fetches
        });
    }

    // ---------------------------------------------------------------
    // Self avatar

    /// Publish our own avatar, or retract it with `None`.
    ///
    /// The bytes are scaled like an override, then published as a data
    /// item; the metadata item follows once the data item is confirmed
    /// (see [`AvatarRegistry::on_publish_success`]). Local resolution is
    /// not affected.
    pub fn publish_self_avatar(&self, bytes: Option<&[u8]>) -> Result<()> {
        let Some(bytes) = bytes else {
            *lock(&self.self_publish) = None;
            log::info!("Retracting own avatar");
            self.push.publish(PublishItem::stop());
            return Ok(());
        };

        let data = self.rasterizer.scale_for_storage(bytes)?;
        let (width, height) = self.rasterizer.dimensions(&data)?;
        let hash = ContentHash::from_bytes(&data);
        let info = AvatarInfo {
            id: hash.clone(),
            bytes: data.len(),
            width,
            height,
            mime_type: image_type(&data).to_owned(),
        };
        *lock(&self.self_publish) = Some(PendingPublish { info });

        log::info!("Publishing own avatar {} ({} bytes)", hash, data.len());
        self.push.publish(PublishItem::data(DataItem::new(hash, &data)));
        Ok(())
    }

    /// The push service confirmed publication of `item_id` on `node`.
    pub fn on_publish_success(&self, node: &str, item_id: &str) {
        if node != DATA_NODE {
            return;
        }
        let pending = {
            let mut pending = lock(&self.self_publish);
            let confirmed = pending
                .as_ref()
                .map_or(false, |p| p.info.id.as_str() == item_id);
            if confirmed {
                pending.take()
            } else {
                None
            }
        };
        if let Some(pending) = pending {
            log::debug!("Announcing own avatar {}", pending.info.id);
            self.push.publish(PublishItem::info(pending.info));
        }
    }

    // ---------------------------------------------------------------
    // Events

    /// Apply one transport event.
    pub fn handle(&self, event: AvatarEvent) {
        match event {
            AvatarEvent::Announce { from, announcement } => {
                self.on_announce(&from, announcement)
            }
            AvatarEvent::Item { from, hash, bytes } => {
                self.on_item(&from, &hash, &bytes)
            }
            AvatarEvent::ItemUnavailable { from, hash } => {
                self.on_item_unavailable(&from, &hash)
            }
            AvatarEvent::PhotoHash { from, hash } => self.on_photo_hash(&from, hash),
            AvatarEvent::ProfileUpdated { identity, photo } => {
                self.on_profile_updated(&identity, photo.as_deref())
            }
            AvatarEvent::PublishSuccess { node, item_id } => {
                self.on_publish_success(&node, &item_id)
            }
        }
    }

    // ---------------------------------------------------------------
    // Internals

    fn record(&self, identity: &BareIdentity) -> Arc<Mutex<IdentityRecord>> {
        if let Some(record) = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
        {
            return record.clone();
        }

        // The snapshot channel starts from whatever profile is known
        // locally. Asked outside any lock.
        let snapshot = self.directory.cached_photo(identity);

        let mut records = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        records
            .entry(identity.clone())
            .or_insert_with(|| {
                log::debug!("avatars/{}: tracking", identity);
                let mut channels = IdentityChannels::default();
                channels
                    .snapshot_mut()
                    .set_content(snapshot.as_deref(), &self.rasterizer);
                Arc::new(Mutex::new(IdentityRecord {
                    identity: identity.clone(),
                    channels,
                    resolved: None,
                    push_source: None,
                    removed: false,
                }))
            })
            .clone()
    }

    /// Run `apply` against the record of `identity`, re-resolve, notify on
    /// an observable change, then issue the fetches `apply` asked for.
    fn update<F>(&self, identity: &BareIdentity, apply: F) -> Option<ResolvedAvatar>
    where
        F: FnOnce(&mut IdentityRecord, &Self) -> Vec<Fetch>,
    {
        self.update_with(identity, |record, registry| (apply(record, registry), ()))
            .0
    }

    /// Like [`AvatarRegistry::update`], also handing back whatever else
    /// `apply` produced.
    fn update_with<T, F>(&self, identity: &BareIdentity, apply: F) -> (Option<ResolvedAvatar>, T)
    where
        F: FnOnce(&mut IdentityRecord, &Self) -> (Vec<Fetch>, T),
    {
        let (resolved, fetches, output) = loop {
            let record = self.record(identity);
            let mut record = lock(&record);
            if record.removed {
                // Lost a race with remove_identity; start over on a fresh
                // record.
                continue;
            }

            record.retry_persist(&self.store);
            let reloaded = record.channels.local_override_mut().refresh(
                identity,
                &self.overrides,
                &self.rasterizer,
            );
            if reloaded.is_changed() {
                log::debug!("avatars/{}: override changed on disk", identity);
            }
            let (fetches, output) = apply(&mut *record, self);
            break (self.rearbitrate(&mut *record), fetches, output);
        };

        for fetch in fetches {
            match fetch {
                Fetch::Push(target, hash) => self.push.request_item(&target, &hash),
                Fetch::Directory(target) => self.directory.refresh(&target),
            }
        }
        (resolved, output)
    }

    fn import_override(
        &self,
        record: &mut IdentityRecord,
        identity: &BareIdentity,
        bytes: &[u8],
    ) -> Result<()> {
        let stored = self.overrides.import(identity, bytes)?;
        let modified = self.overrides.modified(identity)?;
        let channel = record.channels.local_override_mut();
        channel.set_content(Some(stored.as_slice()), &self.rasterizer);
        channel.mark_loaded(modified);
        Ok(())
    }

    /// Recompute the winner; notify only if the (channel, image) pair
    /// differs from the recorded one.
    fn rearbitrate(&self, record: &mut IdentityRecord) -> Option<ResolvedAvatar> {
        let resolved = Resolver::resolve(&record.channels)
            .map(|(image, channel)| ResolvedAvatar { image, channel });
        if resolved != record.resolved {
            log::debug!(
                "avatars/{}: now {}",
                record.identity,
                resolved
                    .as_ref()
                    .map_or("none", |r| r.channel.as_str())
            );
            record.resolved = resolved.clone();
            self.notify(AvatarChange {
                identity: record.identity.clone(),
                image: resolved.as_ref().map(|r| r.image.clone()),
            });
        }
        resolved
    }
}

impl IdentityRecord {
    fn retry_persist(&mut self, store: &ContentStore) {
        if let Some(push) = self.channels.push.as_mut() {
            push.retry_persist(store);
        }
        if let Some(profile) = self.channels.profile.as_mut() {
            profile.retry_persist(store);
        }
    }

    fn push_fetch(&self, hash: Option<ContentHash>) -> Vec<Fetch> {
        let target = self
            .push_source
            .clone()
            .unwrap_or_else(|| Identity::from(self.identity.clone()));
        hash.map(|hash| Fetch::Push(target, hash))
            .into_iter()
            .collect()
    }

    fn directory_fetch(&self, hash: Option<ContentHash>) -> Vec<Fetch> {
        hash.map(|_| Fetch::Directory(self.identity.clone()))
            .into_iter()
            .collect()
    }
}
