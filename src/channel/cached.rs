use crate::channel::{ChannelKind, ChannelNotice, SourceChannel};
use crate::hash::ContentHash;
use crate::raster::{RasterImage, Rasterizer};
use crate::store::ContentStore;
use crate::AvatarError;

/// Per (channel, identity) state of a hash-driven source.
///
/// `resolved_image` is only ever set for `current_hash`, and only once the
/// bytes behind that hash decoded successfully.
#[derive(Debug, Default, Clone)]
pub struct SourceState {
    pub current_hash: Option<ContentHash>,
    pub resolved_image: Option<RasterImage>,
    /// Hash of the request still awaiting delivery from the transport.
    pub pending_fetch: Option<ContentHash>,
}

/// Result of a state transition: the notice for the resolver and, at most
/// once per outstanding request, a hash to ask the transport for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub notice: ChannelNotice,
    pub fetch: Option<ContentHash>,
}

impl Transition {
    fn unchanged() -> Self {
        Self {
            notice: ChannelNotice::Unchanged,
            fetch: None,
        }
    }

    fn changed() -> Self {
        Self {
            notice: ChannelNotice::Changed,
            fetch: None,
        }
    }
}

/// Hash-driven channel: federated push or directory profile.
pub struct CachedChannel {
    kind: ChannelKind,
    state: SourceState,
    /// Delivered bytes whose write to the content store failed.
    unpersisted: Option<Vec<u8>>,
}

impl CachedChannel {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            state: SourceState::default(),
            unpersisted: None,
        }
    }

    pub fn state(&self) -> &SourceState {
        &self.state
    }

    pub fn current_hash(&self) -> Option<&ContentHash> {
        self.state.current_hash.as_ref()
    }

    pub fn pending_fetch(&self) -> Option<&ContentHash> {
        self.state.pending_fetch.as_ref()
    }

    /// The source announced a new hash, or that it has none.
    pub fn update_hash(
        &mut self,
        hash: Option<ContentHash>,
        store: &ContentStore,
        rasterizer: &Rasterizer,
    ) -> Transition {
        if hash == self.state.current_hash {
            return Transition::unchanged();
        }
        self.unpersisted = None;

        let hash = match hash {
            None => {
                log::debug!("{}: cleared", self.kind);
                self.state.current_hash = None;
                self.state.resolved_image = None;
                return Transition::changed();
            }
            Some(hash) => hash,
        };

        self.state.current_hash = Some(hash.clone());
        if store.has(&hash) {
            self.state.resolved_image = self.load_cached(&hash, store, rasterizer);
            return Transition::changed();
        }

        // Never show an image under a hash it does not belong to.
        self.state.resolved_image = None;
        Transition {
            notice: ChannelNotice::Changed,
            fetch: self.request(hash),
        }
    }

    /// The transport delivered the bytes for `hash`.
    pub fn deliver(
        &mut self,
        hash: &ContentHash,
        bytes: &[u8],
        store: &ContentStore,
        rasterizer: &Rasterizer,
    ) -> Transition {
        self.settle(hash);

        if self.state.current_hash.as_ref() != Some(hash) {
            log::debug!("{}: discarding stale delivery of {}", self.kind, hash);
            return self.refetch(store);
        }
        if self.state.resolved_image.is_some() {
            return Transition::unchanged();
        }

        match rasterizer.rasterize(bytes, hash.clone()) {
            Ok(raster) => {
                if let Err(err) = store.store(hash, bytes) {
                    log::error!(
                        "{}: could not cache {}, serving from memory: {}",
                        self.kind,
                        hash,
                        err
                    );
                    self.unpersisted = Some(bytes.to_vec());
                }
                self.state.resolved_image = Some(raster);
                Transition::changed()
            }
            Err(err) => {
                log::warn!("{}: invalid image for {}: {}", self.kind, hash, err);
                Transition::unchanged()
            }
        }
    }

    /// Deliver bytes for whatever request is in flight. Used by sources
    /// whose replies do not carry the hash they answer.
    pub fn deliver_pending(
        &mut self,
        bytes: &[u8],
        store: &ContentStore,
        rasterizer: &Rasterizer,
    ) -> Option<Transition> {
        let hash = self.state.pending_fetch.clone()?;
        if bytes.is_empty() {
            return Some(self.unavailable(&hash, store));
        }
        Some(self.deliver(&hash, bytes, store, rasterizer))
    }

    /// The transport reported that `hash` cannot be retrieved.
    pub fn unavailable(&mut self, hash: &ContentHash, store: &ContentStore) -> Transition {
        self.settle(hash);

        if self.state.current_hash.as_ref() == Some(hash) {
            log::warn!(
                "{}: {}",
                self.kind,
                AvatarError::FetchUnavailable(hash.to_string())
            );
            return Transition::unchanged();
        }
        self.refetch(store)
    }

    /// Retry writing bytes that could not be persisted earlier.
    pub fn retry_persist(&mut self, store: &ContentStore) {
        let (Some(hash), Some(bytes)) =
            (self.state.current_hash.as_ref(), self.unpersisted.as_ref())
        else {
            return;
        };
        match store.store(hash, bytes) {
            Ok(()) => {
                log::debug!("{}: cached {} on retry", self.kind, hash);
                self.unpersisted = None;
            }
            Err(err) => {
                log::error!("{}: retry of {} failed: {}", self.kind, hash, err)
            }
        }
    }

    fn load_cached(
        &self,
        hash: &ContentHash,
        store: &ContentStore,
        rasterizer: &Rasterizer,
    ) -> Option<RasterImage> {
        let bytes = match store.load(hash) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("{}: failed to load {}: {}", self.kind, hash, err);
                return None;
            }
        };
        match rasterizer.rasterize(&bytes, hash.clone()) {
            Ok(raster) => Some(raster),
            Err(err) => {
                log::warn!(
                    "{}: cached blob {} is not a valid image: {}",
                    self.kind,
                    hash,
                    err
                );
                None
            }
        }
    }

    fn request(&mut self, hash: ContentHash) -> Option<ContentHash> {
        if self.state.pending_fetch.is_some() {
            log::debug!(
                "{}: fetch already in flight, retargeted to {}",
                self.kind,
                hash
            );
            return None;
        }
        log::debug!("{}: fetching {}", self.kind, hash);
        self.state.pending_fetch = Some(hash.clone());
        Some(hash)
    }

    fn settle(&mut self, hash: &ContentHash) {
        if self.state.pending_fetch.as_ref() == Some(hash) {
            self.state.pending_fetch = None;
        }
    }

    /// After a stale reply: fetch the current target if nothing else will.
    fn refetch(&mut self, store: &ContentStore) -> Transition {
        let target = match &self.state.current_hash {
            Some(hash)
                if self.state.resolved_image.is_none()
                    && self.state.pending_fetch.is_none()
                    && !store.has(hash) =>
            {
                hash.clone()
            }
            _ => return Transition::unchanged(),
        };
        Transition {
            notice: ChannelNotice::Unchanged,
            fetch: self.request(target),
        }
    }
}

impl SourceChannel for CachedChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn current_image(&self) -> Option<RasterImage> {
        self.state.resolved_image.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::tests::png;
    use crate::test_utils::initialize;
    use tempdir::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: ContentStore,
        rasterizer: Rasterizer,
        channel: CachedChannel,
    }

    fn fixture() -> Fixture {
        initialize();
        let dir = TempDir::new("channel_test").unwrap();
        let store = ContentStore::new("test".to_string(), dir.path()).unwrap();
        Fixture {
            _dir: dir,
            store,
            rasterizer: Rasterizer::default(),
            channel: CachedChannel::new(ChannelKind::FederatedPush),
        }
    }

    fn blob(shade: u8) -> (ContentHash, Vec<u8>) {
        let bytes = png(8, 8, shade);
        (ContentHash::from_bytes(&bytes), bytes)
    }

    #[test]
    fn same_hash_twice_is_a_noop() {
        let mut f = fixture();
        let (hash, bytes) = blob(1);
        f.store.store(&hash, &bytes).unwrap();

        let first = f
            .channel
            .update_hash(Some(hash.clone()), &f.store, &f.rasterizer);
        let second = f
            .channel
            .update_hash(Some(hash), &f.store, &f.rasterizer);

        assert_eq!(first, Transition::changed());
        assert_eq!(second, Transition::unchanged());
    }

    #[test]
    fn cached_hash_resolves_immediately() {
        let mut f = fixture();
        let (hash, bytes) = blob(2);
        f.store.store(&hash, &bytes).unwrap();

        let transition = f
            .channel
            .update_hash(Some(hash.clone()), &f.store, &f.rasterizer);

        assert_eq!(transition.fetch, None);
        let image = f.channel.current_image().unwrap();
        assert_eq!(image.fingerprint(), &hash);
        assert!(f.channel.pending_fetch().is_none());
    }

    #[test]
    fn miss_fetches_then_resolves() {
        let mut f = fixture();
        let (hash, bytes) = blob(3);

        let transition = f
            .channel
            .update_hash(Some(hash.clone()), &f.store, &f.rasterizer);
        assert_eq!(transition.notice, ChannelNotice::Changed);
        assert_eq!(transition.fetch, Some(hash.clone()));
        assert!(f.channel.current_image().is_none());
        assert_eq!(f.channel.pending_fetch(), Some(&hash));

        let transition = f
            .channel
            .deliver(&hash, &bytes, &f.store, &f.rasterizer);
        assert_eq!(transition, Transition::changed());
        assert!(f.store.has(&hash));
        assert_eq!(f.channel.current_image().unwrap().fingerprint(), &hash);
        assert!(f.channel.pending_fetch().is_none());
    }

    #[test]
    fn clearing_drops_image() {
        let mut f = fixture();
        let (hash, bytes) = blob(4);
        f.store.store(&hash, &bytes).unwrap();
        f.channel
            .update_hash(Some(hash), &f.store, &f.rasterizer);

        let transition = f.channel.update_hash(None, &f.store, &f.rasterizer);
        assert_eq!(transition, Transition::changed());
        assert!(f.channel.current_image().is_none());
        assert!(f.channel.current_hash().is_none());
    }

    #[test]
    fn new_miss_clears_previous_image() {
        let mut f = fixture();
        let (old, old_bytes) = blob(5);
        let (new, _) = blob(6);
        f.store.store(&old, &old_bytes).unwrap();
        f.channel
            .update_hash(Some(old), &f.store, &f.rasterizer);
        assert!(f.channel.current_image().is_some());

        f.channel
            .update_hash(Some(new.clone()), &f.store, &f.rasterizer);
        assert!(f.channel.current_image().is_none());
        assert_eq!(f.channel.current_hash(), Some(&new));
    }

    #[test]
    fn stale_delivery_is_discarded() {
        let mut f = fixture();
        let (h1, b1) = blob(7);
        let (h2, b2) = blob(8);

        let t1 = f
            .channel
            .update_hash(Some(h1.clone()), &f.store, &f.rasterizer);
        assert_eq!(t1.fetch, Some(h1.clone()));

        // Still one request in flight: retarget without a second fetch.
        let t2 = f
            .channel
            .update_hash(Some(h2.clone()), &f.store, &f.rasterizer);
        assert_eq!(t2.fetch, None);

        // The stale reply is dropped and the current target is requested.
        let stale = f.channel.deliver(&h1, &b1, &f.store, &f.rasterizer);
        assert_eq!(stale.notice, ChannelNotice::Unchanged);
        assert_eq!(stale.fetch, Some(h2.clone()));
        assert!(f.channel.current_image().is_none());
        assert_eq!(f.channel.current_hash(), Some(&h2));
        assert!(!f.store.has(&h1));

        let fresh = f.channel.deliver(&h2, &b2, &f.store, &f.rasterizer);
        assert_eq!(fresh, Transition::changed());
        assert_eq!(f.channel.current_image().unwrap().fingerprint(), &h2);
    }

    #[test]
    fn stale_delivery_after_cached_update() {
        let mut f = fixture();
        let (h1, b1) = blob(9);
        let (h2, b2) = blob(10);
        f.store.store(&h2, &b2).unwrap();

        f.channel
            .update_hash(Some(h1.clone()), &f.store, &f.rasterizer);
        f.channel
            .update_hash(Some(h2.clone()), &f.store, &f.rasterizer);
        let stale = f.channel.deliver(&h1, &b1, &f.store, &f.rasterizer);

        assert_eq!(stale, Transition::unchanged());
        assert_eq!(f.channel.current_image().unwrap().fingerprint(), &h2);
    }

    #[test]
    fn invalid_delivery_leaves_channel_empty() {
        let mut f = fixture();
        let hash: ContentHash = "abcdef".parse().unwrap();
        f.channel
            .update_hash(Some(hash.clone()), &f.store, &f.rasterizer);

        let transition = f
            .channel
            .deliver(&hash, b"not an image", &f.store, &f.rasterizer);
        assert_eq!(transition, Transition::unchanged());
        assert!(f.channel.current_image().is_none());
        assert!(!f.store.has(&hash));
    }

    #[test]
    fn unavailable_contributes_nothing() {
        let mut f = fixture();
        let (hash, _) = blob(11);
        f.channel
            .update_hash(Some(hash.clone()), &f.store, &f.rasterizer);

        let transition = f.channel.unavailable(&hash, &f.store);
        assert_eq!(transition, Transition::unchanged());
        assert!(f.channel.pending_fetch().is_none());
        assert!(f.channel.current_image().is_none());
    }

    #[test]
    fn duplicate_delivery_is_ignored() {
        let mut f = fixture();
        let (hash, bytes) = blob(12);
        f.channel
            .update_hash(Some(hash.clone()), &f.store, &f.rasterizer);
        f.channel.deliver(&hash, &bytes, &f.store, &f.rasterizer);

        let again = f.channel.deliver(&hash, &bytes, &f.store, &f.rasterizer);
        assert_eq!(again, Transition::unchanged());
    }

    #[test]
    fn deliver_pending_uses_in_flight_hash() {
        let mut f = fixture();
        f.channel = CachedChannel::new(ChannelKind::DirectoryProfile);
        let (hash, bytes) = blob(13);

        assert!(f
            .channel
            .deliver_pending(&bytes, &f.store, &f.rasterizer)
            .is_none());

        f.channel
            .update_hash(Some(hash.clone()), &f.store, &f.rasterizer);
        let transition = f
            .channel
            .deliver_pending(&bytes, &f.store, &f.rasterizer)
            .unwrap();
        assert_eq!(transition, Transition::changed());
        assert_eq!(f.channel.current_image().unwrap().fingerprint(), &hash);
    }

    #[test]
    fn deliver_pending_empty_is_unavailable() {
        let mut f = fixture();
        let (hash, _) = blob(14);
        f.channel
            .update_hash(Some(hash), &f.store, &f.rasterizer);

        let transition = f
            .channel
            .deliver_pending(&[], &f.store, &f.rasterizer)
            .unwrap();
        assert_eq!(transition, Transition::unchanged());
        assert!(f.channel.pending_fetch().is_none());
    }

    #[test]
    fn corrupted_cache_entry_resolves_to_nothing() {
        let mut f = fixture();
        let hash: ContentHash = "deadbeef".parse().unwrap();
        f.store.store(&hash, b"corrupted").unwrap();

        let transition = f
            .channel
            .update_hash(Some(hash), &f.store, &f.rasterizer);
        assert_eq!(transition, Transition::changed());
        assert!(f.channel.current_image().is_none());
    }
}
