//! Candidate avatar sources.
//!
//! Two kinds of channel share the [`SourceChannel`] query:
//! - [`CachedChannel`]: hash-driven sources (federated push, directory
//!   profile). Their images are addressed by content hash, cached in the
//!   [`ContentStore`](crate::store::ContentStore) and fetched on a miss.
//! - [`LocalChannel`]: sources that already hold their content (local
//!   override, directory snapshot). No hash, no fetch.
//!
//! Mutating calls never notify anyone directly. They return a
//! [`ChannelNotice`] (and, for fetches, a [`Transition`]) that the owner
//! of the channel acts on.

mod cached;
mod local;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use cached::{CachedChannel, SourceState, Transition};
pub use local::LocalChannel;

use crate::raster::RasterImage;

/// The four avatar sources, declared highest priority first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ChannelKind {
    LocalOverride,
    FederatedPush,
    DirectoryProfile,
    DirectorySnapshot,
}

impl ChannelKind {
    /// Arbitration order, highest priority first.
    pub const PRIORITY: [ChannelKind; 4] = [
        ChannelKind::LocalOverride,
        ChannelKind::FederatedPush,
        ChannelKind::DirectoryProfile,
        ChannelKind::DirectorySnapshot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::LocalOverride => "local-override",
            ChannelKind::FederatedPush => "federated-push",
            ChannelKind::DirectoryProfile => "directory-profile",
            ChannelKind::DirectorySnapshot => "directory-snapshot",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a channel reports after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelNotice {
    /// Nothing observable changed.
    Unchanged,
    /// The channel's hash or image changed (possibly to nothing).
    Changed,
}

impl ChannelNotice {
    pub fn is_changed(&self) -> bool {
        matches!(self, ChannelNotice::Changed)
    }
}

/// Query side shared by every channel.
pub trait SourceChannel {
    fn kind(&self) -> ChannelKind;

    /// Image this channel currently contributes, if any.
    fn current_image(&self) -> Option<RasterImage>;
}

/// All channels of one bare identity. Each one is created on its first
/// event or query.
#[derive(Default)]
pub struct IdentityChannels {
    pub local_override: Option<LocalChannel>,
    pub push: Option<CachedChannel>,
    pub profile: Option<CachedChannel>,
    pub snapshot: Option<LocalChannel>,
}

impl IdentityChannels {
    pub fn channel(&self, kind: ChannelKind) -> Option<&dyn SourceChannel> {
        match kind {
            ChannelKind::LocalOverride => {
                self.local_override.as_ref().map(|c| c as &dyn SourceChannel)
            }
            ChannelKind::FederatedPush => {
                self.push.as_ref().map(|c| c as &dyn SourceChannel)
            }
            ChannelKind::DirectoryProfile => {
                self.profile.as_ref().map(|c| c as &dyn SourceChannel)
            }
            ChannelKind::DirectorySnapshot => {
                self.snapshot.as_ref().map(|c| c as &dyn SourceChannel)
            }
        }
    }

    pub fn local_override_mut(&mut self) -> &mut LocalChannel {
        self.local_override
            .get_or_insert_with(|| LocalChannel::new(ChannelKind::LocalOverride))
    }

    pub fn push_mut(&mut self) -> &mut CachedChannel {
        self.push
            .get_or_insert_with(|| CachedChannel::new(ChannelKind::FederatedPush))
    }

    pub fn profile_mut(&mut self) -> &mut CachedChannel {
        self.profile.get_or_insert_with(|| {
            CachedChannel::new(ChannelKind::DirectoryProfile)
        })
    }

    pub fn snapshot_mut(&mut self) -> &mut LocalChannel {
        self.snapshot.get_or_insert_with(|| {
            LocalChannel::new(ChannelKind::DirectorySnapshot)
        })
    }
}
