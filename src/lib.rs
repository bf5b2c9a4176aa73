//! Avatar resolution and caching.
//!
//! Every contact (bare identity) can get an avatar from several channels:
//! a local override chosen by the user, federated push announcements,
//! a directory profile photo advertised by hash, and the photo of the
//! last profile seen. [`AvatarRegistry`] keeps the highest-priority image
//! available for each identity and notifies subscribers when it changes.
//! Fetched images are kept in a content-addressed [`ContentStore`] so they
//! survive restarts without being downloaded again.

pub mod atomic;
pub mod channel;
pub mod config;
mod errors;
pub mod events;
pub mod hash;
pub mod identity;
pub mod raster;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod transport;

pub use channel::ChannelKind;
pub use config::AvatarConfig;
pub use errors::{AvatarError, Result};
pub use events::AvatarEvent;
pub use hash::ContentHash;
pub use identity::{BareIdentity, Identity};
pub use raster::RasterImage;
pub use registry::{AvatarChange, AvatarRegistry, ResolvedAvatar};
pub use resolver::Resolver;
pub use store::{ContentStore, OverrideStore};
pub use transport::{Announcement, DirectoryTransport, PushTransport};
