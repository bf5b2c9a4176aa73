//! Interfaces of the network collaborators and the payloads exchanged
//! with the federated push service.
//!
//! Requests are fire-and-forget: implementations must return promptly and
//! report results later through the registry (or an
//! [`AvatarEvent`](crate::events::AvatarEvent) queue).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;
use crate::identity::{BareIdentity, Identity};
use crate::Result;

/// Node carrying avatar bytes, one item per hash.
pub const DATA_NODE: &str = "http://jabber.org/protocol/avatar#data";
/// Node carrying the announcement of the current avatar.
pub const METADATA_NODE: &str = "http://jabber.org/protocol/avatar#metadata";
/// Item id of a retraction ("stop") announcement.
pub const CURRENT_ITEM: &str = "current";

/// Federated publish/subscribe service.
pub trait PushTransport: Send + Sync {
    /// Ask `identity` for the data item `hash`. The answer arrives as an
    /// item or an unavailability report.
    fn request_item(&self, identity: &Identity, hash: &ContentHash);

    /// Publish an item on the account's own nodes. Success is reported
    /// back with the node and item id.
    fn publish(&self, item: PublishItem);
}

/// Directory (profile card) service.
pub trait DirectoryTransport: Send + Sync {
    /// Re-fetch the profile of `identity`. The answer arrives as a profile
    /// update carrying the embedded photo, if any.
    fn refresh(&self, identity: &BareIdentity);

    /// Photo of the profile already known locally, without any network
    /// round-trip.
    fn cached_photo(&self, _identity: &BareIdentity) -> Option<Vec<u8>> {
        None
    }
}

/// An announcement received on the metadata node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    /// The sender's avatar is now the image with this hash.
    Hash(ContentHash),
    /// The sender stopped publishing an avatar.
    Stop,
}

/// Data item: the avatar bytes, base64-encoded, keyed by their hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataItem {
    pub id: ContentHash,
    pub data: String,
}

impl DataItem {
    pub fn new(id: ContentHash, bytes: &[u8]) -> Self {
        Self {
            id,
            data: STANDARD.encode(bytes),
        }
    }

    pub fn bytes(&self) -> Result<Vec<u8>> {
        let cleaned: String = self
            .data
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        Ok(STANDARD.decode(cleaned)?)
    }
}

/// Description of a published avatar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarInfo {
    pub id: ContentHash,
    pub bytes: usize,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "type")]
    pub mime_type: String,
}

/// Metadata item: either describes the current avatar or retracts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataItem {
    Info(AvatarInfo),
    Stop,
}

impl MetadataItem {
    pub fn announcement(&self) -> Announcement {
        match self {
            MetadataItem::Info(info) => Announcement::Hash(info.id.clone()),
            MetadataItem::Stop => Announcement::Stop,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Data(DataItem),
    Metadata(MetadataItem),
}

/// One item to publish on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishItem {
    pub node: String,
    pub id: String,
    pub payload: Payload,
}

impl PublishItem {
    pub fn data(item: DataItem) -> Self {
        Self {
            node: DATA_NODE.to_owned(),
            id: item.id.to_string(),
            payload: Payload::Data(item),
        }
    }

    pub fn info(info: AvatarInfo) -> Self {
        Self {
            node: METADATA_NODE.to_owned(),
            id: info.id.to_string(),
            payload: Payload::Metadata(MetadataItem::Info(info)),
        }
    }

    pub fn stop() -> Self {
        Self {
            node: METADATA_NODE.to_owned(),
            id: CURRENT_ITEM.to_owned(),
            payload: Payload::Metadata(MetadataItem::Stop),
        }
    }
}
