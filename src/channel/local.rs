use std::time::SystemTime;

use crate::channel::{ChannelKind, ChannelNotice, SourceChannel};
use crate::hash::ContentHash;
use crate::identity::BareIdentity;
use crate::raster::{RasterImage, Rasterizer};
use crate::store::OverrideStore;

/// Channel whose content is already at hand: a user-imported override or
/// the photo embedded in the last directory profile seen.
///
/// The content itself is the update; its digest only serves as the change
/// token.
pub struct LocalChannel {
    kind: ChannelKind,
    content: Option<ContentHash>,
    image: Option<RasterImage>,
    /// Modification time of the override file last read.
    loaded: Option<SystemTime>,
}

impl LocalChannel {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            content: None,
            image: None,
            loaded: None,
        }
    }

    /// Replace the content. Empty bytes mean "no image".
    pub fn set_content(
        &mut self,
        bytes: Option<&[u8]>,
        rasterizer: &Rasterizer,
    ) -> ChannelNotice {
        let bytes = match bytes.filter(|b| !b.is_empty()) {
            Some(bytes) => bytes,
            None => return self.clear(),
        };

        let fingerprint = ContentHash::from_bytes(bytes);
        if self.content.as_ref() == Some(&fingerprint) {
            return ChannelNotice::Unchanged;
        }
        self.content = Some(fingerprint.clone());

        match rasterizer.rasterize(bytes, fingerprint) {
            Ok(raster) => {
                self.image = Some(raster);
                ChannelNotice::Changed
            }
            Err(err) => {
                log::warn!("{}: invalid image: {}", self.kind, err);
                if self.image.take().is_some() {
                    ChannelNotice::Changed
                } else {
                    ChannelNotice::Unchanged
                }
            }
        }
    }

    pub fn clear(&mut self) -> ChannelNotice {
        self.content = None;
        self.loaded = None;
        if self.image.take().is_some() {
            ChannelNotice::Changed
        } else {
            ChannelNotice::Unchanged
        }
    }

    /// Re-read the override file of `identity` if it changed on disk since
    /// it was last loaded.
    pub fn refresh(
        &mut self,
        identity: &BareIdentity,
        overrides: &OverrideStore,
        rasterizer: &Rasterizer,
    ) -> ChannelNotice {
        let modified = match overrides.modified(identity) {
            Ok(modified) => modified,
            Err(err) => {
                log::error!("{}: cannot stat override of {}: {}", self.kind, identity, err);
                return ChannelNotice::Unchanged;
            }
        };
        match modified {
            None => self.clear(),
            Some(modified) if self.loaded == Some(modified) => {
                ChannelNotice::Unchanged
            }
            Some(_) => match overrides.read(identity) {
                Ok(Some((bytes, modified))) => {
                    let notice = self.set_content(Some(bytes.as_slice()), rasterizer);
                    self.loaded = Some(modified);
                    notice
                }
                Ok(None) => self.clear(),
                Err(err) => {
                    log::error!(
                        "{}: cannot read override of {}: {}",
                        self.kind,
                        identity,
                        err
                    );
                    ChannelNotice::Unchanged
                }
            },
        }
    }

    /// Record that the on-disk override at `modified` is what this channel
    /// now holds.
    pub fn mark_loaded(&mut self, modified: Option<SystemTime>) {
        self.loaded = modified;
    }
}

impl SourceChannel for LocalChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn current_image(&self) -> Option<RasterImage> {
        self.image.clone()
    }
}
