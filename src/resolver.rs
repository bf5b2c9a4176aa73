use crate::channel::{ChannelKind, IdentityChannels};
use crate::raster::RasterImage;

/// Picks the winning image among the channels of one identity.
///
/// Pure and synchronous: it only reads what the channels have already
/// resolved. All fetching happens inside the channels.
pub struct Resolver;

impl Resolver {
    /// First non-empty channel in [`ChannelKind::PRIORITY`] order.
    pub fn resolve(channels: &IdentityChannels) -> Option<(RasterImage, ChannelKind)> {
        ChannelKind::PRIORITY.iter().find_map(|kind| {
            channels
                .channel(*kind)
                .and_then(|channel| channel.current_image())
                .map(|image| (image, *kind))
        })
    }
}
