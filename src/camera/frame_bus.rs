//! One-frame-at-a-time distribution with per-colorspace caching.

use rustc_hash::FxHashMap;

use crate::convert::Converter;
use crate::errors::Result;
use crate::image::{ColorSpace, Image};

/// Holds the current raw frame plus a cache of converted variants keyed by
/// colorspace. `begin_pass` invalidates the cache; within one pass, `view`
/// either returns the cached variant or asks the [`Converter`] to build it.
///
/// Single-producer: only the scheduler calls `begin_pass`/`view` while
/// building the cache for a pass; modules only read the views handed to
/// them.
pub struct FrameBus {
    converter: Converter,
    raw: Option<Image<'static>>,
    cache: FxHashMap<ColorSpace, Image<'static>>,
}

impl Default for FrameBus {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            converter: Converter::new(),
            raw: None,
            cache: FxHashMap::default(),
        }
    }

    /// Clears all cached converted variants and stores the new raw frame.
    pub fn begin_pass(&mut self, raw_frame: Image<'static>) {
        self.cache.clear();
        self.raw = Some(raw_frame);
    }

    /// Returns a view of the current frame in `colorspace`, building and
    /// caching it via the [`Converter`] on first request this pass.
    pub fn view(&mut self, colorspace: ColorSpace) -> Result<Image<'_>> {
        let raw = self
            .raw
            .as_ref()
            .expect("begin_pass must be called before view");

        if colorspace == raw.colorspace() {
            return Ok(raw.view());
        }

        if !self.cache.contains_key(&colorspace) {
            let converted = self.converter.convert(colorspace, raw)?;
            // `convert` may itself return a zero-copy view of `raw` when the
            // colorspaces happen to match post-lookup; force it to an owned
            // buffer so it can outlive this call.
            let owned = Image::owned(converted.header, converted.data().to_vec());
            self.cache.insert(colorspace, owned);
        }
        Ok(self.cache[&colorspace].view())
    }
}
