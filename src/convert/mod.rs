//! Colorspace conversion graph.
//!
//! [`Converter`] treats colorspaces as nodes and the one-step conversions in
//! [`EDGES`] as edges; [`Converter::convert`] finds the shortest chain
//! between two colorspaces with BFS and applies each step in turn, caching
//! intermediate frames for the lifetime of one pass.

mod yuv;

use std::collections::HashMap;

use crate::errors::{Result, TvError};
use crate::image::{ColorSpace, Image, ImageHeader};

/// A single one-step conversion: produces `to` pixel data from `from` data.
type Step = fn(&Image<'_>) -> Image<'static>;

/// Directed edges the runtime knows how to traverse.
const EDGES: &[(ColorSpace, ColorSpace, Step)] = &[
    (ColorSpace::Yuyv, ColorSpace::Yv12, yuv::yuyv_to_yv12),
    (ColorSpace::Yuyv, ColorSpace::Rgb888, yuv::yuyv_to_rgb888),
    (ColorSpace::Yuyv, ColorSpace::Bgr888, yuv::yuyv_to_bgr888),
    (ColorSpace::Yv12, ColorSpace::Rgb888, yuv::yv12_to_rgb888),
    (ColorSpace::Yv12, ColorSpace::Bgr888, yuv::yv12_to_bgr888),
    (ColorSpace::Bgr888, ColorSpace::Rgb888, yuv::swap_bgr_rgb),
    (ColorSpace::Rgb888, ColorSpace::Bgr888, yuv::swap_bgr_rgb),
    (ColorSpace::Bgr888, ColorSpace::Gray, yuv::bgr888_to_gray),
    (ColorSpace::Gray, ColorSpace::Bgr888, yuv::gray_to_bgr888),
    (ColorSpace::Bgr888, ColorSpace::Yv12, yuv::bgr888_to_yv12),
];

fn neighbors(from: ColorSpace) -> impl Iterator<Item = (ColorSpace, Step)> + '_ {
    EDGES
        .iter()
        .filter(move |(f, _, _)| *f == from)
        .map(|(_, to, step)| (*to, *step))
}

/// Shortest chain of one-step conversions from `from` to `to`, found with
/// BFS over [`EDGES`]. Cached per `(from, to)` pair since the edge set is
/// static for the lifetime of a `Converter`.
fn shortest_path(from: ColorSpace, to: ColorSpace) -> Option<Vec<Step>> {
    if from == to {
        return Some(Vec::new());
    }

    let mut queue = std::collections::VecDeque::new();
    let mut visited = std::collections::HashSet::new();
    // predecessor[node] = (previous node, step that produced `node`)
    let mut predecessor: HashMap<ColorSpace, (ColorSpace, Step)> = HashMap::new();

    queue.push_back(from);
    visited.insert(from);

    while let Some(node) = queue.pop_front() {
        if node == to {
            let mut chain = Vec::new();
            let mut cur = to;
            while cur != from {
                let (prev, step) = predecessor[&cur];
                chain.push(step);
                cur = prev;
            }
            chain.reverse();
            return Some(chain);
        }
        for (next, step) in neighbors(node) {
            if visited.insert(next) {
                predecessor.insert(next, (node, step));
                queue.push_back(next);
            }
        }
    }
    None
}

/// Produces frames in a requested colorspace from the current raw frame.
/// Each `Converter` caches the path for every `(from, to)` pair it has been
/// asked for, since the edge table never changes.
pub struct Converter {
    path_cache: HashMap<(ColorSpace, ColorSpace), Vec<Step>>,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            path_cache: HashMap::new(),
        }
    }

    /// Converts `source` to `to`, returning the source unchanged (zero copy)
    /// if `to == source.colorspace()`.
    pub fn convert<'a>(&mut self, to: ColorSpace, source: &Image<'a>) -> Result<Image<'a>> {
        let from = source.colorspace();
        if from == to {
            return Ok(source.view());
        }

        let key = (from, to);
        if !self.path_cache.contains_key(&key) {
            let path = shortest_path(from, to).ok_or(TvError::UnsupportedConversion { from, to })?;
            self.path_cache.insert(key, path);
        }
        let path = &self.path_cache[&key];
        if path.is_empty() {
            return Err(TvError::UnsupportedConversion { from, to });
        }

        let mut path_iter = path.iter();
        let first = path_iter.next().expect("checked non-empty above");
        let mut produced = first(source);
        for step in path_iter {
            produced = step(&produced);
        }
        Ok(produced)
    }
}

#[must_use]
pub(crate) fn clamp_u8(value: i64) -> u8 {
    value.clamp(0, 255) as u8
}

/// Allocates an [`Image`] of `colorspace` at `width x height`, stamped with
/// `source`'s timestamp (conversions never advance the clock).
pub(crate) fn alloc_target(
    source: &ImageHeader,
    colorspace: ColorSpace,
    width: u32,
    height: u32,
) -> (ImageHeader, Vec<u8>) {
    let header = ImageHeader::new(width, height, colorspace, source.timestamp_us);
    (header, vec![0u8; header.byte_count])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_bgr(width: u32, height: u32, px: [u8; 3]) -> Image<'static> {
        let header = ImageHeader::new(width, height, ColorSpace::Bgr888, 1);
        let mut data = Vec::with_capacity(header.byte_count);
        for _ in 0..(width * height) {
            data.extend_from_slice(&px);
        }
        Image::owned(header, data)
    }

    #[test]
    fn identity_conversion_is_zero_copy() {
        let mut conv = Converter::new();
        let src = solid_bgr(2, 2, [10, 20, 30]);
        let out = conv.convert(ColorSpace::Bgr888, &src).unwrap();
        assert_eq!(out.data(), src.data());
    }

    #[test]
    fn bgr_rgb_roundtrip_is_exact() {
        let mut conv = Converter::new();
        let src = solid_bgr(3, 3, [1, 2, 3]);
        let rgb = conv.convert(ColorSpace::Rgb888, &src).unwrap();
        let back = conv.convert(ColorSpace::Bgr888, &rgb).unwrap();
        assert_eq!(back.data(), src.data());
    }

    #[test]
    fn unsupported_conversion_reports_the_colorspaces() {
        let mut conv = Converter::new();
        let src = Image::owned(ImageHeader::new(1, 1, ColorSpace::None, 0), vec![]);
        let err = conv.convert(ColorSpace::Bgr888, &src).unwrap_err();
        match err {
            TvError::UnsupportedConversion { from, to } => {
                assert_eq!(from, ColorSpace::None);
                assert_eq!(to, ColorSpace::Bgr888);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn yuyv_to_bgr_uses_direct_edge_not_via_yv12() {
        // direct path length 1, not 2 through YV12
        let path = shortest_path(ColorSpace::Yuyv, ColorSpace::Bgr888).unwrap();
        assert_eq!(path.len(), 1);
    }
}
