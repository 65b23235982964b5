//! One-step pixel conversions for the [`super::EDGES`] table.
//!
//! YUV <-> RGB uses a fixed-point studio-RGB matrix; YUYV -> YV12 averages
//! chroma across two adjacent rows and halves horizontal resolution.

use super::{alloc_target, clamp_u8};
use crate::image::{ColorSpace, Image};

const COEFF_R: [i64; 3] = [298_082, 0, 458_942];
const COEFF_G: [i64; 3] = [298_082, -54_592, -136_425];
const COEFF_B: [i64; 3] = [298_082, 540_775, 0];
const NORMALIZER: i64 = 256_000;

/// `(r, g, b)` for one `(y, u, v)` sample, fixed-point studio-RGB matrix.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y = i64::from(y) - 16;
    let u = i64::from(u) - 128;
    let v = i64::from(v) - 128;
    let r = clamp_u8((COEFF_R[0] * y + COEFF_R[1] * u + COEFF_R[2] * v) / NORMALIZER);
    let g = clamp_u8((COEFF_G[0] * y + COEFF_G[1] * u + COEFF_G[2] * v) / NORMALIZER);
    let b = clamp_u8((COEFF_B[0] * y + COEFF_B[1] * u + COEFF_B[2] * v) / NORMALIZER);
    (r, g, b)
}

fn yuyv_to_rgb_like(source: &Image<'_>, colorspace: ColorSpace, r_idx: usize, b_idx: usize) -> Image<'static> {
    let (header, mut out) = alloc_target(&source.header, colorspace, source.header.width, source.header.height);
    let src = source.data();
    let width = source.header.width as usize;
    let height = source.header.height as usize;

    for row in 0..height {
        let row_in = row * width * 2;
        let row_out = row * width * 3;
        let mut x = 0;
        while x < width {
            let base = row_in + x * 2;
            let y0 = src[base];
            let u = src[base + 1];
            let y1 = src[base + 2];
            let v = src[base + 3];

            let (r0, g0, b0) = yuv_to_rgb(y0, u, v);
            let (r1, g1, b1) = yuv_to_rgb(y1, u, v);

            let out0 = row_out + x * 3;
            out[out0 + r_idx] = r0;
            out[out0 + 1] = g0;
            out[out0 + b_idx] = b0;
            out[out0 + 3 + r_idx] = r1;
            out[out0 + 3 + 1] = g1;
            out[out0 + 3 + b_idx] = b1;

            x += 2;
        }
    }
    Image::owned(header, out)
}

pub(super) fn yuyv_to_rgb888(source: &Image<'_>) -> Image<'static> {
    yuyv_to_rgb_like(source, ColorSpace::Rgb888, 0, 2)
}

pub(super) fn yuyv_to_bgr888(source: &Image<'_>) -> Image<'static> {
    yuyv_to_rgb_like(source, ColorSpace::Bgr888, 2, 0)
}

/// YUYV (4:2:2) -> YV12 (4:2:0): averages U/V across two adjacent rows and
/// halves horizontal chroma resolution. Output layout is Y-plane, then
/// V-plane, then U-plane.
pub(super) fn yuyv_to_yv12(source: &Image<'_>) -> Image<'static> {
    let width = source.header.width as usize;
    let height = source.header.height as usize;
    let (header, mut out) = alloc_target(&source.header, ColorSpace::Yv12, source.header.width, source.header.height);
    let src = source.data();

    let y_plane_len = width * height;
    let chroma_w = width / 2;
    let chroma_h = height / 2;
    let v_plane_len = chroma_w * chroma_h;

    for row in 0..height {
        for col in 0..width {
            let in_idx = row * width * 2 + col * 2;
            out[row * width + col] = src[in_idx];
        }
    }

    for crow in 0..chroma_h {
        for ccol in 0..chroma_w {
            let row0 = crow * 2;
            let row1 = row0 + 1;
            let col = ccol * 2;

            let u0 = u64::from(src[row0 * width * 2 + col * 2 + 1]);
            let u1 = u64::from(src[row1 * width * 2 + col * 2 + 1]);
            let v0 = u64::from(src[row0 * width * 2 + col * 2 + 3]);
            let v1 = u64::from(src[row1 * width * 2 + col * 2 + 3]);

            let u_avg = ((u0 + u1) / 2) as u8;
            let v_avg = ((v0 + v1) / 2) as u8;

            let chroma_idx = crow * chroma_w + ccol;
            out[y_plane_len + chroma_idx] = v_avg;
            out[y_plane_len + v_plane_len + chroma_idx] = u_avg;
        }
    }

    Image::owned(header, out)
}

fn yv12_to_rgb_like(source: &Image<'_>, colorspace: ColorSpace, r_idx: usize, b_idx: usize) -> Image<'static> {
    let width = source.header.width as usize;
    let height = source.header.height as usize;
    let (header, mut out) = alloc_target(&source.header, colorspace, source.header.width, source.header.height);
    let src = source.data();

    let y_plane_len = width * height;
    let chroma_w = width / 2;
    let v_plane_len = chroma_w * (height / 2);

    for row in 0..height {
        for col in 0..width {
            let y = src[row * width + col];
            let crow = row / 2;
            let ccol = col / 2;
            let chroma_idx = crow * chroma_w + ccol;
            let v = src[y_plane_len + chroma_idx];
            let u = src[y_plane_len + v_plane_len + chroma_idx];

            let (r, g, b) = yuv_to_rgb(y, u, v);
            let out_idx = (row * width + col) * 3;
            out[out_idx + r_idx] = r;
            out[out_idx + 1] = g;
            out[out_idx + b_idx] = b;
        }
    }
    Image::owned(header, out)
}

pub(super) fn yv12_to_rgb888(source: &Image<'_>) -> Image<'static> {
    yv12_to_rgb_like(source, ColorSpace::Rgb888, 0, 2)
}

pub(super) fn yv12_to_bgr888(source: &Image<'_>) -> Image<'static> {
    yv12_to_rgb_like(source, ColorSpace::Bgr888, 2, 0)
}

/// BGR888 <-> RGB888: both directions swap the first and third byte of every
/// pixel, so one function serves both edges.
pub(super) fn swap_bgr_rgb(source: &Image<'_>) -> Image<'static> {
    let target_cs = match source.colorspace() {
        ColorSpace::Bgr888 => ColorSpace::Rgb888,
        ColorSpace::Rgb888 => ColorSpace::Bgr888,
        other => unreachable!("swap_bgr_rgb only registered for BGR888/RGB888, got {other:?}"),
    };
    let (header, mut out) = alloc_target(&source.header, target_cs, source.header.width, source.header.height);
    let src = source.data();
    for px in 0..(source.header.width as usize * source.header.height as usize) {
        let base = px * 3;
        out[base] = src[base + 2];
        out[base + 1] = src[base + 1];
        out[base + 2] = src[base];
    }
    Image::owned(header, out)
}

pub(super) fn bgr888_to_gray(source: &Image<'_>) -> Image<'static> {
    let (header, mut out) = alloc_target(&source.header, ColorSpace::Gray, source.header.width, source.header.height);
    let src = source.data();
    for (px, pixel) in out.iter_mut().enumerate() {
        let base = px * 3;
        let (b, g, r) = (
            u32::from(src[base]),
            u32::from(src[base + 1]),
            u32::from(src[base + 2]),
        );
        *pixel = ((r * 299 + g * 587 + b * 114) / 1000) as u8;
    }
    Image::owned(header, out)
}

pub(super) fn gray_to_bgr888(source: &Image<'_>) -> Image<'static> {
    let (header, mut out) = alloc_target(&source.header, ColorSpace::Bgr888, source.header.width, source.header.height);
    let src = source.data();
    for (px, &gray) in src.iter().enumerate() {
        let base = px * 3;
        out[base] = gray;
        out[base + 1] = gray;
        out[base + 2] = gray;
    }
    Image::owned(header, out)
}

/// BGR888 -> YV12, used as the final leg of e.g. a snapshot pipeline.
pub(super) fn bgr888_to_yv12(source: &Image<'_>) -> Image<'static> {
    let width = source.header.width as usize;
    let height = source.header.height as usize;
    let (header, mut out) = alloc_target(&source.header, ColorSpace::Yv12, source.header.width, source.header.height);
    let src = source.data();

    let y_plane_len = width * height;
    let chroma_w = width / 2;
    let chroma_h = height / 2;
    let v_plane_len = chroma_w * chroma_h;

    // Y plane at full resolution; chroma planes subsampled 2x2.
    let mut u_acc = vec![0i64; chroma_w * chroma_h];
    let mut v_acc = vec![0i64; chroma_w * chroma_h];
    let mut acc_count = vec![0i64; chroma_w * chroma_h];

    for row in 0..height {
        for col in 0..width {
            let base = (row * width + col) * 3;
            let (b, g, r) = (
                i64::from(src[base]),
                i64::from(src[base + 1]),
                i64::from(src[base + 2]),
            );
            let y = (66 * r + 129 * g + 25 * b + 128) / 256 + 16;
            out[row * width + col] = clamp_u8(y);

            let u = (-38 * r - 74 * g + 112 * b + 128) / 256 + 128;
            let v = (112 * r - 94 * g - 18 * b + 128) / 256 + 128;
            let chroma_idx = (row / 2) * chroma_w + (col / 2);
            u_acc[chroma_idx] += u;
            v_acc[chroma_idx] += v;
            acc_count[chroma_idx] += 1;
        }
    }

    for idx in 0..(chroma_w * chroma_h) {
        let count = acc_count[idx].max(1);
        out[y_plane_len + idx] = clamp_u8(v_acc[idx] / count);
        out[y_plane_len + v_plane_len + idx] = clamp_u8(u_acc[idx] / count);
    }

    Image::owned(header, out)
}
