//! Numeric derivations for transcode targets.

/// Lowest video bitrate ever requested from an encoder.
pub const MIN_VIDEO_BITRATE_KBPS: u32 = 500;
/// Highest video bitrate ever requested from an encoder.
pub const MAX_VIDEO_BITRATE_KBPS: u32 = 25_000;

/// Output dimensions fitting `max_width`, aspect preserved, both even.
///
/// The width is capped first, the height follows from the rounded aspect
/// ratio, then each side drops by one if odd. Neither side goes below 2.
pub fn compute_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    let target_width = even(width.min(max_width));
    if width == 0 {
        return (target_width, even(height));
    }
    let scaled = (target_width as f64 * height as f64 / width as f64).round() as u32;
    (target_width, even(scaled))
}

fn even(v: u32) -> u32 {
    let v = if v % 2 == 1 { v - 1 } else { v };
    v.max(2)
}

/// Video bitrate that fits `max_file_size_bytes` over `duration_secs` after
/// reserving room for audio.
///
/// Sizes are counted in KiB-derived kilobits and the result is clamped to
/// `[MIN_VIDEO_BITRATE_KBPS, MAX_VIDEO_BITRATE_KBPS]`. A zero or non-finite
/// duration yields the ceiling.
pub fn compute_bitrate_kbps(max_file_size_bytes: u64, audio_bitrate_kbps: f64, duration_secs: f64) -> u32 {
    if !(duration_secs.is_finite() && duration_secs > 0.0) {
        return MAX_VIDEO_BITRATE_KBPS;
    }
    let budget_kbits = max_file_size_bytes as f64 * 8.0 / 1024.0;
    let raw = ((budget_kbits - audio_bitrate_kbps * duration_secs) / duration_secs).floor();
    if raw.is_nan() {
        return MIN_VIDEO_BITRATE_KBPS;
    }
    raw.clamp(MIN_VIDEO_BITRATE_KBPS as f64, MAX_VIDEO_BITRATE_KBPS as f64) as u32
}

/// Bytes an encode at the given bitrates would produce, using the same
/// units as [`compute_bitrate_kbps`].
pub fn estimate_size_bytes(video_bitrate_kbps: u32, audio_bitrate_kbps: f64, duration_secs: f64) -> u64 {
    let kbits = (video_bitrate_kbps as f64 + audio_bitrate_kbps) * duration_secs.max(0.0);
    (kbits * 1024.0 / 8.0).ceil() as u64
}

/// `min(original, max)`, using `max` when the original is unknown.
pub fn compute_frame_rate(original: Option<f64>, max_frame_rate: f64) -> f64 {
    match original.filter(|f| f.is_finite() && *f > 0.0) {
        Some(fps) if max_frame_rate > 0.0 => fps.min(max_frame_rate),
        Some(fps) => fps,
        None => max_frame_rate,
    }
}
