use std::f64::consts::PI;

pub fn hann_window(position: f64, width: f64) -> f64 {
    (position * PI / width).sin().powi(2)
}

/// Hann taper of `width` samples centred on offset 0, zero outside `[-width / 2, width / 2]`.
pub fn centered_hann(offset: f64, width: f64) -> f64 {
    if offset.abs() > width / 2.0 {
        0.0
    } else {
        hann_window(offset + width / 2.0, width)
    }
}

/// Signed offset of FFT bin `position` when the second half of the buffer stands for negative
/// times.
pub fn wrapped_offset(position: usize, len: usize) -> f64 {
    if position <= len / 2 {
        position as f64
    } else {
        position as f64 - len as f64
    }
}
