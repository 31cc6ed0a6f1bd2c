//! Pixel-budget scaling math.
//!
//! Vintage decoders are limited by total pixel count rather than by a fixed
//! width or height, so every target is expressed as a maximum pixel area.

/// Fit `width` x `height` inside `max_pixels`, keeping the aspect ratio and
/// rounding both sides down to even numbers as video encoders require.
///
/// Sources already within budget keep their size (evened).
///
/// ```
/// use vintagecast_av::scale::fit_within_pixels;
///
/// assert_eq!(fit_within_pixels(320, 240, 346 * 260), (320, 240));
/// assert_eq!(fit_within_pixels(1920, 1080, 346 * 260), (398, 224));
/// ```
pub fn fit_within_pixels(width: u32, height: u32, max_pixels: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }

    if u64::from(width) * u64::from(height) <= u64::from(max_pixels) {
        return (even_floor(width), even_floor(height));
    }

    let aspect = f64::from(width) / f64::from(height);
    let new_height = ((f64::from(max_pixels) / aspect).sqrt() / 2.0) as u32 * 2;
    let new_width = ((f64::from(new_height) * aspect) / 2.0) as u32 * 2;

    (new_width.max(2), new_height.max(2))
}

/// Shrink `width` x `height` uniformly so the area does not exceed
/// `max_pixels`. No even-rounding; used for still images.
///
/// ```
/// use vintagecast_av::scale::shrink_to_pixel_budget;
///
/// assert_eq!(shrink_to_pixel_budget(800, 600, 1_000_000), (800, 600));
/// assert_eq!(shrink_to_pixel_budget(4000, 3000, 589_824), (886, 665));
/// ```
pub fn shrink_to_pixel_budget(width: u32, height: u32, max_pixels: u32) -> (u32, u32) {
    let area = u64::from(width) * u64::from(height);
    if area <= u64::from(max_pixels) || area == 0 {
        return (width, height);
    }

    let ratio = (f64::from(max_pixels) / area as f64).sqrt();
    let new_width = (f64::from(width) * ratio) as u32;
    let new_height = (f64::from(height) * ratio) as u32;

    (new_width.max(1), new_height.max(1))
}

fn even_floor(value: u32) -> u32 {
    (value - value % 2).max(2)
}
