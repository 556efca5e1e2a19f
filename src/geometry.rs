//! Typed coordinate spaces.
//!
//! A capture run juggles three coordinate spaces: CSS/logical page units,
//! device (raster) pixels, and pixels within the final cropped composite.
//! Values are tagged with a zero-sized space marker so that mixing spaces is
//! caught at compile time instead of producing silently shifted labels.

use std::marker::PhantomData;

/// Marker for scale-independent CSS/logical page units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Css {}

/// Marker for device (raster) pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {}

/// A point tagged with its coordinate space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point<S> {
    pub x: f64,
    pub y: f64,
    _space: PhantomData<S>,
}

impl<S> Point<S> {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, _space: PhantomData }
    }
}

impl Point<Css> {
    /// Convert to device pixels with the given device-to-logical scale
    pub fn to_device(self, scale: f64) -> Point<Device> {
        Point::new(self.x * scale, self.y * scale)
    }

    /// Shift vertically (e.g. re-express relative to a capture start offset)
    pub fn shifted_y(self, dy: f64) -> Self {
        Point::new(self.x, self.y + dy)
    }
}

/// An axis-aligned rectangle tagged with its coordinate space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect<S> {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    _space: PhantomData<S>,
}

impl<S> Rect<S> {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width: width.max(0.0),
            height: height.max(0.0),
            _space: PhantomData,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// True when the rectangles overlap with positive area
    pub fn intersects(&self, other: &Rect<S>) -> bool {
        self.right() > other.left
            && self.left < other.right()
            && self.bottom() > other.top
            && self.top < other.bottom()
    }
}

impl Rect<Css> {
    pub fn to_device(self, scale: f64) -> Rect<Device> {
        Rect::new(
            self.left * scale,
            self.top * scale,
            self.width * scale,
            self.height * scale,
        )
    }

    pub fn shifted_y(self, dy: f64) -> Self {
        Rect::new(self.left, self.top + dy, self.width, self.height)
    }
}

/// Maps page-absolute CSS coordinates into pixel coordinates within the final
/// composite. Crop accumulators grow as post-processing steps commit crops.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateMap {
    /// Device-to-logical scale of the composite (after any output downscale)
    pub scale: f64,
    /// CSS offset of the composite's top edge within the document
    pub start_y_css: f64,
    /// CSS units cropped from the left edge so far
    pub crop_left_css: f64,
    /// CSS units cropped from the top edge so far
    pub crop_top_css: f64,
}

impl CoordinateMap {
    pub fn new(scale: f64, start_y_css: f64) -> Self {
        Self { scale, start_y_css, crop_left_css: 0.0, crop_top_css: 0.0 }
    }

    /// Re-express a page-absolute point in composite-relative CSS units
    pub fn to_composite_css(&self, p: Point<Css>) -> Point<Css> {
        Point::new(
            p.x - self.crop_left_css,
            p.y - self.start_y_css - self.crop_top_css,
        )
    }

    /// Map a page-absolute point to pixel coordinates in the composite
    pub fn to_pixel(&self, p: Point<Css>) -> (i64, i64) {
        let c = self.to_composite_css(p);
        ((c.x * self.scale).round() as i64, (c.y * self.scale).round() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_css_to_device() {
        let p = Point::<Css>::new(10.0, 20.0).to_device(2.0);
        assert_eq!((p.x, p.y), (20.0, 40.0));
    }

    #[test]
    fn rect_intersections() {
        let a = Rect::<Css>::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::<Css>::new(5.0, 5.0, 10.0, 10.0);
        let c = Rect::<Css>::new(10.0, 0.0, 5.0, 5.0);
        assert!(a.intersects(&b));
        // Touching edges do not count as overlap
        assert!(!a.intersects(&c));
    }

    #[test]
    fn map_round_trip_matches_composite() {
        let mut map = CoordinateMap::new(2.0, 0.0);
        map.crop_left_css = 10.0;
        let (x, y) = map.to_pixel(Point::new(120.0, 2500.0));
        assert_eq!((x, y), (220, 5000));
    }

    #[test]
    fn map_applies_start_offset_and_top_crop() {
        let mut map = CoordinateMap::new(1.5, 100.0);
        map.crop_top_css = 20.0;
        let (x, y) = map.to_pixel(Point::new(40.0, 220.0));
        assert_eq!(x, 60);
        assert_eq!(y, 150);
    }
}
