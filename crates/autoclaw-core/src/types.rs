//! Geometry and capture types shared by the engine and desktop backends.

use serde::{Deserialize, Serialize};

/// Screen rectangle in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Center point of the region.
    pub fn center(&self) -> Point {
        Point {
            x: self.left + (self.width / 2) as i32,
            y: self.top + (self.height / 2) as i32,
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width, self.height, self.left, self.top
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A captured frame. `region` is `None` for a full-display capture.
#[derive(Debug, Clone, Default)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    /// Packed BGR pixels, row major.
    pub data: Vec<u8>,
    pub region: Option<Region>,
}

/// Template match result. `x`/`y` is the center of the match in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub x: i32,
    pub y: i32,
    pub score: f32,
}

impl Match {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Page segmentation hint passed to the text recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrMode {
    /// A single line of text.
    #[default]
    Line,
    /// A block of free-form text.
    Block,
    /// Digits only (counters, resource readouts).
    Digits,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_center() {
        let r = Region::new(500, 300, 200, 50);
        assert_eq!(r.center(), Point::new(600, 325));
        assert_eq!(r.to_string(), "200x50+500+300");
    }
}
