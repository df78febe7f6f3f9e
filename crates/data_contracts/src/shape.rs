use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which inputs a sample (and the model consuming it) carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InputArity {
    /// Image stack plus label.
    ImageOnly,
    /// Image stack, initial-condition map, and label.
    ImageAndInit,
}

impl InputArity {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputArity::ImageOnly => "image_only",
            InputArity::ImageAndInit => "image_and_init",
        }
    }

    pub fn has_init(&self) -> bool {
        matches!(self, InputArity::ImageAndInit)
    }
}

impl std::fmt::Display for InputArity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-sample image geometry (channel-first).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SampleShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("sample shape has a zero-sized dimension: {0:?}")]
    ZeroDimension(SampleShape),
    #[error("map {height}x{width} does not match sample geometry {expected_height}x{expected_width}")]
    SpatialMismatch {
        height: usize,
        width: usize,
        expected_height: usize,
        expected_width: usize,
    },
}

impl SampleShape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Number of elements in one spatial map (`height * width`).
    pub fn plane(&self) -> usize {
        self.height * self.width
    }

    /// Number of elements in one image stack (`channels * height * width`).
    pub fn volume(&self) -> usize {
        self.channels * self.plane()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.channels == 0 || self.height == 0 || self.width == 0 {
            return Err(ValidationError::ZeroDimension(*self));
        }
        Ok(())
    }

    /// Check that a `height x width` map lines up with this geometry.
    pub fn check_plane(&self, height: usize, width: usize) -> Result<(), ValidationError> {
        if height != self.height || width != self.width {
            return Err(ValidationError::SpatialMismatch {
                height,
                width,
                expected_height: self.height,
                expected_width: self.width,
            });
        }
        Ok(())
    }
}
