use image::{imageops, Rgba, RgbaImage};

/// Drawing target for annotated frames
pub trait Surface: Send {
    /// Current surface size; (0, 0) means "adopt the image size"
    fn dimensions(&self) -> (u32, u32);

    fn clear(&mut self);

    /// Draw an image already scaled to `dimensions()`
    fn draw(&mut self, image: &RgbaImage);

    /// Copy of what is currently shown, if the surface can provide one
    fn snapshot(&self) -> Option<RgbaImage> {
        None
    }
}

/// In-memory canvas
#[derive(Debug, Clone)]
pub struct ImageSurface {
    canvas: RgbaImage,
    frames_drawn: u64,
}

impl ImageSurface {
    /// Fixed-size canvas; images are scaled to fit
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::new(width, height),
            frames_drawn: 0,
        }
    }

    /// Canvas that takes the size of the first image drawn on it
    pub fn adaptive() -> Self {
        Self::new(0, 0)
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }
}

impl Surface for ImageSurface {
    fn dimensions(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    fn clear(&mut self) {
        for pixel in self.canvas.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    fn draw(&mut self, image: &RgbaImage) {
        if self.canvas.width() == 0 || self.canvas.height() == 0 {
            self.canvas = image.clone();
        } else {
            imageops::replace(&mut self.canvas, image, 0, 0);
        }
        self.frames_drawn += 1;
    }

    fn snapshot(&self) -> Option<RgbaImage> {
        if self.frames_drawn == 0 {
            return None;
        }
        Some(self.canvas.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adaptive_surface_adopts_first_image() {
        let mut surface = ImageSurface::adaptive();
        assert!(surface.snapshot().is_none());

        surface.draw(&RgbaImage::from_pixel(8, 6, Rgba([9, 9, 9, 255])));
        assert_eq!(surface.dimensions(), (8, 6));
        assert_eq!(surface.frames_drawn(), 1);

        surface.clear();
        assert_eq!(surface.canvas().get_pixel(0, 0), &Rgba([0, 0, 0, 0]));
    }
}
