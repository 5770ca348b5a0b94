use common::buffer2::{Buffer2, BufferShapeError};
use rand::Rng;

pub type Pixel = u8;

pub const PIXEL_MAX: Pixel = Pixel::MAX;

pub type ImageError = BufferShapeError;

/// Mirror of `value` within the pixel domain.
#[inline]
pub fn invert(value: Pixel) -> Pixel {
    PIXEL_MAX - value
}

/// Grayscale image. Never mutated after construction, so stages share it freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelImage {
    buffer: Buffer2<Pixel>,
}

impl PixelImage {
    pub fn new(width: usize, height: usize, pixels: Vec<Pixel>) -> Result<Self, ImageError> {
        Ok(Self {
            buffer: Buffer2::new(width, height, pixels)?,
        })
    }

    pub fn filled(width: usize, height: usize, value: Pixel) -> Result<Self, ImageError> {
        Ok(Self {
            buffer: Buffer2::new_filled(width, height, value)?,
        })
    }

    pub fn random<R: Rng>(
        width: usize,
        height: usize,
        rng: &mut R,
    ) -> Result<Self, ImageError> {
        let pixels = (0..width.saturating_mul(height))
            .map(|_| rng.random::<Pixel>())
            .collect();
        Self::new(width, height, pixels)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.buffer.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.buffer.height()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[inline]
    pub fn pixels(&self) -> &[Pixel] {
        self.buffer.values()
    }

    /// Panics when `index` is outside the image.
    #[inline]
    pub fn get_pixel(&self, index: usize) -> Pixel {
        self.buffer[index]
    }

    /// Panics when `(x, y)` is outside the image.
    #[inline]
    pub fn pixel_at(&self, x: usize, y: usize) -> Pixel {
        *self.buffer.get(x, y)
    }

    #[inline]
    pub fn coords(&self, index: usize) -> (usize, usize) {
        self.buffer.coords(index)
    }

    /// Indices of the up to eight pixels surrounding `index`: left column top to bottom,
    /// then the pixels above and below, then the right column.
    pub fn get_border(&self, index: usize) -> Vec<usize> {
        self.buffer.neighbors(index)
    }

    pub fn max_value(&self) -> Pixel {
        self.pixels().iter().copied().max().unwrap_or(0)
    }

    pub fn min_value(&self) -> Pixel {
        self.pixels().iter().copied().min().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn corners(width: usize, height: usize) -> [usize; 4] {
        [0, width - 1, (height - 1) * width, height * width - 1]
    }

    #[test]
    fn invert_is_an_involution() {
        for value in 0..=PIXEL_MAX {
            assert_eq!(invert(value), PIXEL_MAX - value);
            assert_eq!(invert(invert(value)), value);
        }
    }

    #[test]
    fn border_counts_by_position() {
        for (width, height) in [(3, 3), (4, 4), (7, 5), (3, 9)] {
            let image = PixelImage::filled(width, height, 0).unwrap();
            for index in 0..image.len() {
                let (x, y) = image.coords(index);
                let on_x_edge = x == 0 || x == width - 1;
                let on_y_edge = y == 0 || y == height - 1;
                let expected = match (on_x_edge, on_y_edge) {
                    (true, true) => 3,
                    (true, false) | (false, true) => 5,
                    (false, false) => 8,
                };
                assert_eq!(
                    image.get_border(index).len(),
                    expected,
                    "{width}x{height} index {index}"
                );
            }
            for corner in corners(width, height) {
                assert_eq!(image.get_border(corner).len(), 3);
            }
        }
    }

    #[test]
    fn border_of_interior_pixel_in_4x4() {
        let image = PixelImage::filled(4, 4, 0).unwrap();
        assert_eq!(image.coords(5), (1, 1));
        assert_eq!(image.get_border(5), vec![0, 4, 8, 1, 9, 2, 6, 10]);
    }

    #[test]
    fn single_pixel_image_has_empty_border() {
        let image = PixelImage::filled(1, 1, 42).unwrap();
        assert!(image.get_border(0).is_empty());
    }

    #[test]
    fn pixel_access_by_index_and_coordinate() {
        let image = PixelImage::new(3, 2, vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(image.get_pixel(4), 5);
        assert_eq!(image.pixel_at(1, 1), 5);
        assert_eq!(image.max_value(), 6);
        assert_eq!(image.min_value(), 1);
    }

    #[test]
    #[should_panic]
    fn out_of_range_index_fails_fast() {
        let image = PixelImage::filled(2, 2, 0).unwrap();
        image.get_pixel(4);
    }

    #[test]
    fn construction_rejects_bad_shapes() {
        assert!(PixelImage::new(2, 2, vec![0; 3]).is_err());
        assert!(PixelImage::filled(0, 2, 0).is_err());
    }

    #[test]
    fn random_images_are_reproducible_with_a_seed() {
        let a = PixelImage::random(16, 8, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = PixelImage::random(16, 8, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 128);
    }
}
