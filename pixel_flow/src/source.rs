use std::collections::VecDeque;
use std::sync::Arc;

use crate::image::PixelImage;

/// Feeds images into the pipeline. `None` ends the run.
pub trait ImageSource: Send {
    fn next_image(&mut self) -> Option<Arc<PixelImage>>;

    /// Images left, when known.
    fn remaining(&self) -> Option<usize> {
        None
    }
}

impl<S: ImageSource + ?Sized> ImageSource for Box<S> {
    fn next_image(&mut self) -> Option<Arc<PixelImage>> {
        (**self).next_image()
    }

    fn remaining(&self) -> Option<usize> {
        (**self).remaining()
    }
}

/// Yields each image once, in order.
#[derive(Debug, Default)]
pub struct ImageList {
    images: VecDeque<Arc<PixelImage>>,
}

impl ImageList {
    pub fn new<I: IntoIterator<Item = PixelImage>>(images: I) -> Self {
        Self {
            images: images.into_iter().map(Arc::new).collect(),
        }
    }
}

impl ImageSource for ImageList {
    fn next_image(&mut self) -> Option<Arc<PixelImage>> {
        self.images.pop_front()
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.images.len())
    }
}

/// Yields the same image a fixed number of times.
#[derive(Debug)]
pub struct RepeatImage {
    image: Arc<PixelImage>,
    remaining: usize,
}

impl RepeatImage {
    pub fn new(image: PixelImage, count: usize) -> Self {
        Self {
            image: Arc::new(image),
            remaining: count,
        }
    }
}

impl ImageSource for RepeatImage {
    fn next_image(&mut self) -> Option<Arc<PixelImage>> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(Arc::clone(&self.image))
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_yields_each_image_once() {
        let mut source = ImageList::new((1..=3).map(|v| PixelImage::filled(1, 1, v).unwrap()));
        assert_eq!(source.remaining(), Some(3));

        let values: Vec<u8> = std::iter::from_fn(|| source.next_image())
            .map(|image| image.get_pixel(0))
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
        assert!(source.next_image().is_none());
    }

    #[test]
    fn repeat_shares_one_image() {
        let mut source = RepeatImage::new(PixelImage::filled(2, 2, 9).unwrap(), 3);
        let first = source.next_image().unwrap();
        let second = source.next_image().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.remaining(), Some(1));
        assert!(source.next_image().is_some());
        assert!(source.next_image().is_none());
    }
}
