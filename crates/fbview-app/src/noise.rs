// SPDX-License-Identifier: CEPL-1.0
use fbview_render::RenderSize;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

// Alpha is the fourth byte of each RGBA8 pixel regardless of host endianness.
const OPAQUE: u32 = u32::from_ne_bytes([0, 0, 0, 0xFF]);

/// Random RGBA8 noise into a buffer allocated once at the maximum frame size.
pub struct NoiseProducer {
    pixels: Vec<u32>,
    rng: SmallRng,
}

impl NoiseProducer {
    pub fn new(max: RenderSize) -> Self {
        Self::with_rng(max, SmallRng::from_entropy())
    }

    #[cfg(test)]
    pub fn with_seed(max: RenderSize, seed: u64) -> Self {
        Self::with_rng(max, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(max: RenderSize, rng: SmallRng) -> Self {
        Self {
            pixels: vec![0; max.width as usize * max.height as usize],
            rng,
        }
    }

    /// Fresh noise for `size`, tightly packed, `w*h*4` bytes. `None` if larger than the buffer.
    pub fn fill(&mut self, size: RenderSize) -> Option<&[u8]> {
        let n = size.width as usize * size.height as usize;
        let frame = self.pixels.get_mut(..n)?;
        for px in frame.iter_mut() {
            *px = self.rng.gen::<u32>() | OPAQUE;
        }
        Some(bytemuck::cast_slice(&self.pixels[..n]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_tightly_packed_and_opaque() {
        let mut noise = NoiseProducer::with_seed(RenderSize::new(64, 64), 7);

        let bytes = noise.fill(RenderSize::new(16, 8)).unwrap();

        assert_eq!(bytes.len(), 16 * 8 * 4);
        assert!(bytes.chunks_exact(4).all(|px| px[3] == 0xFF));
    }

    #[test]
    fn oversized_request_is_refused() {
        let mut noise = NoiseProducer::with_seed(RenderSize::new(8, 8), 1);
        assert!(noise.fill(RenderSize::new(9, 8)).is_none());
        assert_eq!(noise.fill(RenderSize::new(8, 8)).map(|b| b.len()), Some(256));
    }

    #[test]
    fn same_seed_same_frames() {
        let size = RenderSize::new(4, 4);
        let mut a = NoiseProducer::with_seed(size, 42);
        let mut b = NoiseProducer::with_seed(size, 42);

        let fa = a.fill(size).unwrap().to_vec();
        let fb = b.fill(size).unwrap().to_vec();
        assert_eq!(fa, fb);

        let fa2 = a.fill(size).unwrap().to_vec();
        assert_ne!(fa, fa2);
    }

    #[test]
    fn zero_area_is_empty() {
        let mut noise = NoiseProducer::with_seed(RenderSize::new(4, 4), 3);
        assert_eq!(noise.fill(RenderSize::new(0, 4)).map(|b| b.len()), Some(0));
    }
}
