// SPDX-License-Identifier: CEPL-1.0
use crate::RenderSize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("payload is {actual} bytes, expected {expected} for the current extent")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("frame of {required} bytes does not fit the {capacity}-byte staging buffer")]
    ExceedsStaging { required: usize, capacity: usize },

    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl UploadError {
    /// Rejected payloads leave the engine drawable; anything else is a device failure.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, UploadError::Fatal(_))
    }
}

/// Tightly packed RGBA8 byte count for `size`.
pub fn frame_bytes(size: RenderSize) -> usize {
    size.width as usize * size.height as usize * 4
}

/// Copies `payload` into the front of the mapped staging region.
///
/// Nothing is written unless the payload is exactly one frame at `extent` and that frame fits.
/// Returns the number of bytes staged.
pub fn stage_payload(
    payload: &[u8],
    extent: RenderSize,
    staging: &mut [u8],
) -> Result<usize, UploadError> {
    let expected = frame_bytes(extent);
    if payload.len() != expected {
        return Err(UploadError::SizeMismatch {
            expected,
            actual: payload.len(),
        });
    }
    if expected > staging.len() {
        return Err(UploadError::ExceedsStaging {
            required: expected,
            capacity: staging.len(),
        });
    }

    staging[..expected].copy_from_slice(payload);
    Ok(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_bytes_is_four_per_pixel() {
        assert_eq!(frame_bytes(RenderSize::new(640, 480)), 640 * 480 * 4);
        assert_eq!(frame_bytes(RenderSize::new(0, 480)), 0);
    }

    #[test]
    fn exact_payload_is_copied() {
        let extent = RenderSize::new(4, 2);
        let payload: Vec<u8> = (0..32).collect();
        let mut staging = vec![0xAA_u8; 64];

        let n = stage_payload(&payload, extent, &mut staging).unwrap();

        assert_eq!(n, 32);
        assert_eq!(&staging[..32], payload.as_slice());
        assert!(staging[32..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn short_payload_is_rejected_without_copy() {
        let extent = RenderSize::new(640, 480);
        let payload = vec![7_u8; frame_bytes(extent) - 1];
        let mut staging = vec![0_u8; frame_bytes(extent)];

        let err = stage_payload(&payload, extent, &mut staging).unwrap_err();

        match err {
            UploadError::SizeMismatch { expected, actual } => {
                assert_eq!(expected, 640 * 480 * 4);
                assert_eq!(actual, 640 * 480 * 4 - 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err_is_recoverable(&payload, extent));
        assert!(staging.iter().all(|&b| b == 0));
    }

    #[test]
    fn long_payload_is_rejected() {
        let extent = RenderSize::new(2, 2);
        let payload = vec![1_u8; 17];
        let mut staging = vec![0_u8; 64];

        assert!(matches!(
            stage_payload(&payload, extent, &mut staging),
            Err(UploadError::SizeMismatch { expected: 16, actual: 17 })
        ));
        assert!(staging.iter().all(|&b| b == 0));
    }

    #[test]
    fn frame_larger_than_staging_is_rejected() {
        let extent = RenderSize::new(8, 8);
        let payload = vec![1_u8; frame_bytes(extent)];
        let mut staging = vec![0_u8; 128];

        assert!(matches!(
            stage_payload(&payload, extent, &mut staging),
            Err(UploadError::ExceedsStaging { required: 256, capacity: 128 })
        ));
        assert!(staging.iter().all(|&b| b == 0));
    }

    #[test]
    fn fatal_errors_are_not_recoverable() {
        let err = UploadError::from(anyhow::anyhow!("device lost"));
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), "device lost");
    }

    fn err_is_recoverable(payload: &[u8], extent: RenderSize) -> bool {
        let mut staging = vec![0_u8; frame_bytes(extent)];
        stage_payload(payload, extent, &mut staging)
            .unwrap_err()
            .is_recoverable()
    }
}
