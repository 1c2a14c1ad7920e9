// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::util::read_spv;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Hands out SPIR-V words by shader name (`vert`, `frag`).
pub trait ShaderSource {
    fn load(&self, name: &str) -> Result<Vec<u32>>;
}

/// Reads `<dir>/<name>.spv`.
pub struct SpirvDir {
    dir: PathBuf,
}

impl SpirvDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.spv"))
    }
}

impl ShaderSource for SpirvDir {
    fn load(&self, name: &str) -> Result<Vec<u32>> {
        let path = self.path_for(name);
        let bytes = std::fs::read(&path).with_context(|| {
            format!(
                "read shader {} (build with --features embed-shaders, or compile \
                 shaders/fbview.{} with glslc into this directory)",
                path.display(),
                name
            )
        })?;
        decode_spirv(&bytes).with_context(|| format!("decode shader {}", path.display()))
    }
}

/// Byte blob → SPIR-V words; checks length and magic, fixes endianness.
pub fn decode_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    Ok(read_spv(&mut Cursor::new(bytes))?)
}

/// SPIR-V compiled from `shaders/*.vert|frag` by the build script.
#[cfg(feature = "embed-shaders")]
pub struct Embedded;

#[cfg(feature = "embed-shaders")]
impl ShaderSource for Embedded {
    fn load(&self, name: &str) -> Result<Vec<u32>> {
        let bytes: &[u8] = match name {
            "vert" => include_bytes!(concat!(env!("OUT_DIR"), "/vert.spv")),
            "frag" => include_bytes!(concat!(env!("OUT_DIR"), "/frag.spv")),
            other => anyhow::bail!("no embedded shader named {other:?}"),
        };
        decode_spirv(bytes).with_context(|| format!("decode embedded shader {name}"))
    }
}

/// Embedded shaders when built with `embed-shaders`, else files under `dir`.
pub fn shader_source(dir: &Path) -> Box<dyn ShaderSource> {
    #[cfg(feature = "embed-shaders")]
    {
        let _ = dir;
        Box::new(Embedded)
    }
    #[cfg(not(feature = "embed-shaders"))]
    {
        Box::new(SpirvDir::new(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: u32 = 0x0723_0203;

    fn words_to_le(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn decodes_little_endian_words() {
        let words = [MAGIC, 0x0001_0000, 0, 7, 0];
        assert_eq!(decode_spirv(&words_to_le(&words)).unwrap(), words);
    }

    #[test]
    fn byte_swapped_module_is_normalised() {
        let words = [MAGIC, 0x0001_0000, 42];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        assert_eq!(decode_spirv(&bytes).unwrap(), words);
    }

    #[test]
    fn rejects_truncated_and_foreign_blobs() {
        let mut bytes = words_to_le(&[MAGIC, 1]);
        bytes.pop();
        assert!(decode_spirv(&bytes).is_err());
        assert!(decode_spirv(&words_to_le(&[0xDEAD_BEEF, 1])).is_err());
        assert!(decode_spirv(&[]).is_err());
    }

    #[test]
    fn loads_named_shader_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let words = [MAGIC, 0x0001_0000, 1, 2, 3];
        std::fs::write(dir.path().join("vert.spv"), words_to_le(&words)).unwrap();

        let src = SpirvDir::new(dir.path());
        assert_eq!(src.load("vert").unwrap(), words);
    }

    #[test]
    fn missing_shader_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let src = SpirvDir::new(dir.path());

        let err = src.load("frag").unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("frag.spv"), "{msg}");
        assert!(msg.contains("fbview.frag"), "{msg}");
    }
}
