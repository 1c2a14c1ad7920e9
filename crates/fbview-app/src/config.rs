// SPDX-License-Identifier: CEPL-1.0
use clap::Parser;
use fbview_platform::WindowSpec;
use fbview_render::{RenderConfig, RenderSize};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Config file (TOML); defaults apply when missing or invalid
    #[arg(long, default_value = "fbview.toml")]
    pub config: PathBuf,

    /// Initial window width in pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Initial window height in pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Directory holding vert.spv and frag.spv
    #[arg(long)]
    pub shader_dir: Option<PathBuf>,

    /// Disable the Khronos validation layer in debug builds
    #[arg(long)]
    pub no_validation: bool,

    /// Exit after this many presented frames
    #[arg(long)]
    pub frames: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "fbview".into(),
            width: 640,
            height: 480,
            min_width: 480,
            min_height: 360,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default = "default_max_side")]
    pub max_width: u32,
    #[serde(default = "default_max_side")]
    pub max_height: u32,
    #[serde(default = "default_shader_dir")]
    pub shader_dir: PathBuf,
    #[serde(default = "default_true")]
    pub validation: bool,
    #[serde(default = "default_true")]
    pub prefer_discrete: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            max_width: default_max_side(),
            max_height: default_max_side(),
            shader_dir: default_shader_dir(),
            validation: true,
            prefer_discrete: true,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
}

fn default_clear() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}
fn default_max_side() -> u32 {
    4096
}
fn default_shader_dir() -> PathBuf {
    PathBuf::from("shaders")
}
fn default_true() -> bool {
    true
}

pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match toml::from_str::<AppCfg>(&s) {
            Ok(mut cfg) => {
                cfg.sanitize();
                cfg
            }
            Err(e) => {
                warn!("{}: {e}; using defaults", path.display());
                AppCfg::default()
            }
        },
        Err(e) => {
            debug!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

impl AppCfg {
    /// Raises the max frame size to the minimum window size (and to at least 1x1).
    pub fn sanitize(&mut self) {
        let w = self.render.max_width.max(self.window.min_width).max(1);
        let h = self.render.max_height.max(self.window.min_height).max(1);
        if (w, h) != (self.render.max_width, self.render.max_height) {
            warn!(
                "render max {}x{} below window min {}x{}; using {w}x{h}",
                self.render.max_width,
                self.render.max_height,
                self.window.min_width,
                self.window.min_height
            );
            self.render.max_width = w;
            self.render.max_height = h;
        }
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(w) = args.width {
            self.window.width = w;
        }
        if let Some(h) = args.height {
            self.window.height = h;
        }
        if let Some(dir) = &args.shader_dir {
            self.render.shader_dir = dir.clone();
        }
        if args.no_validation {
            self.render.validation = false;
        }
    }

    pub fn min_size(&self) -> RenderSize {
        RenderSize::new(self.window.min_width, self.window.min_height)
    }

    pub fn max_size(&self) -> RenderSize {
        RenderSize::new(self.render.max_width, self.render.max_height)
    }

    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec {
            title: self.window.title.clone(),
            size: RenderSize::new(self.window.width, self.window.height),
            min_size: self.min_size(),
            max_size: self.max_size(),
        }
    }

    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            clear_color: self.render.clear_color,
            min_size: self.min_size(),
            max_size: self.max_size(),
            shader_dir: self.render.shader_dir.clone(),
            validation: self.render.validation,
            prefer_discrete: self.render.prefer_discrete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg: AppCfg = toml::from_str("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.min_height, 360);
        assert_eq!(cfg.render.max_width, 4096);
        assert!(cfg.render.validation);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: AppCfg = toml::from_str(
            r#"
            [window]
            title = "noise"
            width = 1280

            [render]
            clear_color = [0.1, 0.2, 0.3, 1.0]
            validation = false
            "#,
        )
        .unwrap();

        assert_eq!(cfg.window.title, "noise");
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.window.height, 480);
        assert_eq!(cfg.render.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert!(!cfg.render.validation);
        assert!(cfg.render.prefer_discrete);
        assert_eq!(cfg.render.shader_dir, PathBuf::from("shaders"));
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[window]\nwidth = \"wide\"").unwrap();

        assert_eq!(load_cfg(f.path()), AppCfg::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_cfg(&dir.path().join("nope.toml")), AppCfg::default());
    }

    #[test]
    fn file_values_are_loaded() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[render]\nmax_width = 1920\nmax_height = 1080").unwrap();

        let cfg = load_cfg(f.path());
        assert_eq!(cfg.max_size(), RenderSize::new(1920, 1080));
    }

    #[test]
    fn max_size_is_raised_to_window_minimum() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[render]\nmax_width = 0\nmax_height = 200").unwrap();

        let cfg = load_cfg(f.path());
        assert_eq!(cfg.max_size(), RenderSize::new(480, 360));
        assert_eq!(cfg.render_config().max_size, cfg.window_spec().max_size);
    }

    #[test]
    fn zero_limits_still_give_a_nonempty_max() {
        let mut cfg: AppCfg = toml::from_str(
            "[window]\nmin_width = 0\nmin_height = 0\n[render]\nmax_width = 0\nmax_height = 0",
        )
        .unwrap();
        cfg.sanitize();
        assert_eq!(cfg.max_size(), RenderSize::new(1, 1));
    }

    #[test]
    fn cli_overrides_file() {
        let args = Args::parse_from([
            "fbview",
            "--width",
            "800",
            "--height",
            "600",
            "--shader-dir",
            "/tmp/spv",
            "--no-validation",
            "--frames",
            "10",
        ]);
        let mut cfg = AppCfg::default();
        cfg.apply_args(&args);

        assert_eq!(cfg.window.width, 800);
        assert_eq!(cfg.window.height, 600);
        assert_eq!(cfg.render.shader_dir, PathBuf::from("/tmp/spv"));
        assert!(!cfg.render.validation);
        assert_eq!(args.frames, Some(10));
        assert_eq!(args.config, PathBuf::from("fbview.toml"));
    }

    #[test]
    fn maps_into_engine_and_window_config() {
        let cfg = AppCfg::default();

        let rc = cfg.render_config();
        assert_eq!(rc.min_size, RenderSize::new(480, 360));
        assert_eq!(rc.max_size, RenderSize::new(4096, 4096));
        assert_eq!(rc.clear_color, [0.0, 0.0, 0.0, 1.0]);

        let ws = cfg.window_spec();
        assert_eq!(ws.size, RenderSize::new(640, 480));
        assert_eq!(ws.max_size, rc.max_size);
    }
}
