//! Shared fixtures for `vigil` binary tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use image::{ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;

pub const MODEL_JSON: &str = r#"{"rules":[{"label":"weapon","min":[200,0,0],"max":[255,60,60],"min_pixels":4}]}"#;

/// A temporary working directory with a color-rule model named `weapons`.
pub struct Workspace {
    pub root: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let model_dir = root.path().join("models").join("weapons");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join("model.json"), MODEL_JSON).unwrap();
        Self { root }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn results(&self) -> PathBuf {
        self.root.path().join("results")
    }

    /// `vigil` running inside the workspace with its directories pinned.
    pub fn vigil(&self) -> Command {
        let mut cmd = Command::cargo_bin("vigil").unwrap();
        cmd.current_dir(self.path())
            .env_remove("RUST_LOG")
            .args(["--model-kind", "color-rule"])
            .arg("--model-dir")
            .arg(self.path().join("models"))
            .arg("--results-dir")
            .arg(self.results())
            .args(["--request-threads", "1"]);
        cmd
    }

    /// Write a PNG to `name`, with a red square when `with_target` is set.
    pub fn image(&self, name: &str, with_target: bool) -> PathBuf {
        let mut frame = RgbImage::from_pixel(32, 32, Rgb([20, 20, 20]));
        if with_target {
            for x in 8..20 {
                for y in 8..20 {
                    frame.put_pixel(x, y, Rgb([240, 10, 10]));
                }
            }
        }
        let mut bytes = Cursor::new(Vec::new());
        frame.write_to(&mut bytes, ImageFormat::Png).unwrap();
        let path = self.path().join(name);
        std::fs::write(&path, bytes.into_inner()).unwrap();
        path
    }
}
