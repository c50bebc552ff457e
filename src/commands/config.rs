use anyhow::Result;
use log::debug;
use std::path::PathBuf;

use super::paths::default_cache_root;
use crate::install::{ProcessRunner, UvInstaller};
use crate::resolve::ResolverOptions;
use crate::runtime::Runtime;

pub const UV_ENV: &str = "PKGLINK_UV";
pub const UVX_ENV: &str = "PKGLINK_UVX";

/// Everything a command needs, resolved once from flags and environment.
pub struct Config<R: Runtime> {
    pub runtime: R,
    pub cache_root: PathBuf,
    pub uv_program: String,
    pub uvx_program: String,
    pub resolver: ResolverOptions,
}

impl<R: Runtime> Config<R> {
    pub fn new(runtime: R, cache_dir: Option<PathBuf>) -> Result<Self> {
        let cache_root = match cache_dir {
            Some(path) => path,
            None => default_cache_root(&runtime)?,
        };
        let uv_program = runtime.env_var(UV_ENV).unwrap_or_else(|_| "uv".to_string());
        let uvx_program = runtime
            .env_var(UVX_ENV)
            .unwrap_or_else(|_| "uvx".to_string());
        debug!(
            "Cache root {:?}, installers {} / {}",
            cache_root, uv_program, uvx_program
        );

        Ok(Self {
            runtime,
            cache_root,
            uv_program,
            uvx_program,
            resolver: ResolverOptions::default(),
        })
    }

    pub fn installer(&self) -> UvInstaller<'_, R, ProcessRunner> {
        UvInstaller::new(
            &self.runtime,
            ProcessRunner,
            self.uv_program.clone(),
            self.uvx_program.clone(),
        )
    }
}
