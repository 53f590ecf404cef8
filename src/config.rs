use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::app::{BgTheme, LoadingTheme};
use crate::glow::GlowSettings;
use crate::reload::ReloadConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendChoice {
    /// Direct3D 12, falling back to Direct3D 11 if device creation fails.
    Auto,
    Dx12,
    Dx11,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "hvkrender", about = "Dual-backend glow UI renderer")]
pub struct AppConfig {
    /// Rendering backend
    #[arg(long, value_enum, env = "HVK_BACKEND", default_value_t = BackendChoice::Auto)]
    pub backend: BackendChoice,

    /// Directory holding background images and loading icon frames
    #[arg(long, value_name = "DIR", env = "HVK_ASSETS_DIR", default_value = "assets")]
    pub assets_dir: PathBuf,

    /// Background shown at startup
    #[arg(long, value_enum, default_value_t = BgTheme::Black)]
    pub bg_theme: BgTheme,

    /// Loading spinner variant
    #[arg(long, value_enum, default_value_t = LoadingTheme::Dark)]
    pub loading_theme: LoadingTheme,

    /// Slots in the shader-visible descriptor heap
    #[arg(long, default_value_t = 128, value_parser = clap::value_parser!(u32).range(8..=4096))]
    pub srv_heap_size: u32,

    /// Frames the CPU may record ahead of the GPU
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..=3))]
    pub frames_in_flight: u32,

    /// Delay before a background reload reads the disk
    #[arg(long, value_name = "MS", default_value_t = 1300)]
    pub reload_debounce_ms: u64,

    /// Frame rate cap when vsync is off
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub target_fps: u32,

    /// Present with vsync
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub vsync: bool,

    #[arg(long, default_value_t = 4.0)]
    pub glow_radius: f32,

    #[arg(long, default_value_t = 1.0)]
    pub glow_intensity: f32,

    /// Log filter, e.g. `debug` or `hvkrender::reload=trace`. RUST_LOG wins.
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,
}

impl AppConfig {
    pub fn reload_config(&self) -> ReloadConfig {
        ReloadConfig {
            debounce: Duration::from_millis(self.reload_debounce_ms),
            ..ReloadConfig::default()
        }
    }

    pub fn glow_settings(&self) -> GlowSettings {
        GlowSettings {
            radius: self.glow_radius.max(0.0),
            intensity: self.glow_intensity.max(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = AppConfig::try_parse_from(["hvkrender"]).unwrap();
        assert_eq!(config.backend, BackendChoice::Auto);
        assert_eq!(config.srv_heap_size, 128);
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.reload_config().debounce, Duration::from_millis(1300));
        assert_eq!(config.reload_config().loading_target_fps, 60);
        assert_eq!(config.glow_settings(), GlowSettings::default());
        assert!(!config.vsync);
    }

    #[test]
    fn flags_override_defaults() {
        let config = AppConfig::try_parse_from([
            "hvkrender",
            "--backend",
            "dx11",
            "--bg-theme",
            "purple",
            "--reload-debounce-ms",
            "0",
            "--glow-intensity",
            "2.5",
            "--vsync",
        ])
        .unwrap();
        assert_eq!(config.backend, BackendChoice::Dx11);
        assert_eq!(config.bg_theme, BgTheme::Purple);
        assert!(config.reload_config().debounce.is_zero());
        assert_eq!(config.glow_settings().intensity, 2.5);
        assert!(config.vsync);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(AppConfig::try_parse_from(["hvkrender", "--frames-in-flight", "0"]).is_err());
        assert!(AppConfig::try_parse_from(["hvkrender", "--srv-heap-size", "2"]).is_err());
    }
}
