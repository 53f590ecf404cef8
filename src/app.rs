use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::ValueEnum;

use crate::config::AppConfig;
use crate::glow::GlowSettings;
use crate::reload::FrontendSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BgTheme {
    Black,
    Purple,
    Yellow,
    Blue,
    Green,
    Red,
}

impl BgTheme {
    pub const ALL: [BgTheme; 6] = [
        BgTheme::Black,
        BgTheme::Purple,
        BgTheme::Yellow,
        BgTheme::Blue,
        BgTheme::Green,
        BgTheme::Red,
    ];

    pub fn label(self) -> &'static str {
        match self {
            BgTheme::Black => "Black",
            BgTheme::Purple => "Purple",
            BgTheme::Yellow => "Yellow",
            BgTheme::Blue => "Blue",
            BgTheme::Green => "Green",
            BgTheme::Red => "Red",
        }
    }

    pub fn file_name(self) -> String {
        format!("Galaxy_{}.png", self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LoadingTheme {
    Dark,
    Light,
}

impl LoadingTheme {
    pub fn label(self) -> &'static str {
        match self {
            LoadingTheme::Dark => "Dark",
            LoadingTheme::Light => "Light",
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            LoadingTheme::Dark => "LoadingIcon",
            LoadingTheme::Light => "LoadingIconLight",
        }
    }

    pub fn frame_count(self) -> usize {
        match self {
            LoadingTheme::Dark => 31,
            LoadingTheme::Light => 30,
        }
    }
}

/// Things the UI asked for this frame that need the renderer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UiActions {
    pub reload_background: Option<PathBuf>,
    pub swap_loading_theme: Option<LoadingTheme>,
}

pub struct AppState {
    pub frontend: FrontendSettings,
    pub glow: GlowSettings,
    pub glow_enabled: bool,
    pub bg_theme: BgTheme,
    pub loading_theme: LoadingTheme,
    pub show_ui: bool,
    assets_dir: PathBuf,
    start_time: Instant,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            frontend: FrontendSettings {
                vsync: config.vsync,
                target_fps: config.target_fps,
                is_loading: false,
            },
            glow: config.glow_settings(),
            glow_enabled: true,
            bg_theme: config.bg_theme,
            loading_theme: config.loading_theme,
            show_ui: true,
            assets_dir: config.assets_dir.clone(),
            start_time: Instant::now(),
        }
    }

    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    pub fn background_path(&self) -> PathBuf {
        self.assets_dir.join(self.bg_theme.file_name())
    }

    pub fn loading_dir(&self) -> PathBuf {
        self.assets_dir.join(self.loading_theme.dir_name())
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn toggle_ui(&mut self) {
        self.show_ui = !self.show_ui;
    }

    /// Switch background theme. Returns the image to load when it changed.
    pub fn select_bg_theme(&mut self, theme: BgTheme) -> Option<PathBuf> {
        if theme == self.bg_theme {
            return None;
        }
        self.bg_theme = theme;
        Some(self.background_path())
    }

    pub fn select_loading_theme(&mut self, theme: LoadingTheme) -> Option<LoadingTheme> {
        if theme == self.loading_theme {
            return None;
        }
        self.loading_theme = theme;
        Some(theme)
    }
}

/// Sleeps out the rest of the frame interval when vsync is off.
pub struct FrameLimiter {
    last_frame: Instant,
}

impl Default for FrameLimiter {
    fn default() -> Self {
        Self {
            last_frame: Instant::now(),
        }
    }
}

impl FrameLimiter {
    pub fn frame_budget(target_fps: u32) -> Option<Duration> {
        (target_fps > 0).then(|| Duration::from_nanos(1_000_000_000 / target_fps as u64))
    }

    /// Time left in the current frame interval, measured from the previous call.
    pub fn remaining(&self, now: Instant, target_fps: u32) -> Duration {
        match Self::frame_budget(target_fps) {
            Some(budget) => budget.saturating_sub(now.saturating_duration_since(self.last_frame)),
            None => Duration::ZERO,
        }
    }

    /// Call after present.
    pub fn limit(&mut self, settings: &FrontendSettings) {
        if !settings.vsync {
            let wait = self.remaining(Instant::now(), settings.target_fps);
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
        self.last_frame = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn theme_paths_live_under_the_assets_dir() {
        let config = AppConfig::try_parse_from(["hvkrender", "--assets-dir", "/data/assets"]).unwrap();
        let mut app = AppState::new(&config);
        assert_eq!(app.background_path(), Path::new("/data/assets/Galaxy_Black.png"));
        assert_eq!(app.loading_dir(), Path::new("/data/assets/LoadingIcon"));

        assert_eq!(app.select_bg_theme(BgTheme::Black), None);
        assert_eq!(
            app.select_bg_theme(BgTheme::Red),
            Some(PathBuf::from("/data/assets/Galaxy_Red.png"))
        );
        assert_eq!(app.select_loading_theme(LoadingTheme::Light), Some(LoadingTheme::Light));
        assert_eq!(app.loading_dir(), Path::new("/data/assets/LoadingIconLight"));
    }

    #[test]
    fn every_theme_has_a_distinct_file() {
        let mut names: Vec<_> = BgTheme::ALL.iter().map(|t| t.file_name()).collect();
        names.dedup();
        assert_eq!(names.len(), 6);
        assert_eq!(LoadingTheme::Dark.frame_count(), 31);
        assert_eq!(LoadingTheme::Light.frame_count(), 30);
    }

    #[test]
    fn limiter_budget_follows_target_fps() {
        assert_eq!(FrameLimiter::frame_budget(0), None);
        assert_eq!(FrameLimiter::frame_budget(50), Some(Duration::from_millis(20)));

        let limiter = FrameLimiter::default();
        let start = limiter.last_frame;
        assert_eq!(
            limiter.remaining(start + Duration::from_millis(5), 50),
            Duration::from_millis(15)
        );
        assert_eq!(limiter.remaining(start + Duration::from_millis(40), 50), Duration::ZERO);
    }

    #[test]
    fn vsync_skips_the_sleep() {
        let mut limiter = FrameLimiter::default();
        let settings = FrontendSettings {
            vsync: true,
            target_fps: 1,
            is_loading: false,
        };
        let before = Instant::now();
        limiter.limit(&settings);
        assert!(before.elapsed() < Duration::from_millis(500));
    }
}
