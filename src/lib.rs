pub mod app;
pub mod config;
pub mod font;
#[cfg(windows)]
mod d3d;
pub mod glow;
pub mod gpu;
pub mod loading;
pub mod logging;
pub mod reload;
pub mod render;
pub mod ui;

#[cfg(windows)]
pub mod dx11;
#[cfg(windows)]
pub mod dx12;
#[cfg(windows)]
pub mod shell;

#[cfg(test)]
mod test_support;
