//! Backend-neutral half of the glow post-process: settings, per-pass
//! constants, the blur kernel and the shared HLSL.

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GlowSettings {
    /// Blur tap spacing multiplier, in texels.
    pub radius: f32,
    /// Scale applied to the blurred emissive when it is added back.
    pub intensity: f32,
}

impl Default for GlowSettings {
    fn default() -> Self {
        Self {
            radius: 4.0,
            intensity: 1.0,
        }
    }
}

/// Blur taps as `(offset in texels, weight)`, before radius scaling.
pub const BLUR_TAPS: [(f32, f32); 5] = [
    (0.0, 0.28),
    (1.5, 0.24),
    (-1.5, 0.24),
    (3.0, 0.12),
    (-3.0, 0.12),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlurAxis {
    Horizontal,
    Vertical,
}

impl BlurAxis {
    pub fn direction(self) -> Vec2 {
        match self {
            BlurAxis::Horizontal => Vec2::X,
            BlurAxis::Vertical => Vec2::Y,
        }
    }
}

/// The fixed pass order recorded every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlowPass {
    /// UI into the cleared emissive target.
    Emissive,
    /// Emissive to A, then A to B.
    Blur(BlurAxis),
    /// UI onto the real target.
    Base,
    /// B added onto the real target.
    Composite,
}

pub const GLOW_PASSES: [GlowPass; 5] = [
    GlowPass::Emissive,
    GlowPass::Blur(BlurAxis::Horizontal),
    GlowPass::Blur(BlurAxis::Vertical),
    GlowPass::Base,
    GlowPass::Composite,
];

/// Size of the off-screen targets. Never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetExtent {
    pub width: u32,
    pub height: u32,
}

impl TargetExtent {
    pub fn new(width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then_some(Self { width, height })
    }

    pub fn texel_size(self) -> Vec2 {
        Vec2::new(1.0 / self.width as f32, 1.0 / self.height as f32)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeAction {
    Keep,
    /// Release everything and recreate at the new extent.
    Rebuild(TargetExtent),
    /// Release everything; a zero-sized window has nothing to render into.
    Teardown,
}

pub fn resize_action(current: Option<TargetExtent>, width: u32, height: u32) -> ResizeAction {
    match (current, TargetExtent::new(width, height)) {
        (Some(current), Some(requested)) if current == requested => ResizeAction::Keep,
        (_, Some(requested)) => ResizeAction::Rebuild(requested),
        (Some(_), None) => ResizeAction::Teardown,
        (None, None) => ResizeAction::Keep,
    }
}

/// Everything a glow pipeline sizes to the window: off-screen targets and
/// the shaders and pipeline objects that render into them.
pub struct SizedResources<R> {
    built: Option<(TargetExtent, R)>,
}

impl<R> Default for SizedResources<R> {
    fn default() -> Self {
        Self { built: None }
    }
}

impl<R> SizedResources<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extent(&self) -> Option<TargetExtent> {
        self.built.as_ref().map(|(extent, _)| *extent)
    }

    pub fn get(&self) -> Option<(TargetExtent, &R)> {
        self.built.as_ref().map(|(extent, resources)| (*extent, resources))
    }

    /// Follow a window size. Any change releases the current set before
    /// `build` runs; a zero extent leaves nothing built. A failed build
    /// also leaves nothing.
    pub fn resize<E>(
        &mut self,
        width: u32,
        height: u32,
        build: impl FnOnce(TargetExtent) -> Result<R, E>,
    ) -> Result<ResizeAction, E> {
        let action = resize_action(self.extent(), width, height);
        match action {
            ResizeAction::Keep => {}
            ResizeAction::Teardown => self.built = None,
            ResizeAction::Rebuild(extent) => {
                self.built = None;
                self.built = Some((extent, build(extent)?));
            }
        }
        Ok(action)
    }
}

/// Four 32-bit values, bound as root constants on D3D12 and as a dynamic
/// constant buffer on D3D11.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GlowConstants {
    /// UV distance of one texel along the blur axis.
    pub step: [f32; 2],
    pub radius: f32,
    pub intensity: f32,
}

impl GlowConstants {
    pub const NUM_VALUES: u32 = 4;

    pub fn blur(axis: BlurAxis, extent: TargetExtent, settings: &GlowSettings) -> Self {
        let step = axis.direction() * extent.texel_size();
        Self {
            step: step.to_array(),
            radius: settings.radius.max(0.0),
            intensity: settings.intensity,
        }
    }

    pub fn composite(settings: &GlowSettings) -> Self {
        Self {
            step: [0.0, 0.0],
            radius: settings.radius.max(0.0),
            intensity: settings.intensity.max(0.0),
        }
    }

    pub fn as_values(&self) -> &[u32] {
        bytemuck::cast_slice(std::slice::from_ref(self))
    }
}

/// Fullscreen-triangle blur and composite shaders shared by both backends.
pub const GLOW_HLSL: &str = r#"
cbuffer GlowConstants : register(b0)
{
    float2 Step;
    float Radius;
    float Intensity;
};

struct VSOut
{
    float4 Pos : SV_POSITION;
    float2 UV  : TEXCOORD0;
};

VSOut FullscreenVS(uint vid : SV_VertexID)
{
    float2 uv = float2((vid << 1) & 2, vid & 2);
    VSOut o;
    o.Pos = float4(uv * float2(2.0, -2.0) + float2(-1.0, 1.0), 0.0, 1.0);
    o.UV = uv;
    return o;
}

Texture2D SceneTex : register(t0);
SamplerState LinearSamp : register(s0);

float4 BlurPS(VSOut input) : SV_TARGET
{
    float2 offset = Step * Radius;
    float3 color = SceneTex.Sample(LinearSamp, input.UV).rgb * 0.28;
    color += SceneTex.Sample(LinearSamp, input.UV + offset * 1.5).rgb * 0.24;
    color += SceneTex.Sample(LinearSamp, input.UV - offset * 1.5).rgb * 0.24;
    color += SceneTex.Sample(LinearSamp, input.UV + offset * 3.0).rgb * 0.12;
    color += SceneTex.Sample(LinearSamp, input.UV - offset * 3.0).rgb * 0.12;
    return float4(color, 1.0);
}

float4 CompositePS(VSOut input) : SV_TARGET
{
    float3 bloom = SceneTex.Sample(LinearSamp, input.UV).rgb * Intensity;
    return float4(bloom, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn kernel_is_symmetric_and_normalized() {
        let total: f32 = BLUR_TAPS.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-6);
        for &(offset, weight) in &BLUR_TAPS[1..] {
            assert!(BLUR_TAPS.iter().any(|&(o, w)| o == -offset && w == weight));
        }
    }

    #[test]
    fn shader_matches_the_kernel() {
        for (offset, weight) in BLUR_TAPS {
            if offset > 0.0 {
                assert!(GLOW_HLSL.contains(&format!("offset * {:.1}).rgb * {}", offset, weight)));
            }
        }
        assert!(GLOW_HLSL.contains("input.UV).rgb * 0.28"));
    }

    #[test]
    fn defaults() {
        let settings = GlowSettings::default();
        assert_eq!(settings.radius, 4.0);
        assert_eq!(settings.intensity, 1.0);
    }

    #[test]
    fn blur_step_is_one_texel_along_the_axis() {
        let extent = TargetExtent::new(800, 400).unwrap();
        let settings = GlowSettings::default();

        let h = GlowConstants::blur(BlurAxis::Horizontal, extent, &settings);
        assert_eq!(h.step, [1.0 / 800.0, 0.0]);
        assert_eq!(h.radius, 4.0);

        let v = GlowConstants::blur(BlurAxis::Vertical, extent, &settings);
        assert_eq!(v.step, [0.0, 1.0 / 400.0]);

        let c = GlowConstants::composite(&GlowSettings {
            radius: 2.0,
            intensity: 0.5,
        });
        assert_eq!(c.step, [0.0, 0.0]);
        assert_eq!(c.intensity, 0.5);
    }

    #[test]
    fn constants_fill_four_root_values() {
        let c = GlowConstants {
            step: [0.5, 0.25],
            radius: 4.0,
            intensity: 1.0,
        };
        let values = c.as_values();
        assert_eq!(values.len() as u32, GlowConstants::NUM_VALUES);
        assert_eq!(f32::from_bits(values[1]), 0.25);
        assert_eq!(std::mem::size_of::<GlowConstants>(), 16);
    }

    #[test]
    fn pass_order_is_fixed() {
        assert_eq!(GLOW_PASSES[0], GlowPass::Emissive);
        assert_eq!(GLOW_PASSES[1], GlowPass::Blur(BlurAxis::Horizontal));
        assert_eq!(GLOW_PASSES[2], GlowPass::Blur(BlurAxis::Vertical));
        assert_eq!(GLOW_PASSES[4], GlowPass::Composite);
    }

    #[test]
    fn any_size_change_rebuilds_and_zero_tears_down() {
        let current = TargetExtent::new(640, 480);
        assert_eq!(resize_action(current, 640, 480), ResizeAction::Keep);
        assert_eq!(
            resize_action(current, 641, 480),
            ResizeAction::Rebuild(TargetExtent { width: 641, height: 480 })
        );
        assert_eq!(resize_action(current, 0, 480), ResizeAction::Teardown);
        assert_eq!(
            resize_action(None, 10, 10),
            ResizeAction::Rebuild(TargetExtent { width: 10, height: 10 })
        );
        assert_eq!(resize_action(None, 0, 0), ResizeAction::Keep);
    }

    struct Counted {
        live: Rc<Cell<usize>>,
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.live.set(self.live.get() - 1);
        }
    }

    fn build(live: &Rc<Cell<usize>>) -> impl FnOnce(TargetExtent) -> Result<Counted, ()> {
        let live = live.clone();
        move |_| {
            // The previous set is gone before the next one exists.
            assert_eq!(live.get(), 0);
            live.set(1);
            Ok(Counted { live })
        }
    }

    #[test]
    fn every_size_change_rebuilds_everything() {
        let live = Rc::new(Cell::new(0));
        let mut sized = SizedResources::new();

        let action = sized.resize(640, 480, build(&live)).unwrap();
        assert_eq!(action, ResizeAction::Rebuild(TargetExtent { width: 640, height: 480 }));
        assert_eq!(live.get(), 1);

        let same = sized.resize(640, 480, |_| -> Result<Counted, ()> { panic!("rebuilt at the same size") });
        assert_eq!(same, Ok(ResizeAction::Keep));

        sized.resize(800, 480, build(&live)).unwrap();
        assert_eq!(live.get(), 1);
        assert_eq!(sized.extent(), TargetExtent::new(800, 480));
    }

    #[test]
    fn zero_extent_releases_everything() {
        let live = Rc::new(Cell::new(0));
        let mut sized = SizedResources::new();
        sized.resize(64, 64, build(&live)).unwrap();

        assert_eq!(sized.resize(0, 64, build(&live)), Ok(ResizeAction::Teardown));
        assert_eq!(live.get(), 0);
        assert!(sized.get().is_none());

        sized.resize(32, 32, build(&live)).unwrap();
        assert_eq!(sized.get().map(|(extent, _)| extent), TargetExtent::new(32, 32));
    }

    #[test]
    fn failed_build_leaves_nothing_behind() {
        let live = Rc::new(Cell::new(0));
        let mut sized = SizedResources::new();
        sized.resize(64, 64, build(&live)).unwrap();

        assert_eq!(sized.resize(128, 64, |_| Err("out of memory")), Err("out of memory"));
        assert_eq!(live.get(), 0);
        assert_eq!(sized.extent(), None);
    }
}
