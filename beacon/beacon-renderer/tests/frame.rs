//! Whole-frame behaviour of the standard pass sequence on the recording null device.

use std::cell::RefCell;
use std::rc::Rc;

use beacon_renderer::shader::builtin_sources;
use beacon_renderer::{
    BeaconConfig, BindingState, BloomPass, ComposerPass, ConfigurationError, FrameContext,
    FrameData, GeometryPass, InitContext, LightingPass, RenderError, RenderPass, Registry,
    Renderer, Result, ShadowPass, UpdateFrequency,
};
use beacon_rhi::{Device, DeviceCall, NullDevice, VertexSemantic};
use glam::{Mat4, Vec3};
use render_api::{DirectionalLight, ExtractedDraw, ExtractedDraws, ExtractedView, PointLight};

const LAYOUT: [VertexSemantic; 3] = [
    VertexSemantic::Position,
    VertexSemantic::Normal,
    VertexSemantic::Texcoord,
];

type PassLog = Rc<RefCell<Vec<(String, usize)>>>;

/// Records each pass's name and how many draws it issued.
struct Recorder {
    inner: Box<dyn RenderPass>,
    log: PassLog,
}

fn draw_count(device: &dyn Device) -> usize {
    device
        .as_any()
        .downcast_ref::<NullDevice>()
        .map_or(0, NullDevice::draw_count)
}

impl RenderPass for Recorder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn initialise(&mut self, ctx: &mut InitContext<'_>) -> Result<()> {
        self.inner.initialise(ctx)
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
        let before = draw_count(ctx.device);
        self.inner.render(ctx)?;
        let draws = draw_count(ctx.device) - before;
        self.log
            .borrow_mut()
            .push((self.inner.name().to_string(), draws));
        Ok(())
    }

    fn release(&mut self, device: &mut dyn Device) {
        self.inner.release(device);
    }
}

fn small_config() -> BeaconConfig {
    BeaconConfig {
        width: 64,
        height: 32,
        shadow_map_size: 32,
        point_shadow_size: 16,
        max_point_lights: 2,
        bloom_mip_count: 3,
        ..Default::default()
    }
}

fn recorded_renderer(config: BeaconConfig) -> (Renderer, PassLog) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut device = NullDevice::new(64, 32);
    let mut registry = Registry::with_defaults(&mut device).unwrap();
    registry
        .load_shaders(&mut device, &builtin_sources())
        .unwrap();
    let mut renderer = Renderer::new(Box::new(device), registry, config).unwrap();
    let log = PassLog::default();
    let passes: [Box<dyn RenderPass>; 5] = [
        Box::new(ShadowPass::new()),
        Box::new(GeometryPass::new()),
        Box::new(LightingPass::new()),
        Box::new(BloomPass::new()),
        Box::new(ComposerPass::new()),
    ];
    for inner in passes {
        renderer.add_pass(Box::new(Recorder {
            inner,
            log: log.clone(),
        }));
    }
    renderer.initialise().unwrap();
    (renderer, log)
}

fn quad_vertices() -> Vec<u8> {
    let vertices: [[f32; 8]; 4] = [
        [-1.0, 0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0],
        [1.0, 0.0, -1.0, 0.0, 1.0, 0.0, 1.0, 0.0],
        [1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 1.0],
        [-1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0],
    ];
    bytemuck::cast_slice(&vertices).to_vec()
}

/// Two quads sharing one standard material.
fn scene(renderer: &mut Renderer) -> ExtractedDraws {
    renderer
        .create_mesh("quad", &quad_vertices(), &LAYOUT, &[0, 1, 2, 0, 2, 3])
        .unwrap();
    let paint = renderer
        .create_material("paint", "standard", UpdateFrequency::Static)
        .unwrap();
    paint
        .borrow_mut()
        .set_vector4("base_color", glam::Vec4::new(0.8, 0.2, 0.2, 1.0));
    let lifted = Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0));
    ExtractedDraws {
        draws: vec![
            ExtractedDraw::new(1, "quad", "paint"),
            ExtractedDraw::new(2, "quad", "paint").with_transform(lifted.to_cols_array()),
        ],
    }
}

fn lit_view() -> ExtractedView {
    ExtractedView {
        view: Mat4::look_at_rh(Vec3::new(0.0, 3.0, 6.0), Vec3::ZERO, Vec3::Y).to_cols_array(),
        projection: Mat4::perspective_rh(1.0, 2.0, 0.1, 50.0).to_cols_array(),
        camera_position: [0.0, 3.0, 6.0],
        directional_light: Some(DirectionalLight::default()),
        point_lights: vec![
            PointLight {
                cast_shadows: true,
                ..Default::default()
            },
            PointLight::default(),
        ],
        ..Default::default()
    }
}

fn null_device(renderer: &mut Renderer) -> &mut NullDevice {
    renderer
        .device_mut()
        .as_any_mut()
        .downcast_mut::<NullDevice>()
        .unwrap()
}

#[test]
fn passes_run_in_order_with_expected_draws() {
    let (mut renderer, log) = recorded_renderer(small_config());
    let draws = scene(&mut renderer);
    let frame = renderer.resolve_frame(&draws, &lit_view()).unwrap();
    renderer.render_frame(&frame).unwrap();

    let expected = vec![
        // Directional map plus six faces of the one shadowed point light, per mesh.
        ("Shadow".to_string(), 2 * (1 + 6)),
        ("Geometry".to_string(), 2),
        // Directional plus one per point light.
        ("Lighting".to_string(), 3),
        // Two draws per bloom mip.
        ("Bloom".to_string(), 6),
        ("Composer".to_string(), 1),
    ];
    assert_eq!(*log.borrow(), expected);
    assert_eq!(renderer.binder().state(), BindingState::Idle);
    assert_eq!(renderer.frame_index(), 1);
}

#[test]
fn disabled_features_drop_their_draws() {
    let config = BeaconConfig {
        shadows_enabled: false,
        bloom_enabled: false,
        ..small_config()
    };
    let (mut renderer, log) = recorded_renderer(config);
    let draws = scene(&mut renderer);
    let frame = renderer.resolve_frame(&draws, &lit_view()).unwrap();
    renderer.render_frame(&frame).unwrap();

    let counts: Vec<usize> = log.borrow().iter().map(|(_, n)| *n).collect();
    assert_eq!(counts, vec![0, 2, 3, 1, 1]);
}

#[test]
fn second_frame_rebinds_after_cache_reset() {
    let (mut renderer, _) = recorded_renderer(small_config());
    let draws = scene(&mut renderer);
    let frame = renderer.resolve_frame(&draws, &lit_view()).unwrap();
    let binds = |calls: &[DeviceCall]| calls.iter().filter(|c| c.is_slot_bind()).count();

    null_device(&mut renderer).take_calls();
    renderer.render_frame(&frame).unwrap();
    let first = binds(&null_device(&mut renderer).take_calls());
    renderer.render_frame(&frame).unwrap();
    let calls = null_device(&mut renderer).take_calls();

    assert!(first > 0);
    assert_eq!(binds(&calls), first);
    assert_eq!(calls.first(), Some(&DeviceCall::BeginFrame));
    assert_eq!(calls.last(), Some(&DeviceCall::EndFrame));
    let stats = renderer.binder().stats();
    assert!(stats.elided > 0, "repeated frame constants are elided within a frame");
}

#[test]
fn static_material_uploads_once() {
    let (mut renderer, _) = recorded_renderer(small_config());
    let draws = scene(&mut renderer);
    let frame = renderer.resolve_frame(&draws, &lit_view()).unwrap();
    let paint = renderer.registry().material("paint").unwrap();
    let buffer = paint.borrow().buffer().unwrap();
    let uploads = |calls: &[DeviceCall]| {
        calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::UpdateBuffer { buffer: b, .. } if *b == buffer))
            .count()
    };

    renderer.render_frame(&frame).unwrap();
    assert_eq!(uploads(&null_device(&mut renderer).take_calls()), 1);
    renderer.render_frame(&frame).unwrap();
    assert_eq!(uploads(&null_device(&mut renderer).take_calls()), 0);
}

#[test]
fn mismatched_vertex_layout_fails_the_frame() {
    let (mut renderer, _) = recorded_renderer(small_config());
    scene(&mut renderer);
    renderer
        .create_mesh("points", &[0u8; 36], &[VertexSemantic::Position], &[0, 1, 2])
        .unwrap();
    let draws = ExtractedDraws {
        draws: vec![ExtractedDraw::new(1, "points", "paint")],
    };
    let frame = renderer.resolve_frame(&draws, &lit_view()).unwrap();
    let result = renderer.render_frame(&frame);
    assert!(matches!(
        result,
        Err(RenderError::Configuration(
            ConfigurationError::VertexLayoutMismatch { .. }
        ))
    ));
}

#[test]
#[should_panic(expected = "before initialise")]
fn render_before_initialise_panics() {
    let mut device = NullDevice::default();
    let registry = Registry::with_defaults(&mut device).unwrap();
    let mut renderer = Renderer::new(Box::new(device), registry, small_config()).unwrap();
    renderer.add_pass(Box::new(ComposerPass::new()));
    let _ = renderer.render_frame(&FrameData::default());
}

#[test]
fn default_passes_render_an_empty_frame() {
    let mut renderer =
        Renderer::with_default_passes(Box::new(NullDevice::new(64, 32)), small_config()).unwrap();
    assert_eq!(
        renderer.pass_names(),
        vec!["Shadow", "Geometry", "Lighting", "Bloom", "Composer"]
    );
    renderer.render_frame(&FrameData::default()).unwrap();
    // Ambient directional draw, bloom chain and composer still run without geometry.
    assert_eq!(null_device(&mut renderer).draw_count(), 1 + 6 + 1);
}

#[test]
fn release_destroys_everything_but_the_backbuffer() {
    let (mut renderer, _) = recorded_renderer(small_config());
    let draws = scene(&mut renderer);
    let frame = renderer.resolve_frame(&draws, &lit_view()).unwrap();
    renderer.render_frame(&frame).unwrap();
    renderer.release();
    assert_eq!(null_device(&mut renderer).live_resource_count(), 1);
}
