//! Render the demo scene without a window and report what each frame cost.
//! Run: cargo run -p debug --bin headless_frame [-- --gpu] [--frames N] [--config beacon.ron]
//! Without `--gpu` the recording null device is used, so no adapter is needed.

use std::process::ExitCode;

use beacon_bridge::WgpuDevice;
use beacon_renderer::{BeaconConfig, Renderer};
use beacon_rhi::{Device, NullDevice};
use debug::{build_demo_scene, demo_view};

struct Options {
    gpu: bool,
    frames: u32,
    config: Option<String>,
}

fn parse_args() -> Result<Options, String> {
    let mut options = Options {
        gpu: false,
        frames: 1,
        config: None,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--gpu" => options.gpu = true,
            "--frames" => {
                let value = args.next().ok_or("--frames needs a value")?;
                options.frames = value.parse().map_err(|_| format!("bad frame count `{value}`"))?;
            }
            "--config" => options.config = Some(args.next().ok_or("--config needs a path")?),
            other => return Err(format!("unknown argument `{other}`")),
        }
    }
    Ok(options)
}

fn load_config(path: Option<&str>) -> Result<BeaconConfig, String> {
    let Some(path) = path else {
        return Ok(BeaconConfig {
            width: 640,
            height: 360,
            ..Default::default()
        });
    };
    let text = std::fs::read_to_string(path).map_err(|e| format!("{path}: {e}"))?;
    BeaconConfig::from_ron(&text).map_err(|e| format!("{path}: {e}"))
}

fn run(options: &Options) -> Result<(), String> {
    let config = load_config(options.config.as_deref())?;
    let size = (config.width, config.height);
    let device: Box<dyn Device> = if options.gpu {
        Box::new(WgpuDevice::headless(size.0, size.1).map_err(|e| e.to_string())?)
    } else {
        Box::new(NullDevice::new(size.0, size.1))
    };
    let mut renderer = Renderer::with_default_passes(device, config).map_err(|e| e.to_string())?;
    let draws = build_demo_scene(&mut renderer, 6).map_err(|e| e.to_string())?;
    println!("passes: {}", renderer.pass_names().join(" -> "));

    for index in 0..options.frames {
        let view = demo_view(size, index as f32 / 60.0);
        let frame = renderer.resolve_frame(&draws, &view).map_err(|e| e.to_string())?;
        let before = renderer.binder().stats();
        renderer.render_frame(&frame).map_err(|e| e.to_string())?;
        let after = renderer.binder().stats();
        let draw_count = renderer
            .device_mut()
            .as_any_mut()
            .downcast_mut::<NullDevice>()
            .map(|null| null.take_calls().iter().filter(|c| c.is_draw()).count());
        println!(
            "frame {index}: binds issued {}, elided {}{}",
            after.issued - before.issued,
            after.elided - before.elided,
            draw_count.map(|n| format!(", {n} draws")).unwrap_or_default()
        );
    }
    if let Some(gpu) = renderer.device().as_any().downcast_ref::<WgpuDevice>() {
        println!("pipelines cached: {}", gpu.pipeline_count());
    }
    renderer.release();
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let result = parse_args().and_then(|options| run(&options));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("headless_frame: {e}");
            ExitCode::FAILURE
        }
    }
}
