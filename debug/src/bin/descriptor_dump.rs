//! Compile shader and material blocks and print what the renderer would see.
//! Run: cargo run -p debug --bin descriptor_dump [path/to/shader.wgsl ...]
//! Without arguments the built-in shaders are dumped.

use std::path::Path;
use std::process::ExitCode;

use beacon_renderer::descriptor::{
    compile_material_blocks, compile_shader_source, sampler_text, topology_token,
};
use beacon_renderer::shader::{builtin_sources, ShaderSource};
use beacon_renderer::MaterialScheme;

fn load(path: &str) -> Result<ShaderSource, String> {
    let path = Path::new(path);
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| format!("{}: not a shader file name", path.display()))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    ShaderSource::from_file(dir, name).map_err(|e| e.to_string())
}

fn print_scheme(scheme: &MaterialScheme) {
    println!("  material `{}` ({} bytes)", scheme.name(), scheme.buffer_size());
    for property in scheme.properties() {
        let offset = scheme
            .property(&property.name)
            .map_or(0, |packed| packed.offset);
        println!(
            "    +{:<4} {:<16} {:?} = {:?}",
            offset, property.name, property.ty, property.default
        );
    }
    for texture in scheme.textures() {
        println!("    t{:<3} {:<16} = {}", texture.slot, texture.name, texture.default);
    }
    for sampler in scheme.samplers() {
        println!("    s{:<3} {:<16} = {}", sampler.slot, sampler.name, sampler_text(&sampler.desc));
    }
}

fn dump(source: &ShaderSource) -> Result<(), String> {
    println!("== {}", source.name);
    match compile_shader_source(&source.name, &source.text).map_err(|e| e.to_string())? {
        Some(desc) => {
            println!(
                "  stages {:?}, topology {}, material {:?}",
                desc.stages,
                topology_token(desc.topology),
                desc.material
            );
            for (slot, name) in desc.targets.iter() {
                println!("    target {slot}: {name}");
            }
            let block = desc.to_block().map_err(|e| e.to_string())?;
            println!("{block}");
        }
        None => println!("  (no shader block)"),
    }
    for scheme in compile_material_blocks(&source.text).map_err(|e| e.to_string())? {
        print_scheme(&scheme);
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let sources = if args.is_empty() {
        builtin_sources()
    } else {
        match args.iter().map(|a| load(a)).collect::<Result<Vec<_>, _>>() {
            Ok(sources) => sources,
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        }
    };
    let mut failed = false;
    for source in &sources {
        if let Err(e) = dump(source) {
            eprintln!("{}: {e}", source.name);
            failed = true;
        }
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
