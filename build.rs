// Build script to compile the builtin GLSL shaders to SPIR-V
//
// Output follows the runtime naming convention:
//   assets/shaders/<name>.<stage>.spv

use std::path::Path;
use std::process::Command;

const SHADERS: &[(&str, &str)] = &[
    ("assets/shaders/Builtin.MaterialShader.vert", "assets/shaders/Builtin.MaterialShader.vert.spv"),
    ("assets/shaders/Builtin.MaterialShader.frag", "assets/shaders/Builtin.MaterialShader.frag.spv"),
];

fn main() {
    println!("cargo:rerun-if-changed=assets/shaders/");

    for (input, output) in SHADERS {
        compile_shader(input, output);
    }
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    if !input_path.exists() {
        println!("cargo:warning=Shader source missing: {}", input);
        return;
    }

    // Check if glslc is available
    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            println!(
                "cargo:warning=Failed to compile {}: exit code {:?}",
                input,
                status.code()
            );
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), shaders were not compiled", e);
            println!("cargo:warning=Install the Vulkan SDK or compile manually: glslc {} -o {}", input, output);
        }
    }
}
