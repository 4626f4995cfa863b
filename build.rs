// Build script to compile GLSL shaders to SPIR-V
//
// Output lands in OUT_DIR and is embedded with include_bytes!. When glslc is
// missing we still emit empty files so the crate builds; pipeline creation
// then fails at startup with a readable error.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    compile_shader("shaders/square.vert", &out_dir.join("square.vert.spv"));
    compile_shader("shaders/square.frag", &out_dir.join("square.frag.spv"));
}

fn compile_shader(input: &str, output: &Path) {
    let result = Command::new("glslc")
        .arg(input)
        .arg("-o")
        .arg(output)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} will be empty", e, output.display());
            println!("cargo:warning=Install the Vulkan SDK or run: glslc {} -o {}", input, output.display());
            std::fs::write(output, []).expect("write placeholder shader");
        }
    }
}
