fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=shaders");

    #[cfg(feature = "embed-shaders")]
    embed::compile_all();
}

#[cfg(feature = "embed-shaders")]
mod embed {
    use std::{env, fs, path::PathBuf};

    // (source file, shader name looked up at runtime, stage)
    const SHADERS: &[(&str, &str, shaderc::ShaderKind)] = &[
        ("fbview.vert", "vert", shaderc::ShaderKind::Vertex),
        ("fbview.frag", "frag", shaderc::ShaderKind::Fragment),
    ];

    pub fn compile_all() {
        let out = PathBuf::from(env::var("OUT_DIR").unwrap());
        let src_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap()).join("shaders");

        let comp = shaderc::Compiler::new().unwrap();
        let mut opts = shaderc::CompileOptions::new().unwrap();
        opts.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_0 as u32,
        );
        opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

        for &(file, name, kind) in SHADERS {
            let path = src_dir.join(file);
            let src = fs::read_to_string(&path)
                .unwrap_or_else(|e| panic!("read {}: {e}", path.display()));
            let spv = comp
                .compile_into_spirv(&src, kind, file, "main", Some(&opts))
                .unwrap_or_else(|e| panic!("compile {file}: {e}"));
            fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8()).unwrap();
        }
    }
}
