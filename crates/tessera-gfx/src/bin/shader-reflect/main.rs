//! Shader 反射工具
//!
//! 编译命令行指定的 shader（缺省为 `shader/src` 下的全部文件），输出反射得到的
//! 顶点输入、descriptor binding 以及 push constant 范围

use std::path::{Path, PathBuf};

use itertools::Itertools;

use tessera_gfx::config::GfxConfig;
use tessera_gfx::shader::compiler::{
    GlslcCompiler, ShaderCompileRequest, ShaderStage, StdinCompileErrorHandler, compile_with_retry,
};
use tessera_tools::init_log::init_log;
use tessera_tools::resource::TesseraPath;

fn shader_files() -> Vec<PathBuf> {
    let args: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if !args.is_empty() {
        return args;
    }
    collect_shader_files(&TesseraPath::shader_src_path(""))
}

/// 递归收集目录下的全部文件，按路径排序
fn collect_shader_files(src_dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(src_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.into_path())
        .sorted()
        .collect_vec()
}

fn main() -> anyhow::Result<()> {
    init_log();

    let config = GfxConfig::load_default()?;
    let output_dir = TesseraPath::workspace_path().join(".build").join("shader");
    std::fs::create_dir_all(&output_dir)?;

    log::info!("Shader source path: {:?}", TesseraPath::shader_src_path(""));
    log::info!("Shader output path: {:?}", output_dir);

    let compiler = GlslcCompiler::new(&config.shader, &output_dir);
    let mut handler = StdinCompileErrorHandler;

    for path in shader_files() {
        let Some(stage) = ShaderStage::from_path(&path) else {
            log::warn!("skip {:?}: unknown shader stage", path);
            continue;
        };

        let request = ShaderCompileRequest::new(&path, stage);
        let (compiled, reflection) = compile_with_retry(&compiler, &request, &mut handler);

        log::info!("{:?}: {} words, stage {:?}", path, compiled.code.len(), reflection.stage);
        for attr in &reflection.vertex_attributes {
            log::info!("  location {}: {:?}", attr.location, attr.format);
        }
        for binding in &reflection.bindings {
            log::info!(
                "  set {} binding {}: {:?} x{}",
                binding.set,
                binding.binding,
                binding.descriptor_type,
                binding.count
            );
        }
        if let Some(range) = reflection.push_constant {
            log::info!("  push constant: {:?}", range);
        }
    }

    log::info!("Shader reflection completed.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_shader_files_are_collected() {
        let root = std::env::temp_dir().join(format!("tessera-shader-reflect-{}", std::process::id()));
        let nested = root.join("post");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.join("mesh.vert"), "#version 450\nvoid main() {}\n").unwrap();
        std::fs::write(nested.join("blur.frag"), "#version 450\nvoid main() {}\n").unwrap();

        let files = collect_shader_files(&root);
        std::fs::remove_dir_all(&root).unwrap();

        assert_eq!(files, vec![root.join("mesh.vert"), nested.join("blur.frag")]);
    }
}
