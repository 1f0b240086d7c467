use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ash::vk;

use crate::config::ShaderConfig;
use crate::error::{ShaderError, gfx_fatal};
use crate::shader::reflect::ShaderReflection;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}
impl ShaderStage {
    #[inline]
    pub fn vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    /// 根据扩展名推断 stage：`.vert` `.frag` `.comp`
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "vert" => Some(ShaderStage::Vertex),
            "frag" => Some(ShaderStage::Fragment),
            "comp" => Some(ShaderStage::Compute),
            _ => None,
        }
    }

    /// glslc `-fshader-stage` 的参数
    #[inline]
    pub fn glslc_name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Fragment => "frag",
            ShaderStage::Compute => "comp",
        }
    }
}

/// 一个具体的编译任务
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderCompileRequest {
    pub path: PathBuf,
    pub entry_point: String,
    pub stage: ShaderStage,
    /// 预处理宏，(名称, 值)；值为空时只定义名称
    pub defines: Vec<(String, String)>,
}
impl ShaderCompileRequest {
    pub fn new(path: impl AsRef<Path>, stage: ShaderStage) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entry_point: "main".to_string(),
            stage,
            defines: vec![],
        }
    }

    /// builder
    #[inline]
    pub fn define(mut self, name: &str, value: &str) -> Self {
        self.defines.push((name.to_string(), value.to_string()));
        self
    }

    /// builder
    #[inline]
    pub fn entry_point(mut self, entry_point: &str) -> Self {
        self.entry_point = entry_point.to_string();
        self
    }

    /// 用于日志和 debug name
    pub fn display_name(&self) -> String {
        let file = self.path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default();
        format!("{}:{}", file, self.entry_point)
    }
}

pub struct CompiledShader {
    pub code: Vec<u32>,
    /// 编译时源文件的修改时间
    pub last_write_time: SystemTime,
}

/// 源文件的修改时间
pub fn source_write_time(path: &Path) -> Result<SystemTime, ShaderError> {
    std::fs::metadata(path).and_then(|m| m.modified()).map_err(|source| ShaderError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// 着色器编译器 Trait
pub trait ShaderCompiler {
    /// 编译着色器
    fn compile(&self, request: &ShaderCompileRequest) -> Result<CompiledShader, ShaderError>;

    fn reflect(&self, code: &[u32], request: &ShaderCompileRequest) -> Result<ShaderReflection, ShaderError> {
        ShaderReflection::from_spirv(code, &request.entry_point, request.stage.vk_stage())
    }
}

/// 使用 glslc (来自 Vulkan SDK) 将 GLSL 编译为 SPIR-V
pub struct GlslcCompiler {
    glslc_path: PathBuf,
    include_dirs: Vec<PathBuf>,
    output_dir: PathBuf,
}

impl GlslcCompiler {
    pub fn new(config: &ShaderConfig, output_dir: impl AsRef<Path>) -> Self {
        Self {
            glslc_path: PathBuf::from(&config.glslc_path),
            include_dirs: config.include_dirs.iter().map(PathBuf::from).collect(),
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    fn output_path(&self, request: &ShaderCompileRequest) -> PathBuf {
        let stem = request.path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default();
        let hash = crate::cache::key::content_hash(request);
        self.output_dir.join(format!("{}.{:08x}.spv", stem, hash as u32))
    }

    fn args(&self, request: &ShaderCompileRequest, output_path: &Path) -> Vec<String> {
        let mut args = vec![
            format!("-fshader-stage={}", request.stage.glslc_name()),
            format!("-fentry-point={}", request.entry_point),
            "-g".to_string(), // 生成调试信息
            "--target-env=vulkan1.3".to_string(),
        ];
        args.extend(self.include_dirs.iter().map(|dir| format!("-I{}", dir.display())));
        args.extend(request.defines.iter().map(|(name, value)| {
            if value.is_empty() { format!("-D{}", name) } else { format!("-D{}={}", name, value) }
        }));
        args.push("-o".to_string());
        args.push(output_path.display().to_string());
        args.push(request.path.display().to_string());
        args
    }

    /// 根据 cmd 执行的结果，处理输出信息
    fn process_cmd_output(output: &std::process::Output) {
        if !output.stdout.is_empty() {
            log::info!("stdout: {}", String::from_utf8_lossy(&output.stdout));
        }
        if !output.stderr.is_empty() {
            log::error!("stderr: {}", String::from_utf8_lossy(&output.stderr));
        }
    }
}

impl ShaderCompiler for GlslcCompiler {
    fn compile(&self, request: &ShaderCompileRequest) -> Result<CompiledShader, ShaderError> {
        let _span = tracy_client::span!("GlslcCompiler::compile");
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ShaderError::Io { path, source }
        };

        // 先记录修改时间，编译期间源文件再次修改会在下一次检查时触发重新编译
        let last_write_time = source_write_time(&request.path)?;

        std::fs::create_dir_all(&self.output_dir).map_err(io_err(&self.output_dir))?;
        let output_path = self.output_path(request);

        let output = std::process::Command::new(&self.glslc_path)
            .args(self.args(request, &output_path))
            .output()
            .map_err(io_err(&self.glslc_path))?;
        Self::process_cmd_output(&output);

        if !output.status.success() {
            return Err(ShaderError::Compiler {
                path: request.path.clone(),
                log: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let mut file = std::fs::File::open(&output_path).map_err(io_err(&output_path))?;
        let code = ash::util::read_spv(&mut file).map_err(io_err(&output_path))?;
        log::info!("compiled shader {}", request.display_name());

        Ok(CompiledShader { code, last_write_time })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompileErrorAction {
    Retry,
    Abort,
}

/// 编译失败时决定重试还是终止
pub trait CompileErrorHandler {
    fn on_error(&mut self, request: &ShaderCompileRequest, error: &ShaderError) -> CompileErrorAction;
}

/// 输出编译错误，并在 stdin 上询问是否重试
#[derive(Default)]
pub struct StdinCompileErrorHandler;

impl CompileErrorHandler for StdinCompileErrorHandler {
    fn on_error(&mut self, request: &ShaderCompileRequest, error: &ShaderError) -> CompileErrorAction {
        log::error!("{}", error);
        print!("shader {} failed to compile, fix it and retry? [Y/n] ", request.display_name());
        let _ = std::io::stdout().flush();

        let mut answer = String::new();
        match std::io::stdin().read_line(&mut answer) {
            Ok(0) | Err(_) => CompileErrorAction::Abort,
            Ok(_) => match answer.trim().to_ascii_lowercase().as_str() {
                "" | "y" | "yes" | "r" | "retry" => CompileErrorAction::Retry,
                _ => CompileErrorAction::Abort,
            },
        }
    }
}

/// 编译直到成功；handler 选择 Abort 时终止进程
pub fn compile_with_retry(
    compiler: &impl ShaderCompiler,
    request: &ShaderCompileRequest,
    handler: &mut dyn CompileErrorHandler,
) -> (CompiledShader, ShaderReflection) {
    loop {
        let result = compiler.compile(request).and_then(|compiled| {
            let reflection = compiler.reflect(&compiled.code, request)?;
            Ok((compiled, reflection))
        });
        match result {
            Ok(result) => return result,
            Err(err) => match handler.on_error(request, &err) {
                CompileErrorAction::Retry => log::info!("retry compiling {}", request.display_name()),
                CompileErrorAction::Abort => gfx_fatal!("shader compilation aborted: {}", err),
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::Cell;

    use super::*;

    /// 前 `failures` 次编译失败，之后返回固定的代码
    pub(crate) struct FakeCompiler {
        pub(crate) failures: Cell<usize>,
        pub(crate) compiles: Cell<usize>,
    }
    impl FakeCompiler {
        pub(crate) fn new(failures: usize) -> Self {
            Self {
                failures: Cell::new(failures),
                compiles: Cell::new(0),
            }
        }
    }
    impl ShaderCompiler for FakeCompiler {
        fn compile(&self, request: &ShaderCompileRequest) -> Result<CompiledShader, ShaderError> {
            self.compiles.set(self.compiles.get() + 1);
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(ShaderError::Compiler {
                    path: request.path.clone(),
                    log: "error: syntax".to_string(),
                });
            }
            Ok(CompiledShader {
                code: vec![0x0723_0203, self.compiles.get() as u32],
                last_write_time: source_write_time(&request.path)?,
            })
        }

        fn reflect(&self, _code: &[u32], request: &ShaderCompileRequest) -> Result<ShaderReflection, ShaderError> {
            Ok(ShaderReflection::new(request.stage.vk_stage(), vec![], vec![], None))
        }
    }

    struct ScriptedHandler {
        answers: Vec<CompileErrorAction>,
        errors: usize,
    }
    impl CompileErrorHandler for ScriptedHandler {
        fn on_error(&mut self, _request: &ShaderCompileRequest, _error: &ShaderError) -> CompileErrorAction {
            self.errors += 1;
            self.answers.remove(0)
        }
    }

    fn temp_source(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("tessera-compiler-{}-{}", std::process::id(), name));
        std::fs::write(&path, "void main() {}").unwrap();
        path
    }

    #[test]
    fn test_glslc_args() {
        let compiler = GlslcCompiler::new(
            &ShaderConfig {
                glslc_path: "glslc".to_string(),
                include_dirs: vec!["shader/include".to_string()],
            },
            "build",
        );
        let request = ShaderCompileRequest::new("shader/mesh.frag", ShaderStage::Fragment)
            .define("USE_SHADOW", "")
            .define("LIGHT_COUNT", "4");
        let args = compiler.args(&request, Path::new("build/mesh.spv"));
        assert_eq!(args[0], "-fshader-stage=frag");
        assert_eq!(args[1], "-fentry-point=main");
        assert!(args.contains(&"-Ishader/include".to_string()));
        assert!(args.contains(&"-DUSE_SHADOW".to_string()));
        assert!(args.contains(&"-DLIGHT_COUNT=4".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("shader/mesh.frag"));
    }

    #[test]
    fn test_defines_change_output_path() {
        let compiler = GlslcCompiler::new(&ShaderConfig::default(), "build");
        let a = ShaderCompileRequest::new("mesh.vert", ShaderStage::Vertex);
        let b = a.clone().define("SKINNED", "1");
        assert_ne!(compiler.output_path(&a), compiler.output_path(&b));
    }

    #[test]
    fn test_retry_until_success() {
        let path = temp_source("retry.vert");
        let compiler = FakeCompiler::new(2);
        let mut handler = ScriptedHandler {
            answers: vec![CompileErrorAction::Retry, CompileErrorAction::Retry],
            errors: 0,
        };
        let (compiled, reflection) =
            compile_with_retry(&compiler, &ShaderCompileRequest::new(&path, ShaderStage::Vertex), &mut handler);
        assert_eq!(handler.errors, 2);
        assert_eq!(compiler.compiles.get(), 3);
        assert_eq!(compiled.code.len(), 2);
        assert_eq!(reflection.stage, vk::ShaderStageFlags::VERTEX);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    #[should_panic(expected = "shader compilation aborted")]
    fn test_abort_is_fatal() {
        let path = temp_source("abort.frag");
        let compiler = FakeCompiler::new(1);
        let mut handler = ScriptedHandler {
            answers: vec![CompileErrorAction::Abort],
            errors: 0,
        };
        compile_with_retry(&compiler, &ShaderCompileRequest::new(&path, ShaderStage::Fragment), &mut handler);
    }

    #[test]
    fn test_stage_from_extension() {
        assert_eq!(ShaderStage::from_path(Path::new("shader/src/mesh.vert")), Some(ShaderStage::Vertex));
        assert_eq!(ShaderStage::from_path(Path::new("blur.comp")), Some(ShaderStage::Compute));
        assert_eq!(ShaderStage::from_path(Path::new("common.glsl")), None);
        assert_eq!(ShaderStage::from_path(Path::new("README")), None);
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let missing = std::env::temp_dir().join("tessera-compiler-missing.vert");
        assert!(matches!(source_write_time(&missing), Err(ShaderError::Io { .. })));
    }
}
