//! shader 编译、反射与热重载
//!
//! - [`compiler`]：调用外部编译器，编译失败时交给 [`compiler::CompileErrorHandler`] 决定重试或终止
//! - [`reflect`]：从 SPIR-V 中提取顶点输入、descriptor binding 以及 push constant 范围
//! - [`library`]：跟踪源文件的修改时间，热重载时替换 module 并让相关 pipeline 失效

pub mod compiler;
pub mod library;
pub mod reflect;
