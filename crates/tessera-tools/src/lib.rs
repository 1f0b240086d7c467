//! Tessera 工具集
//!
//! 提供日志初始化、TOML 配置加载、基于工作区根目录的路径管理。
//!
//! # TesseraPath
//! 基于工作区根目录的统一路径管理，避免硬编码相对路径。

pub mod config;
pub mod init_log;
pub mod resource;
