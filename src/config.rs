//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WAGGLE__*` 覆盖（双下划线表示嵌套，如 `WAGGLE__GRAPH__MAX_RETRIES=3`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::memory::TokenBudget;
use crate::workflow::GraphSettings;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    /// [memory] 段：对话记忆的 token 预算与估算参数
    pub memory: TokenBudget,
    /// [graph] 段：重试上限、每批步骤数、递归上限
    pub graph: GraphSettings,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
}

fn default_app_name() -> String {
    "waggle".to_string()
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 WAGGLE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WAGGLE__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WAGGLE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
