//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CHATBATCH__*` 覆盖（双下划线表示嵌套，如 `CHATBATCH__RETRY__MAX_ATTEMPTS=5`）。
//! 加载完成后配置不可变，按引用传给各组件的构造函数。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::page::{PhraseSet, Selectors};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub sheet: SheetSection,
    pub browser: BrowserSection,
    pub timeouts: TimeoutsSection,
    pub retry: RetrySection,
    pub reader: ReaderSection,
    pub recovery: RecoverySection,
    pub pacing: PacingSection,
    pub humanize: HumanizeSection,
    pub backup: BackupSection,
    pub export: ExportSection,
    pub logging: LoggingSection,
    pub classifier: ClassifierSection,
    pub selectors: Selectors,
}

/// [app] 段：起始页与登录后的缓冲时间
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub start_url: String,
    pub login_settle_secs: u64,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            start_url: "https://chatgpt.com/".to_string(),
            login_settle_secs: 5,
        }
    }
}

/// [sheet] 段：请求表路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SheetSection {
    pub path: PathBuf,
}

impl Default for SheetSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("requests.csv"),
        }
    }
}

/// [browser] 段：可执行文件、用户目录（保存登录态）、窗口
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    /// 未设置时由 headless_chrome 自动查找 Chrome/Chromium
    pub executable: Option<PathBuf>,
    pub profile_dir: PathBuf,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            executable: None,
            profile_dir: PathBuf::from("chatgpt_profile"),
            headless: false,
            window_width: 1366,
            window_height: 900,
        }
    }
}

/// [timeouts] 段：所有轮询循环的上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsSection {
    pub element_wait_secs: u64,
    /// 提交前输入框未就绪时的短等待
    pub input_ready_secs: u64,
    pub response_start_secs: u64,
    pub generation_max_secs: u64,
    pub poll_interval_ms: u64,
    /// 生成结束到读取之间的缓冲
    pub settle_ms: u64,
    /// 单次错误扫描的时间预算
    pub classifier_budget_ms: u64,
    pub project_switch_delay_secs: u64,
    pub model_switch_delay_secs: u64,
    pub new_chat_delay_ms: u64,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            element_wait_secs: 20,
            input_ready_secs: 30,
            response_start_secs: 90,
            generation_max_secs: 120,
            poll_interval_ms: 2000,
            settle_ms: 2000,
            classifier_budget_ms: 300,
            project_switch_delay_secs: 3,
            model_switch_delay_secs: 2,
            new_chat_delay_ms: 2000,
        }
    }
}

impl TimeoutsSection {
    pub fn element_wait(&self) -> Duration {
        Duration::from_secs(self.element_wait_secs)
    }

    pub fn input_ready(&self) -> Duration {
        Duration::from_secs(self.input_ready_secs)
    }

    pub fn response_start(&self) -> Duration {
        Duration::from_secs(self.response_start_secs)
    }

    pub fn generation_max(&self) -> Duration {
        Duration::from_secs(self.generation_max_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn classifier_budget(&self) -> Duration {
        Duration::from_millis(self.classifier_budget_ms)
    }
}

/// 退避模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffMode {
    Fixed,
    Exponential,
}

/// [retry] 段：请求级重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub backoff: BackoffMode,
    pub max_delay_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 5,
            backoff: BackoffMode::Exponential,
            max_delay_secs: 60,
        }
    }
}

/// [reader] 段：最终回复读取
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderSection {
    pub max_attempts: u32,
    pub retry_pause_ms: u64,
    /// 去空白后少于该字符数视为可疑（可能未生成完）
    pub min_complete_chars: usize,
    /// 元素过期时页面层内部的重试次数
    pub stale_retries: u32,
}

impl Default for ReaderSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_pause_ms: 2000,
            min_complete_chars: 2,
            stale_retries: 3,
        }
    }
}

/// [recovery] 段：即时恢复动作的等待时长
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    pub rate_limit_wait_secs: u64,
    pub capacity_pause_secs: u64,
    pub network_pause_secs: u64,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            rate_limit_wait_secs: 3600,
            capacity_pause_secs: 120,
            network_pause_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacingMode {
    Fixed,
    Random,
}

/// [pacing] 段：请求之间的间隔
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingSection {
    pub mode: PacingMode,
    pub delay_secs: u64,
    pub min_secs: f64,
    pub max_secs: f64,
    /// random 模式下额外叠加 0~3 次 0.5~2 秒的微停顿
    pub micro_pauses: bool,
}

impl Default for PacingSection {
    fn default() -> Self {
        Self {
            mode: PacingMode::Fixed,
            delay_secs: 5,
            min_secs: 15.0,
            max_secs: 45.0,
            micro_pauses: true,
        }
    }
}

/// [humanize] 段：可选的拟人化节奏（默认关闭）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HumanizeSection {
    pub enabled: bool,
    pub typing_wpm_min: u32,
    pub typing_wpm_max: u32,
    pub schedule_enabled: bool,
    /// [开始, 结束) 小时
    pub work_hours: (u32, u32),
    pub lunch_break: (u32, u32),
    pub break_probability: f64,
    pub break_secs: (u64, u64),
}

impl Default for HumanizeSection {
    fn default() -> Self {
        Self {
            enabled: false,
            typing_wpm_min: 50,
            typing_wpm_max: 90,
            schedule_enabled: false,
            work_hours: (9, 18),
            lunch_break: (13, 14),
            break_probability: 0.15,
            break_secs: (300, 900),
        }
    }
}

/// [backup] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupSection {
    pub enabled: bool,
    pub dir: PathBuf,
    pub keep_last: usize,
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("backups"),
            keep_last: 5,
        }
    }
}

/// [export] 段：每个请求一个 JSON 文件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportSection {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("json_results"),
        }
    }
}

/// [logging] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub file_enabled: bool,
    pub dir: PathBuf,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: true,
            dir: PathBuf::from("logs"),
        }
    }
}

/// [classifier] 段：有序短语表，先匹配的分类胜出
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierSection {
    pub phrases: Vec<PhraseSet>,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            phrases: PhraseSet::defaults(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 CHATBATCH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CHATBATCH__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CHATBATCH")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorClass;

    #[test]
    fn test_defaults_match_original_constants() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.base_delay_secs, 5);
        assert_eq!(cfg.retry.backoff, BackoffMode::Exponential);
        assert_eq!(cfg.retry.max_delay_secs, 60);
        assert_eq!(cfg.timeouts.generation_max(), Duration::from_secs(120));
        assert_eq!(cfg.timeouts.response_start(), Duration::from_secs(90));
        assert_eq!(cfg.backup.keep_last, 5);
        assert!(!cfg.humanize.enabled);
    }

    #[test]
    fn test_default_phrase_order() {
        let cfg = AppConfig::default();
        let order: Vec<ErrorClass> = cfg.classifier.phrases.iter().map(|p| p.class).collect();
        assert_eq!(
            order,
            vec![ErrorClass::RateLimit, ErrorClass::Network, ErrorClass::Capacity, ErrorClass::Auth]
        );
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[retry]
max_attempts = 5
backoff = "fixed"

[sheet]
path = "batch.csv"
"#,
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.backoff, BackoffMode::Fixed);
        assert_eq!(cfg.retry.base_delay_secs, 5);
        assert_eq!(cfg.sheet.path, PathBuf::from("batch.csv"));
    }
}
