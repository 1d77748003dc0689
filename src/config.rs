use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub camera: CameraConfig,
    pub display: DisplayConfig,
    pub dispatch: DispatchConfig,
    pub encoding: EncodingConfig,
    pub inference: InferenceConfig,
    pub overlay: OverlayConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub index: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DisplayConfig {
    #[serde(default = "default_window_name")]
    pub window_name: String,
}

fn default_window_name() -> String {
    "Webcam Caption".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    #[serde(default = "default_every_n_frames")]
    pub every_n_frames: u64,
}

fn default_every_n_frames() -> u64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EncodingConfig {
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: i32,
    pub resize: Option<ResizeConfig>,
}

fn default_jpeg_quality() -> i32 {
    80
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ResizeConfig {
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    pub url: String,
    pub model: String,
    pub prompt: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, deserialize_with = "deserialize_caption_policy")]
    pub caption_policy: CaptionPolicy,
}

fn default_timeout_secs() -> u64 {
    30
}

fn deserialize_caption_policy<'de, D>(deserializer: D) -> Result<CaptionPolicy, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

/// How to combine `response` fragments from a streamed generate call.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum CaptionPolicy {
    /// Concatenate every fragment in arrival order (Ollama streams one token
    /// per object, the full caption is the concatenation).
    #[default]
    Accumulate,
    /// Keep only the last fragment seen.
    Replace,
}

impl TryFrom<String> for CaptionPolicy {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "accumulate" => Ok(Self::Accumulate),
            "replace" => Ok(Self::Replace),
            other => Err(format!(
                "{} is not a supported caption policy. Use either `accumulate` or `replace`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OverlayConfig {
    #[serde(default = "default_font_scale")]
    pub font_scale: f64,
    #[serde(default = "default_thickness")]
    pub thickness: i32,
    #[serde(default)]
    pub color: ColorConfig,
    #[serde(default = "default_origin_x")]
    pub origin_x: i32,
    #[serde(default = "default_origin_y")]
    pub origin_y: i32,
    #[serde(default = "default_background")]
    pub background: bool,
}

fn default_font_scale() -> f64 {
    0.6
}

fn default_thickness() -> i32 {
    2
}

fn default_origin_x() -> i32 {
    10
}

fn default_origin_y() -> i32 {
    30
}

fn default_background() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ColorConfig {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            r: 255,
            g: 255,
            b: 255,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT");

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("WC")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_policy_parses_known_values() {
        assert_eq!(
            CaptionPolicy::try_from("accumulate".to_string()).unwrap(),
            CaptionPolicy::Accumulate
        );
        assert_eq!(
            CaptionPolicy::try_from("REPLACE".to_string()).unwrap(),
            CaptionPolicy::Replace
        );
        assert!(CaptionPolicy::try_from("append".to_string()).is_err());
    }
}
