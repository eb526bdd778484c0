use thiserror::Error;

use crate::error::{Result, SettingsError};
use crate::settings::{VideoSettings, MAX_CHANNELS};

/// 校验错误
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {0}")]
    RequiredFieldMissing(String),

    #[error("Value out of range: {field} = {value}, expected {min}..{max}")]
    OutOfRange {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Invalid format: {field} = {value}, reason: {reason}")]
    InvalidFormat {
        field: String,
        value: String,
        reason: String,
    },
}

/// 校验规则
pub trait ValidationRule: Send + Sync {
    fn validate(&self, settings: &VideoSettings) -> std::result::Result<(), ValidationError>;
    fn name(&self) -> &str;
}

/// 配置校验器
#[derive(Default)]
pub struct SettingsValidator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl SettingsValidator {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// 添加校验规则
    pub fn add_rule(&mut self, rule: Box<dyn ValidationRule>) {
        self.rules.push(rule);
    }

    /// 执行所有校验规则
    pub fn validate(&self, settings: &VideoSettings) -> Result<()> {
        let errors: Vec<String> = self
            .rules
            .iter()
            .filter_map(|rule| {
                rule.validate(settings)
                    .err()
                    .map(|e| format!("[{}] {}", rule.name(), e))
            })
            .collect();

        if !errors.is_empty() {
            return Err(SettingsError::Validation(errors.join("; ")));
        }

        Ok(())
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// 范围校验规则
pub struct RangeRule<F>
where
    F: Fn(&VideoSettings) -> i64 + Send + Sync,
{
    name: String,
    field_name: String,
    extractor: F,
    min: i64,
    max: i64,
}

impl<F> RangeRule<F>
where
    F: Fn(&VideoSettings) -> i64 + Send + Sync,
{
    pub fn new(name: impl Into<String>, field_name: impl Into<String>, extractor: F, min: i64, max: i64) -> Self {
        Self {
            name: name.into(),
            field_name: field_name.into(),
            extractor,
            min,
            max,
        }
    }
}

impl<F> ValidationRule for RangeRule<F>
where
    F: Fn(&VideoSettings) -> i64 + Send + Sync,
{
    fn validate(&self, settings: &VideoSettings) -> std::result::Result<(), ValidationError> {
        let value = (self.extractor)(settings);

        if value < self.min || value > self.max {
            return Err(ValidationError::OutOfRange {
                field: self.field_name.clone(),
                value: value.to_string(),
                min: self.min.to_string(),
                max: self.max.to_string(),
            });
        }

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 自定义校验规则
pub struct CustomRule<F>
where
    F: Fn(&VideoSettings) -> std::result::Result<(), ValidationError> + Send + Sync,
{
    name: String,
    validator: F,
}

impl<F> CustomRule<F>
where
    F: Fn(&VideoSettings) -> std::result::Result<(), ValidationError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, validator: F) -> Self {
        Self {
            name: name.into(),
            validator,
        }
    }
}

impl<F> ValidationRule for CustomRule<F>
where
    F: Fn(&VideoSettings) -> std::result::Result<(), ValidationError> + Send + Sync,
{
    fn validate(&self, settings: &VideoSettings) -> std::result::Result<(), ValidationError> {
        (self.validator)(settings)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 默认规则集
///
/// 视频源与通道不匹配（例如第 1 路选择 UVC）不在此拒绝，由 VideoManager 按未启用处理。
pub fn default_validator() -> SettingsValidator {
    let mut validator = SettingsValidator::new();

    validator.add_rule(Box::new(RangeRule::new(
        "channel_count_range",
        "channel_count",
        |s: &VideoSettings| s.channel_count as i64,
        1,
        MAX_CHANNELS as i64,
    )));

    validator.add_rule(Box::new(CustomRule::new("udp_port_set", |s: &VideoSettings| {
        for (id, channel) in s.channels.iter().enumerate() {
            if channel.source.uses_udp_port() && channel.udp_port == 0 {
                return Err(ValidationError::InvalidFormat {
                    field: format!("channels[{}].udp_port", id),
                    value: "0".to_string(),
                    reason: "UDP source needs a listening port".to_string(),
                });
            }
        }
        Ok(())
    })));

    validator.add_rule(Box::new(CustomRule::new("storage_limit_path", |s: &VideoSettings| {
        if s.recording.storage_limit && s.recording.save_path.as_os_str().is_empty() {
            return Err(ValidationError::RequiredFieldMissing(
                "recording.save_path".to_string(),
            ));
        }
        Ok(())
    })));

    validator
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ChannelSettings, VideoSource};
    use std::path::PathBuf;

    #[test]
    fn test_default_settings_pass() {
        let validator = default_validator();
        assert_eq!(validator.rule_count(), 3);
        assert!(validator.validate(&VideoSettings::default()).is_ok());
    }

    #[test]
    fn test_channel_count_out_of_range() {
        let validator = default_validator();

        let mut settings = VideoSettings::default();
        settings.channel_count = 0;
        assert!(validator.validate(&settings).is_err());

        settings.channel_count = MAX_CHANNELS + 1;
        assert!(validator.validate(&settings).is_err());
    }

    #[test]
    fn test_udp_port_zero_rejected() {
        let validator = default_validator();

        let mut settings = VideoSettings::default();
        settings.set_channel(2, ChannelSettings::udp(VideoSource::MpegTs, 0));

        let err = validator.validate(&settings).unwrap_err();
        assert!(err.to_string().contains("channels[2].udp_port"));
    }

    #[test]
    fn test_uvc_on_secondary_channel_not_rejected() {
        let validator = default_validator();

        let mut settings = VideoSettings::default();
        settings.set_channel(1, ChannelSettings::uvc("/dev/video0"));
        assert!(validator.validate(&settings).is_ok());
    }

    #[test]
    fn test_storage_limit_without_path() {
        let validator = default_validator();

        let mut settings = VideoSettings::default();
        settings.recording.storage_limit = true;
        settings.recording.save_path = PathBuf::new();
        assert!(validator.validate(&settings).is_err());
    }
}
