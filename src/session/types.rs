use crate::providers::{ImageResolution, ImageStyle, VisionDetail};
use serde::{Deserialize, Serialize};

/// How the next message in a session is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    PlainChat,
    PicCreate,
    Vision,
    RolePlay,
}

/// Sampling temperature presets offered in the AI mode menu.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiMode {
    Rigorous,
    Concise,
    #[default]
    Standard,
    Creative,
}

impl AiMode {
    pub const ALL: [AiMode; 4] = [
        AiMode::Rigorous,
        AiMode::Concise,
        AiMode::Standard,
        AiMode::Creative,
    ];

    pub fn temperature(self) -> f64 {
        match self {
            Self::Rigorous => 0.1,
            Self::Concise => 0.7,
            Self::Standard => 1.2,
            Self::Creative => 1.7,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Rigorous => "Rigorous",
            Self::Concise => "Concise",
            Self::Standard => "Standard",
            Self::Creative => "Creative",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.label() == label.trim())
    }
}

/// Mode-specific knobs; reset by `clear`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSettings {
    pub pic_resolution: ImageResolution,
    pub pic_style: ImageStyle,
    pub vision_detail: VisionDetail,
    pub ai_mode: AiMode,
}
