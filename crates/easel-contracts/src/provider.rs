use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Leonardo,
    Runware,
    Gemini,
    Comfyui,
}

/// Fixed, total preference order used whenever a request does not pin a
/// provider. Selection must stay deterministic for a given registered set.
pub const PREFERENCE_ORDER: [Provider; 4] = [
    Provider::Leonardo,
    Provider::Runware,
    Provider::Gemini,
    Provider::Comfyui,
];

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Leonardo => "leonardo",
            Provider::Runware => "runware",
            Provider::Gemini => "gemini",
            Provider::Comfyui => "comfyui",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpg,
    Png,
    Webp,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "4:3")]
    Wide,
    #[serde(rename = "3:4")]
    Tall,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Wide => "4:3",
            AspectRatio::Tall => "3:4",
        }
    }

    fn ratio(&self) -> (u32, u32) {
        match self {
            AspectRatio::Square => (1, 1),
            AspectRatio::Landscape => (16, 9),
            AspectRatio::Portrait => (9, 16),
            AspectRatio::Wide => (4, 3),
            AspectRatio::Tall => (3, 4),
        }
    }

    /// Convert the ratio into concrete dimensions with the longer edge at
    /// `base_size`, snapped down to multiples of 8.
    pub fn dimensions(&self, base_size: u32) -> (u32, u32) {
        let (rw, rh) = self.ratio();
        let (width, height) = if rw >= rh {
            (base_size, base_size * rh / rw)
        } else {
            (base_size * rw / rh, base_size)
        };
        (width / 8 * 8, height / 8 * 8)
    }

    /// Nearest named ratio for explicit width/height, when a provider only
    /// understands ratios.
    pub fn nearest(width: u32, height: u32) -> Option<AspectRatio> {
        if height == 0 {
            return None;
        }
        let ratio = width as f64 / height as f64;
        for candidate in [
            AspectRatio::Square,
            AspectRatio::Landscape,
            AspectRatio::Portrait,
            AspectRatio::Wide,
            AspectRatio::Tall,
        ] {
            let (rw, rh) = candidate.ratio();
            if (ratio - rw as f64 / rh as f64).abs() < 0.1 {
                return Some(candidate);
            }
        }
        None
    }
}

pub fn snap_multiple(value: u32, multiple: u32, min: u32, max: u32) -> u32 {
    (value / multiple * multiple).clamp(min, max)
}
