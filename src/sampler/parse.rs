use super::Sample;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const MAX_VOLUME_KEY: &str = "max_volume";
pub const MEAN_VOLUME_KEY: &str = "mean_volume";

/// Filter name ffmpeg prints in front of every volumedetect line.
const FILTER_MARKER: &str = "volumedetect";

/// `key: value` fields scraped from the analyzer's diagnostic stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeReport {
    fields: BTreeMap<String, String>,
}

impl VolumeReport {
    /// Collect every loudness field in `diagnostics`; later lines win on duplicate keys.
    pub fn parse(diagnostics: &str) -> Self {
        static FIELD_RE: OnceLock<Regex> = OnceLock::new();
        let re = FIELD_RE
            .get_or_init(|| Regex::new(r"(\w+): (.+)$").expect("field regex should compile"));

        let mut fields = BTreeMap::new();
        // Progress updates are separated by bare carriage returns.
        for line in diagnostics.split(['\n', '\r']) {
            let Some(caps) = re.captures(line) else {
                continue;
            };
            let key = &caps[1];
            if !(line.contains(FILTER_MARKER) || key.ends_with("_volume")) {
                continue;
            }
            fields.insert(key.to_string(), caps[2].trim().to_string());
        }
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Numeric value of `key` with the trailing unit token (`dB`) dropped.
    pub fn level(&self, key: &str) -> Option<f64> {
        self.get(key)?.split_whitespace().next()?.parse().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Both required levels, or `None` if either is absent or unreadable.
    pub fn to_sample(&self) -> Option<Sample> {
        let mean_level = self.level(MEAN_VOLUME_KEY)?;
        let max_level = self.level(MAX_VOLUME_KEY)?;
        Some(Sample::new(max_level, mean_level))
    }
}
