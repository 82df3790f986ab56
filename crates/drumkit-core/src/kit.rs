//! Instruments of a drum kit

use serde::{Deserialize, Serialize};

/// One instrument of the loaded kit: its grid name and where its sample lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleSource {
    pub name: String,
    pub url: String,
}

impl SampleSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}
