use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error returned when a stored or caller-supplied string is not a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {field} value: '{value}'")]
pub struct InvalidEnumValue {
    pub field: String,
    pub value: String,
}

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// Serde goes through the same strings so the JSON artifacts match `as_str`.
macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidEnumValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(InvalidEnumValue {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

str_enum!(
    /// Lifecycle of one indexed (patient, file) pair.
    DocumentStatus {
        Indexed => "indexed",
        Failed => "failed",
        Pending => "pending",
    }
);

str_enum!(
    /// Which method produced (or failed to produce) a document's text.
    Extractor {
        NativeText => "native_text",
        Marker => "marker",
        Pdftotext => "pdftotext",
        Tesseract => "tesseract",
        None => "none",
        Queued => "queued",
        Unsupported => "unsupported",
    }
);

str_enum!(JobStatus {
    Queued => "queued",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

str_enum!(
    /// Proforma section an uploaded attachment is auto-filling.
    Section {
        Lab => "lab",
        Imaging => "imaging",
    }
);

str_enum!(ReviewStatus {
    NotReady => "not_ready",
    PendingReview => "pending_review",
    Accepted => "accepted",
    Rejected => "rejected",
});

str_enum!(ReviewDecision {
    Accepted => "accepted",
    Rejected => "rejected",
});

str_enum!(MetricStatus {
    Low => "low",
    Normal => "normal",
    High => "high",
});

str_enum!(TrendDirection {
    Single => "single",
    Flat => "flat",
    Up => "up",
    Down => "down",
});

str_enum!(ExtractionStatus {
    Ok => "ok",
    Failed => "failed",
});

impl Extractor {
    /// True for extractors backed by an external OCR/text tool.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::Marker | Self::Pdftotext | Self::Tesseract)
    }
}

impl ReviewDecision {
    pub fn review_status(&self) -> ReviewStatus {
        match self {
            Self::Accepted => ReviewStatus::Accepted,
            Self::Rejected => ReviewStatus::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn extractor_round_trip() {
        for (variant, s) in [
            (Extractor::NativeText, "native_text"),
            (Extractor::Marker, "marker"),
            (Extractor::Pdftotext, "pdftotext"),
            (Extractor::Tesseract, "tesseract"),
            (Extractor::None, "none"),
            (Extractor::Queued, "queued"),
            (Extractor::Unsupported, "unsupported"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(Extractor::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn review_status_round_trip() {
        for (variant, s) in [
            (ReviewStatus::NotReady, "not_ready"),
            (ReviewStatus::PendingReview, "pending_review"),
            (ReviewStatus::Accepted, "accepted"),
            (ReviewStatus::Rejected, "rejected"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(ReviewStatus::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn unknown_section_is_rejected() {
        let err = Section::from_str("pathology").unwrap_err();
        assert_eq!(err.field, "Section");
        assert_eq!(err.value, "pathology");
    }

    #[test]
    fn serde_uses_wire_strings() {
        let json = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        let parsed: DocumentStatus = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(parsed, DocumentStatus::Pending);
        assert!(serde_json::from_str::<DocumentStatus>("\"bogus\"").is_err());
    }

    #[test]
    fn only_tool_extractors_are_external() {
        assert!(Extractor::Marker.is_external());
        assert!(Extractor::Tesseract.is_external());
        assert!(!Extractor::NativeText.is_external());
        assert!(!Extractor::Queued.is_external());
    }
}
