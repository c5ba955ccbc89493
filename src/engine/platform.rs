//! Per-platform release artifacts for the dynomark engine

/// Download URL and cached filename for one platform's engine build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformArtifact {
    pub url: &'static str,
    pub filename: &'static str,
}

/// Resolves the release artifact for an OS identifier as reported by
/// `std::env::consts::OS`. Returns `None` on platforms without a published
/// engine build; callers turn that into a user-facing notice instead of
/// attempting a download.
pub fn platform_artifact(os: &str) -> Option<PlatformArtifact> {
    match os {
        "windows" => Some(PlatformArtifact {
            url: "https://github.com/k-lar/dynomark/releases/latest/download/dynomark.exe",
            filename: "dynomark.exe",
        }),
        "linux" => Some(PlatformArtifact {
            url: "https://github.com/k-lar/dynomark/releases/latest/download/dynomark-linux",
            filename: "dynomark-linux",
        }),
        "macos" => Some(PlatformArtifact {
            url: "https://github.com/k-lar/dynomark/releases/latest/download/dynomark-macos",
            filename: "dynomark-macos",
        }),
        _ => None,
    }
}
