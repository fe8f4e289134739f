//! Operating system classification reported with every artifact

/// Platform family as the frontend expects it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsPlatform {
    Windows,
    Linux,
    MacOs,
    Unknown,
}

impl OsPlatform {
    /// Classify an OS name such as `std::env::consts::OS` or `Windows Server 2019`
    pub fn classify(os_name: &str) -> Self {
        let name = os_name.to_ascii_lowercase();

        if name.contains("windows") {
            OsPlatform::Windows
        } else if name.contains("linux") {
            OsPlatform::Linux
        } else if name.contains("mac") || name.contains("darwin") {
            OsPlatform::MacOs
        } else {
            OsPlatform::Unknown
        }
    }

    pub fn current() -> Self {
        Self::classify(std::env::consts::OS)
    }

    pub fn description(&self) -> &'static str {
        match self {
            OsPlatform::Windows => "Windows",
            OsPlatform::Linux => "Linux",
            OsPlatform::MacOs => "MacOS",
            OsPlatform::Unknown => "Unknown",
        }
    }
}

/// Description of the platform this process runs on
pub fn os_platform_description() -> &'static str {
    OsPlatform::current().description()
}
