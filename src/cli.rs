use clap::ValueEnum;

/// When to enqueue checksum verification after a finished download.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VerifyMode {
    /// Verify only when the update carries a checksum.
    #[default]
    Auto,
    /// Require a checksum and always verify.
    On,
    Off,
}

impl VerifyMode {
    pub fn should_verify(self, checksum: Option<&str>) -> bool {
        match self {
            VerifyMode::Off => false,
            VerifyMode::Auto | VerifyMode::On => checksum.is_some(),
        }
    }
}
