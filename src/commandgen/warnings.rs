//! Warning presets (§4.G "Shared policy"): `{none|minimal|extra|pedantic|strict|strictPedantic|
//! veryStrict}` map to concrete flag lists per family; "custom" passes user flags straight
//! through.

use crate::toolchain::CompilerFamily;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WarningPreset {
    None,
    Minimal,
    Extra,
    Pedantic,
    Strict,
    StrictPedantic,
    VeryStrict,
    Custom,
}

impl WarningPreset {
    pub fn parse(s: &str) -> Self {
        match s {
            "minimal" => Self::Minimal,
            "extra" => Self::Extra,
            "pedantic" => Self::Pedantic,
            "strict" => Self::Strict,
            "strictPedantic" => Self::StrictPedantic,
            "veryStrict" => Self::VeryStrict,
            "custom" => Self::Custom,
            _ => Self::None,
        }
    }

    /// Concrete flags for GNU/LLVM-family compilers; MSVC uses [`Self::msvc_flags`] instead since
    /// its warning vocabulary (`/W0`-`/W4`, `/Wall`) doesn't share GNU's `-W...` spelling.
    pub fn gnu_style_flags(self, family: CompilerFamily) -> &'static [&'static str] {
        let werror_capable = matches!(family, CompilerFamily::Gnu | CompilerFamily::Llvm | CompilerFamily::AppleLlvm);
        match self {
            Self::None | Self::Custom => &[],
            Self::Minimal => &["-Wall"],
            Self::Extra => &["-Wall", "-Wextra"],
            Self::Pedantic => &["-Wall", "-Wextra", "-Wpedantic"],
            Self::Strict => &["-Wall", "-Wextra", "-Wpedantic", "-Wshadow"],
            Self::StrictPedantic => &["-Wall", "-Wextra", "-Wpedantic", "-Wshadow", "-Wconversion"],
            Self::VeryStrict if werror_capable => {
                &["-Wall", "-Wextra", "-Wpedantic", "-Wshadow", "-Wconversion", "-Werror"]
            }
            Self::VeryStrict => &["-Wall", "-Wextra", "-Wpedantic", "-Wshadow", "-Wconversion"],
        }
    }

    pub fn msvc_flags(self) -> &'static [&'static str] {
        match self {
            Self::None | Self::Custom => &[],
            Self::Minimal => &["/W1"],
            Self::Extra => &["/W2"],
            Self::Pedantic => &["/W3"],
            Self::Strict => &["/W4"],
            Self::StrictPedantic => &["/W4"],
            Self::VeryStrict => &["/Wall"],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn very_strict_adds_werror_only_for_werror_capable_families() {
        let flags = WarningPreset::VeryStrict.gnu_style_flags(CompilerFamily::Gnu);
        assert!(flags.contains(&"-Werror"));
        let flags = WarningPreset::VeryStrict.gnu_style_flags(CompilerFamily::Emscripten);
        assert!(!flags.contains(&"-Werror"));
    }

    #[test]
    fn custom_preset_yields_no_flags() {
        assert!(WarningPreset::Custom.gnu_style_flags(CompilerFamily::Gnu).is_empty());
        assert!(WarningPreset::Custom.msvc_flags().is_empty());
    }
}
