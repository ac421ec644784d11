//! Protocol extension table.
//!
//! An extension becomes active for a connection only when the client
//! announces the exact same name and version the server implements.

/// Optional protocol features implemented by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extension {
    ClickDistance,
    CustomBlocks,
    HeldBlock,
    EmoteFix,
    ExtPlayerList,
    EnvColors,
    EnvWeatherType,
    EnvMapAspect,
    PlayerClick,
    LongerMessages,
    MessageTypes,
    ExtEntityPositions,
}

impl Extension {
    pub const ALL: [Extension; 12] = [
        Extension::ClickDistance,
        Extension::CustomBlocks,
        Extension::HeldBlock,
        Extension::EmoteFix,
        Extension::ExtPlayerList,
        Extension::EnvColors,
        Extension::EnvWeatherType,
        Extension::EnvMapAspect,
        Extension::PlayerClick,
        Extension::LongerMessages,
        Extension::MessageTypes,
        Extension::ExtEntityPositions,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Extension::ClickDistance => "ClickDistance",
            Extension::CustomBlocks => "CustomBlocks",
            Extension::HeldBlock => "HeldBlock",
            Extension::EmoteFix => "EmoteFix",
            Extension::ExtPlayerList => "ExtPlayerList",
            Extension::EnvColors => "EnvColors",
            Extension::EnvWeatherType => "EnvWeatherType",
            Extension::EnvMapAspect => "EnvMapAspect",
            Extension::PlayerClick => "PlayerClick",
            Extension::LongerMessages => "LongerMessages",
            Extension::MessageTypes => "MessageTypes",
            Extension::ExtEntityPositions => "ExtEntityPositions",
        }
    }

    pub fn version(self) -> i32 {
        match self {
            Extension::ExtPlayerList => 2,
            _ => 1,
        }
    }

    /// Resolves a client-announced entry. Both name and version must match.
    pub fn negotiate(name: &str, version: i32) -> Option<Extension> {
        Self::ALL
            .iter()
            .copied()
            .find(|ext| ext.name() == name && ext.version() == version)
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Set of active extensions for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtensionSet(u32);

impl ExtensionSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn insert(&mut self, ext: Extension) {
        self.0 |= ext.bit();
    }

    pub fn contains(self, ext: Extension) -> bool {
        self.0 & ext.bit() != 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Extension> {
        Extension::ALL.into_iter().filter(move |ext| self.contains(*ext))
    }
}

impl FromIterator<Extension> for ExtensionSet {
    fn from_iter<I: IntoIterator<Item = Extension>>(iter: I) -> Self {
        let mut set = ExtensionSet::empty();
        for ext in iter {
            set.insert(ext);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_requires_exact_version() {
        assert_eq!(
            Extension::negotiate("ExtPlayerList", 2),
            Some(Extension::ExtPlayerList)
        );
        assert_eq!(Extension::negotiate("ExtPlayerList", 1), None);
        assert_eq!(Extension::negotiate("extplayerlist", 2), None);
        assert_eq!(Extension::negotiate("TextHotKey", 1), None);
    }

    #[test]
    fn test_extension_set_membership() {
        let mut set = ExtensionSet::empty();
        assert!(set.is_empty());

        set.insert(Extension::CustomBlocks);
        set.insert(Extension::LongerMessages);
        set.insert(Extension::CustomBlocks);

        assert_eq!(set.len(), 2);
        assert!(set.contains(Extension::CustomBlocks));
        assert!(!set.contains(Extension::HeldBlock));
        assert_eq!(ExtensionSet::from_bits(set.bits()), set);
    }

    #[test]
    fn test_names_are_unique() {
        let all: ExtensionSet = Extension::ALL.into_iter().collect();
        assert_eq!(all.len(), Extension::ALL.len());
        for ext in Extension::ALL {
            assert_eq!(Extension::negotiate(ext.name(), ext.version()), Some(ext));
        }
    }
}
