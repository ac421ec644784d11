//! Level appearance settings and their incremental transmission.

use protocol::{Extension, ExtensionSet, Packet};
use serde::{Deserialize, Serialize};

/// Colour slots, in wire order.
pub const COLOR_COUNT: usize = 6;
pub const SKY: usize = 0;
pub const CLOUD: usize = 1;
pub const FOG: usize = 2;
pub const AMBIENT: usize = 3;
pub const DIFFUSE: usize = 4;
pub const SKYBOX: usize = 5;

/// Map properties, in wire order.
pub const PROPERTY_COUNT: usize = 10;
pub const SIDE_BLOCK: usize = 0;
pub const EDGE_BLOCK: usize = 1;
pub const EDGE_HEIGHT: usize = 2;
pub const CLOUDS_HEIGHT: usize = 3;
pub const MAX_FOG_DISTANCE: usize = 4;
pub const CLOUDS_SPEED: usize = 5;
pub const WEATHER_SPEED: usize = 6;
pub const WEATHER_FADE: usize = 7;
pub const EXPONENTIAL_FOG: usize = 8;
pub const SIDE_OFFSET: usize = 9;

/// Client-side defaults for each map property.
pub const DEFAULT_PROPERTIES: [i32; PROPERTY_COUNT] = [7, 8, -1, -1, 0, 256, 256, 128, 0, -2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Weather {
    #[default]
    Sunny = 0,
    Raining = 1,
    Snowing = 2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvConfig {
    /// `None` leaves the colour at the client default.
    pub colors: [Option<(u8, u8, u8)>; COLOR_COUNT],
    pub weather: Weather,
    /// Empty string means the client's own textures.
    pub texture_url: String,
    pub properties: [i32; PROPERTY_COUNT],
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            colors: [None; COLOR_COUNT],
            weather: Weather::Sunny,
            texture_url: String::new(),
            properties: DEFAULT_PROPERTIES,
        }
    }
}

/// Set of environment settings to (re)transmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnvMask(u32);

impl EnvMask {
    const WEATHER: u32 = 1 << COLOR_COUNT;
    const TEXTURE: u32 = 1 << (COLOR_COUNT + 1);
    const PROPERTY_SHIFT: usize = COLOR_COUNT + 2;

    pub const ALL: EnvMask = EnvMask((1 << (COLOR_COUNT + 2 + PROPERTY_COUNT)) - 1);

    pub fn empty() -> Self {
        EnvMask(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn color(slot: usize) -> Self {
        EnvMask(1 << slot)
    }

    pub fn weather() -> Self {
        EnvMask(Self::WEATHER)
    }

    pub fn texture() -> Self {
        EnvMask(Self::TEXTURE)
    }

    pub fn property(slot: usize) -> Self {
        EnvMask(1 << (Self::PROPERTY_SHIFT + slot))
    }

    pub fn contains(self, other: EnvMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: EnvMask) {
        self.0 |= other.0;
    }
}

impl EnvConfig {
    /// Settings that differ between `self` and `other`.
    pub fn diff(&self, other: &EnvConfig) -> EnvMask {
        let mut mask = EnvMask::empty();
        for slot in 0..COLOR_COUNT {
            if self.colors[slot] != other.colors[slot] {
                mask.insert(EnvMask::color(slot));
            }
        }
        if self.weather != other.weather {
            mask.insert(EnvMask::weather());
        }
        if self.texture_url != other.texture_url {
            mask.insert(EnvMask::texture());
        }
        for slot in 0..PROPERTY_COUNT {
            if self.properties[slot] != other.properties[slot] {
                mask.insert(EnvMask::property(slot));
            }
        }
        mask
    }

    /// Packets carrying the masked settings that a client with `ext` understands.
    pub fn packets_for(&self, mask: EnvMask, ext: &ExtensionSet) -> Vec<Packet> {
        let mut packets = Vec::new();

        if ext.contains(Extension::EnvColors) {
            for (slot, color) in self.colors.iter().enumerate() {
                if !mask.contains(EnvMask::color(slot)) {
                    continue;
                }
                let (red, green, blue) = match color {
                    Some((r, g, b)) => (*r as i16, *g as i16, *b as i16),
                    None => (-1, -1, -1),
                };
                packets.push(Packet::EnvSetColor {
                    variable: slot as u8,
                    red,
                    green,
                    blue,
                });
            }
        }

        if ext.contains(Extension::EnvWeatherType) && mask.contains(EnvMask::weather()) {
            packets.push(Packet::EnvSetWeatherType {
                weather: self.weather as u8,
            });
        }

        if ext.contains(Extension::EnvMapAspect) {
            if mask.contains(EnvMask::texture()) {
                packets.push(Packet::SetMapEnvUrl {
                    url: self.texture_url.clone(),
                });
            }
            for (slot, value) in self.properties.iter().enumerate() {
                if mask.contains(EnvMask::property(slot)) {
                    packets.push(Packet::SetMapEnvProperty {
                        property: slot as u8,
                        value: *value,
                    });
                }
            }
        }

        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_env() -> ExtensionSet {
        [
            Extension::EnvColors,
            Extension::EnvWeatherType,
            Extension::EnvMapAspect,
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_identical_configs_have_empty_diff() {
        let env = EnvConfig::default();
        assert!(env.diff(&env.clone()).is_empty());
    }

    #[test]
    fn test_diff_only_retransmits_changes() {
        let old = EnvConfig::default();
        let mut new = old.clone();
        new.colors[FOG] = Some((10, 20, 30));
        new.properties[EDGE_HEIGHT] = 12;

        let mask = new.diff(&old);
        let packets = new.packets_for(mask, &all_env());
        assert_eq!(
            packets,
            vec![
                Packet::EnvSetColor {
                    variable: FOG as u8,
                    red: 10,
                    green: 20,
                    blue: 30
                },
                Packet::SetMapEnvProperty {
                    property: EDGE_HEIGHT as u8,
                    value: 12
                },
            ]
        );
    }

    #[test]
    fn test_packets_filtered_by_extensions() {
        let mut env = EnvConfig::default();
        env.weather = Weather::Snowing;

        assert!(env.packets_for(EnvMask::ALL, &ExtensionSet::empty()).is_empty());

        let weather_only: ExtensionSet = [Extension::EnvWeatherType].into_iter().collect();
        assert_eq!(
            env.packets_for(EnvMask::ALL, &weather_only),
            vec![Packet::EnvSetWeatherType { weather: 2 }]
        );
    }

    #[test]
    fn test_full_mask_sends_everything() {
        let env = EnvConfig::default();
        let packets = env.packets_for(EnvMask::ALL, &all_env());
        assert_eq!(packets.len(), COLOR_COUNT + 1 + 1 + PROPERTY_COUNT);
        assert!(packets.contains(&Packet::EnvSetColor {
            variable: SKY as u8,
            red: -1,
            green: -1,
            blue: -1
        }));
    }
}
