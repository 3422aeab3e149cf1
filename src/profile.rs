//! Output profiles
//!
//! A profile is a named, saved [`OutputState`]: lightbar color, player LEDs,
//! mic LED, rumble strength and both trigger effects.
//!
//! Profiles are stored in `$DUALSENSE_LINK_HOME/profiles` or
//! `$HOME/.dualsense-link/profiles`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::output::{Color, MicLed, OutputState, PlayerLeds, TriggerEffect};

/// Profile directory environment variable
pub const PROFILE_DIR_ENV: &str = "DUALSENSE_LINK_HOME";

/// Default profile directory name under $HOME
pub const DEFAULT_PROFILE_DIR: &str = ".dualsense-link";

/// Profile sub-directory
pub const PROFILES_SUBDIR: &str = "profiles";

/// Player LED configuration in a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProfilePlayerLeds {
    /// Player number (1-5)
    Number(u8),
    /// Explicit bitmask, fade and brightness
    Custom(PlayerLeds),
}

impl Default for ProfilePlayerLeds {
    fn default() -> Self {
        ProfilePlayerLeds::Number(1)
    }
}

impl From<ProfilePlayerLeds> for PlayerLeds {
    fn from(p: ProfilePlayerLeds) -> Self {
        match p {
            ProfilePlayerLeds::Number(n) => PlayerLeds::player(n),
            ProfilePlayerLeds::Custom(leds) => PlayerLeds {
                bitmask: leds.bitmask & PlayerLeds::ALL,
                ..leds
            },
        }
    }
}

/// Controller profile with all settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Profile name
    pub name: String,

    /// Profile description
    #[serde(default)]
    pub description: String,

    /// Lightbar color
    #[serde(default = "default_color")]
    pub led_color: Color,

    /// Whether lightbar is enabled
    #[serde(default = "default_true")]
    pub lightbar_enabled: bool,

    /// Turn every LED off
    #[serde(default)]
    pub disable_leds: bool,

    /// L2 trigger effect
    #[serde(default)]
    pub l2_trigger: TriggerEffect,

    /// R2 trigger effect
    #[serde(default)]
    pub r2_trigger: TriggerEffect,

    /// Player LED configuration
    #[serde(default)]
    pub player_leds: Option<ProfilePlayerLeds>,

    /// Mute LED: "off", "on", "pulse"
    #[serde(default)]
    pub mute_led: MicLed,

    /// Motor strength nibbles, see [`OutputState::rumble_strength`]
    #[serde(default = "default_rumble_strength")]
    pub rumble_strength: u8,

    /// Custom metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_color() -> Color {
    Color::new(226, 64, 48)
}

fn default_rumble_strength() -> u8 {
    0xFF
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: "Default".to_string(),
            description: "Default controller profile".to_string(),
            led_color: default_color(),
            lightbar_enabled: true,
            disable_leds: false,
            l2_trigger: TriggerEffect::default(),
            r2_trigger: TriggerEffect::default(),
            player_leds: Some(ProfilePlayerLeds::Number(1)),
            mute_led: MicLed::Off,
            rumble_strength: default_rumble_strength(),
            metadata: HashMap::new(),
        }
    }
}

impl Profile {
    /// Create a new profile with a name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Load a profile from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile: {}", path.display()))?;
        let profile: Profile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse profile: {}", path.display()))?;
        Ok(profile)
    }

    /// Save the profile to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Output state that applies this profile, motors off
    pub fn to_output_state(&self) -> OutputState {
        let player_leds = self
            .player_leds
            .clone()
            .map(PlayerLeds::from)
            .unwrap_or_default();

        OutputState {
            left_rumble: 0,
            right_rumble: 0,
            rumble_strength: self.rumble_strength,
            microphone_led: self.mute_led,
            disable_leds: self.disable_leds,
            player_leds,
            lightbar: if self.lightbar_enabled {
                self.led_color
            } else {
                Color::default()
            },
            left_trigger_effect: self.l2_trigger,
            right_trigger_effect: self.r2_trigger,
        }
    }

    /// Create preset profiles
    pub fn preset_default() -> Self {
        Self::default()
    }

    pub fn preset_gaming() -> Self {
        Self {
            name: "Gaming".to_string(),
            description: "Optimized for gaming with trigger feedback".to_string(),
            led_color: Color::new(255, 0, 0),
            l2_trigger: TriggerEffect::section(70, 160),
            r2_trigger: TriggerEffect::EffectEx {
                start_position: 80,
                keep_effect: false,
                begin_force: 255,
                middle_force: 200,
                end_force: 0,
                frequency: 0,
            },
            ..Default::default()
        }
    }

    pub fn preset_racing() -> Self {
        Self {
            name: "Racing".to_string(),
            description: "Progressive resistance for racing games".to_string(),
            led_color: Color::new(0, 255, 0),
            l2_trigger: TriggerEffect::continuous(0, 150),
            r2_trigger: TriggerEffect::continuous(0, 150),
            ..Default::default()
        }
    }

    pub fn preset_accessibility() -> Self {
        Self {
            name: "Accessibility".to_string(),
            description: "Reduced resistance for easier use".to_string(),
            led_color: Color::new(255, 255, 255),
            l2_trigger: TriggerEffect::ReleaseAll,
            r2_trigger: TriggerEffect::ReleaseAll,
            rumble_strength: 0x44,
            ..Default::default()
        }
    }
}

/// `$DUALSENSE_LINK_HOME/profiles`, or `~/.dualsense-link/profiles`
pub fn default_profiles_dir() -> Result<PathBuf> {
    let base = match std::env::var_os(PROFILE_DIR_ENV) {
        Some(home) => PathBuf::from(home),
        None => dirs::home_dir()
            .context("Could not determine home directory")?
            .join(DEFAULT_PROFILE_DIR),
    };
    Ok(base.join(PROFILES_SUBDIR))
}

/// File id for a profile name: lowercase, anything outside `[a-z0-9_-]`
/// becomes a single dash
pub fn profile_id(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            id.push(c);
        } else if !id.ends_with('-') {
            id.push('-');
        }
    }
    id.trim_matches('-').to_string()
}

/// Profile manager for loading, saving, and listing profiles
pub struct ProfileManager {
    profiles_dir: PathBuf,
}

impl ProfileManager {
    /// Create a profile manager for the default directory
    pub fn new() -> Result<Self> {
        Self::with_dir(default_profiles_dir()?)
    }

    /// Create a profile manager for `profiles_dir`, creating it if needed
    pub fn with_dir(profiles_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&profiles_dir).with_context(|| {
            format!(
                "Failed to create profiles directory: {}",
                profiles_dir.display()
            )
        })?;
        Ok(Self { profiles_dir })
    }

    /// Summaries of every readable profile, sorted by name. Unparseable
    /// files are logged and skipped.
    pub fn list(&self) -> Result<Vec<ProfileInfo>> {
        let mut profiles = Vec::new();

        for entry in fs::read_dir(&self.profiles_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            match Profile::load(&path) {
                Ok(profile) => profiles.push(ProfileInfo::new(id, &profile)),
                Err(e) => tracing::warn!("Skipping profile: {:#}", e),
            }
        }

        profiles.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(profiles)
    }

    /// Load a profile by display name or file id
    pub fn get(&self, name: &str) -> Result<Profile> {
        Profile::load(self.profile_path(name))
    }

    /// Save a profile under the id derived from its name
    pub fn save(&self, profile: &Profile) -> Result<PathBuf> {
        let path = self.profile_path(&profile.name);
        profile.save(&path)?;
        Ok(path)
    }

    /// Remove a profile. Returns false when there was nothing to remove.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let path = self.profile_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to delete profile: {}", path.display())),
        }
    }

    fn profile_path(&self, name: &str) -> PathBuf {
        self.profiles_dir.join(format!("{}.json", profile_id(name)))
    }

    pub fn profiles_dir(&self) -> &Path {
        &self.profiles_dir
    }

    /// Write the presets if the directory holds no profiles yet
    pub fn init_defaults(&self) -> Result<usize> {
        if !self.list()?.is_empty() {
            return Ok(0);
        }
        let presets = [
            Profile::preset_default(),
            Profile::preset_gaming(),
            Profile::preset_racing(),
            Profile::preset_accessibility(),
        ];
        for preset in &presets {
            self.save(preset)?;
        }
        Ok(presets.len())
    }
}

/// What a profile does to the controller, for listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileInfo {
    /// File name without extension
    pub id: String,
    pub name: String,
    pub description: String,
    /// None when the lightbar is switched off
    pub lightbar: Option<Color>,
    pub l2_trigger: TriggerEffect,
    pub r2_trigger: TriggerEffect,
}

impl ProfileInfo {
    fn new(id: String, profile: &Profile) -> Self {
        let lit = profile.lightbar_enabled && !profile.disable_leds;
        Self {
            id,
            name: profile.name.clone(),
            description: profile.description.clone(),
            lightbar: lit.then_some(profile.led_color),
            l2_trigger: profile.l2_trigger,
            r2_trigger: profile.r2_trigger,
        }
    }

    /// Either trigger pushes back
    pub fn has_trigger_feedback(&self) -> bool {
        self.l2_trigger.is_active() || self.r2_trigger.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::LedBrightness;

    #[test]
    fn test_profile_serialization() {
        let profile = Profile::preset_gaming();
        let json = serde_json::to_string_pretty(&profile).unwrap();
        let loaded: Profile = serde_json::from_str(&json).unwrap();
        assert_eq!(profile, loaded);
    }

    #[test]
    fn test_profile_id() {
        assert_eq!(profile_id("My Profile"), "my-profile");
        assert_eq!(profile_id("Gaming"), "gaming");
        assert_eq!(profile_id("test_profile"), "test_profile");
        assert_eq!(profile_id("  Bow / Arrow!  "), "bow-arrow");
        assert_eq!(profile_id("../etc"), "etc");
    }

    #[test]
    fn test_minimal_profile_json() {
        let json = r#"{
            "name": "Bow",
            "r2_trigger": {"type": "section_resistance", "start_position": 40, "end_position": 20},
            "player_leds": {"bitmask": 5, "brightness": "low"},
            "mute_led": "pulse"
        }"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        let state = profile.to_output_state();
        assert_eq!(state.lightbar, Color::new(226, 64, 48));
        assert_eq!(state.microphone_led, MicLed::Pulse);
        assert_eq!(state.player_leds.bitmask, 5);
        assert_eq!(state.player_leds.brightness, LedBrightness::Low);
        assert_eq!(state.left_trigger_effect, TriggerEffect::NoResistance);
        // Encoder clamps the section end
        assert_eq!(state.right_trigger_effect.to_block()[2], 40);
    }

    #[test]
    fn test_player_number_and_disabled_lightbar() {
        let profile = Profile {
            lightbar_enabled: false,
            player_leds: Some(ProfilePlayerLeds::Number(2)),
            ..Profile::new("Quiet")
        };
        let state = profile.to_output_state();
        assert_eq!(state.lightbar, Color::default());
        assert_eq!(state.player_leds.bitmask, PlayerLeds::MID_LEFT | PlayerLeds::MID_RIGHT);
        assert_eq!(state.left_rumble, 0);
    }

    #[test]
    fn test_info_for_dark_profile() {
        let profile = Profile {
            disable_leds: true,
            r2_trigger: TriggerEffect::Calibrate,
            ..Profile::new("Dark")
        };
        let info = ProfileInfo::new("dark".to_string(), &profile);
        assert_eq!(info.lightbar, None);
        assert_eq!(info.r2_trigger.name(), "calibrate");
        assert!(!info.has_trigger_feedback());
    }

    #[test]
    fn test_manager_roundtrip() {
        let dir =
            std::env::temp_dir().join(format!("dualsense-link-profiles-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let manager = ProfileManager::with_dir(dir.clone()).unwrap();

        assert_eq!(manager.init_defaults().unwrap(), 4);
        assert_eq!(manager.init_defaults().unwrap(), 0);

        let profiles = manager.list().unwrap();
        let names: Vec<&str> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Accessibility", "Default", "Gaming", "Racing"]);

        let gaming = &profiles[2];
        assert_eq!(gaming.id, "gaming");
        assert_eq!(gaming.lightbar, Some(Color::new(255, 0, 0)));
        assert_eq!(gaming.l2_trigger, TriggerEffect::section(70, 160));
        assert_eq!(gaming.r2_trigger.name(), "effect-ex");
        assert!(gaming.has_trigger_feedback());
        assert!(!profiles[0].has_trigger_feedback());
        assert!(!profiles[1].has_trigger_feedback());

        // Files that do not parse are skipped
        fs::write(dir.join("broken.json"), "{").unwrap();
        assert_eq!(manager.list().unwrap().len(), 4);

        assert_eq!(manager.get("Racing").unwrap(), Profile::preset_racing());
        assert!(manager.delete("racing").unwrap());
        assert!(!manager.delete("racing").unwrap());
        assert!(manager.get("racing").is_err());

        fs::remove_dir_all(&dir).unwrap();
    }
}
